use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type IntentId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Normal,
    Background,
}

/// A proposed resource-consuming action, built fresh by the caller for each
/// negotiation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub agent_id: String,
    pub identity_id: String,
    pub workload_id: String,
    pub scope_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_cost: Option<f64>,
    /// Expected duration of the action, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_context: Option<Map<String, Value>>,
}

impl Intent {
    pub fn new(
        agent_id: impl Into<String>,
        identity_id: impl Into<String>,
        workload_id: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            identity_id: identity_id.into(),
            workload_id: workload_id.into(),
            scope_id: scope_id.into(),
            urgency: None,
            expected_cost: None,
            duration_hint: None,
            client_context: None,
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_expected_cost(mut self, expected_cost: f64) -> Self {
        self.expected_cost = Some(expected_cost);
        self
    }

    pub fn with_duration_hint(mut self, seconds: f64) -> Self {
        self.duration_hint = Some(seconds);
        self
    }

    pub fn with_client_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.client_context
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Approve,
    ApproveWithModifications,
    DenyWithReason,
}

impl DecisionStatus {
    pub fn is_allowed(self) -> bool {
        matches!(
            self,
            DecisionStatus::Approve | DecisionStatus::ApproveWithModifications
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Approve => "approve",
            DecisionStatus::ApproveWithModifications => "approve_with_modifications",
            DecisionStatus::DenyWithReason => "deny_with_reason",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Modifications {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
    /// Alternate identity the authority suggests retrying under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_switch: Option<String>,
}

/// The answer to one intent. `allowed` is derived from `status` and cannot be
/// set independently.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Decision {
    allowed: bool,
    intent_id: IntentId,
    status: DecisionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    modifications: Option<Modifications>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl Decision {
    pub fn from_status(
        intent_id: impl Into<IntentId>,
        status: DecisionStatus,
        modifications: Option<Modifications>,
        reason: Option<String>,
    ) -> Self {
        Self {
            allowed: status.is_allowed(),
            intent_id: intent_id.into(),
            status,
            modifications,
            reason,
        }
    }

    /// A denial produced locally when the authority could not give a usable
    /// answer.
    pub fn fail_closed(reason: impl Into<String>) -> Self {
        Self::from_status(
            String::new(),
            DecisionStatus::DenyWithReason,
            None,
            Some(reason.into()),
        )
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    pub fn status(&self) -> DecisionStatus {
        self.status
    }

    pub fn modifications(&self) -> Option<&Modifications> {
        self.modifications.as_ref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn wait_seconds(&self) -> Option<f64> {
        self.modifications
            .as_ref()
            .and_then(|modifications| modifications.wait_seconds)
    }
}

/// Every way a negotiation can end, as one value.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Approved(Decision),
    Modified(Decision),
    Denied { reason: String, decision: Decision },
    Invalid(String),
}

impl Outcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Approved(_) | Outcome::Modified(_))
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Outcome::Approved(decision)
            | Outcome::Modified(decision)
            | Outcome::Denied { decision, .. } => Some(decision),
            Outcome::Invalid(_) => None,
        }
    }
}

impl From<Decision> for Outcome {
    fn from(decision: Decision) -> Self {
        match decision.status() {
            DecisionStatus::Approve => Outcome::Approved(decision),
            DecisionStatus::ApproveWithModifications => Outcome::Modified(decision),
            DecisionStatus::DenyWithReason => Outcome::Denied {
                reason: decision.reason().unwrap_or_default().to_string(),
                decision,
            },
        }
    }
}
