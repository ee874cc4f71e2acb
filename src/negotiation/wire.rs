use serde::Deserialize;
use serde_json::{Map, Value};

use crate::negotiation::{
    error::NegotiationError,
    types::{Decision, DecisionStatus, Intent, Modifications, Urgency},
};

pub const INTENT_PATH: &str = "/v1/intent";

pub const UPSTREAM_ERROR_PREFIX: &str = "upstream_error";
pub const DAEMON_UNREACHABLE_PREFIX: &str = "daemon_unreachable";
pub const CANCELLED_PREFIX: &str = "cancelled";

pub fn intent_url(endpoint: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), INTENT_PATH)
}

pub fn validate_intent(intent: &Intent) -> Result<(), NegotiationError> {
    let required = [
        ("agent_id", intent.agent_id.as_str()),
        ("identity_id", intent.identity_id.as_str()),
        ("workload_id", intent.workload_id.as_str()),
        ("scope_id", intent.scope_id.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(NegotiationError::MissingField { field });
        }
    }

    if let Some(cost) = intent.expected_cost {
        ensure_non_negative("expected_cost", cost)?;
    }
    if let Some(seconds) = intent.duration_hint {
        ensure_non_negative("duration_hint", seconds)?;
    }

    Ok(())
}

fn ensure_non_negative(field: &'static str, value: f64) -> Result<(), NegotiationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(NegotiationError::InvalidField {
            field,
            message: format!("must be a non-negative finite number, got {value}"),
        });
    }
    Ok(())
}

pub fn urgency_to_wire(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::High => "high",
        Urgency::Normal => "normal",
        Urgency::Background => "background",
    }
}

/// Flat request object. Optional fields that are absent on the intent are
/// left out rather than sent as `null`.
pub fn intent_to_wire(intent: &Intent) -> Value {
    let mut obj = Map::new();
    obj.insert("agent_id".into(), Value::String(intent.agent_id.clone()));
    obj.insert(
        "identity_id".into(),
        Value::String(intent.identity_id.clone()),
    );
    obj.insert(
        "workload_id".into(),
        Value::String(intent.workload_id.clone()),
    );
    obj.insert("scope_id".into(), Value::String(intent.scope_id.clone()));

    if let Some(urgency) = intent.urgency {
        obj.insert(
            "urgency".into(),
            Value::String(urgency_to_wire(urgency).to_string()),
        );
    }
    if let Some(number) = intent.expected_cost.and_then(serde_json::Number::from_f64) {
        obj.insert("expected_cost".into(), Value::Number(number));
    }
    if let Some(number) = intent.duration_hint.and_then(serde_json::Number::from_f64) {
        obj.insert("duration_hint".into(), Value::Number(number));
    }
    if let Some(context) = &intent.client_context {
        obj.insert("client_context".into(), Value::Object(context.clone()));
    }

    Value::Object(obj)
}

#[derive(Debug, Deserialize)]
struct WireDecision {
    decision: DecisionStatus,
    intent_id: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    modifications: Option<WireModifications>,
}

#[derive(Debug, Deserialize)]
struct WireModifications {
    #[serde(default)]
    wait_seconds: Option<f64>,
    #[serde(default)]
    identity_switch: Option<String>,
}

pub fn decision_from_wire(body: &[u8]) -> Result<Decision, serde_json::Error> {
    let wire: WireDecision = serde_json::from_slice(body)?;
    let modifications = wire.modifications.map(|mods| Modifications {
        wait_seconds: mods.wait_seconds,
        identity_switch: mods.identity_switch,
    });
    Ok(Decision::from_status(
        wire.intent_id,
        wire.decision,
        modifications,
        wire.reason,
    ))
}

pub fn upstream_error_reason(status: u16, status_text: &str) -> String {
    format!("{UPSTREAM_ERROR_PREFIX}: {status} {status_text}")
        .trim_end()
        .to_string()
}

pub fn daemon_unreachable_reason(message: &str) -> String {
    format!("{DAEMON_UNREACHABLE_PREFIX}: {message}")
}

pub fn cancelled_reason(phase: &str) -> String {
    format!("{CANCELLED_PREFIX}: {phase}")
}
