use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    config::NegotiationConfig,
    negotiation::{
        backoff::{BackoffPolicy, JitterSource, UniformJitter},
        error::{NegotiationError, TransportError},
        suspend::{Suspender, TokioSuspender},
        telemetry::{AttemptFailure, NegotiationEvent, NoopTelemetrySink, TelemetrySink},
        transport::{HttpTransport, IntentTransport, TransportResponse},
        types::{Decision, DecisionStatus, Intent, Outcome},
        wire::{
            cancelled_reason, daemon_unreachable_reason, decision_from_wire, intent_to_wire,
            intent_url, upstream_error_reason, validate_intent,
        },
    },
};

/// Asks the authority for permission before a resource is consumed.
///
/// Holds only immutable configuration and shared collaborators, so one client
/// can serve any number of concurrent `ask` calls.
#[derive(Clone)]
pub struct NegotiationClient {
    config: NegotiationConfig,
    url: String,
    backoff: BackoffPolicy,
    transport: Arc<dyn IntentTransport>,
    suspender: Arc<dyn Suspender>,
    jitter: Arc<dyn JitterSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

enum RetryableFailure {
    Status { status: u16, status_text: String },
    Transport(TransportError),
}

impl RetryableFailure {
    fn reason(&self) -> String {
        match self {
            RetryableFailure::Status {
                status,
                status_text,
            } => upstream_error_reason(*status, status_text),
            RetryableFailure::Transport(err) => daemon_unreachable_reason(&err.message),
        }
    }

    fn telemetry(&self) -> AttemptFailure {
        match self {
            RetryableFailure::Status { status, .. } => AttemptFailure::Status { status: *status },
            RetryableFailure::Transport(err) => AttemptFailure::Transport { kind: err.kind },
        }
    }
}

impl NegotiationClient {
    pub fn new(config: NegotiationConfig) -> Result<Self, TransportError> {
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new()?)))
    }

    pub fn with_transport(config: NegotiationConfig, transport: Arc<dyn IntentTransport>) -> Self {
        Self {
            url: intent_url(&config.endpoint),
            backoff: BackoffPolicy::from_config(&config),
            config,
            transport,
            suspender: Arc::new(TokioSuspender),
            jitter: Arc::new(UniformJitter),
            telemetry: Arc::new(NoopTelemetrySink),
        }
    }

    pub fn with_suspender(mut self, suspender: Arc<dyn Suspender>) -> Self {
        self.suspender = suspender;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub fn intent_url(&self) -> &str {
        &self.url
    }

    /// Negotiates one intent. Only a malformed intent is reported as `Err`;
    /// every upstream or transport failure comes back as a denied `Decision`.
    pub async fn ask(&self, intent: &Intent) -> Result<Decision, NegotiationError> {
        self.ask_with_cancel(intent, &CancellationToken::new()).await
    }

    pub async fn ask_outcome(&self, intent: &Intent) -> Outcome {
        match self.ask(intent).await {
            Ok(decision) => Outcome::from(decision),
            Err(err) => Outcome::Invalid(err.to_string()),
        }
    }

    #[tracing::instrument(
        name = "negotiation",
        target = "negotiation",
        skip(self, intent, cancel),
        fields(
            agent_id = %intent.agent_id,
            identity_id = %intent.identity_id,
            workload_id = %intent.workload_id,
            scope_id = %intent.scope_id
        )
    )]
    pub async fn ask_with_cancel(
        &self,
        intent: &Intent,
        cancel: &CancellationToken,
    ) -> Result<Decision, NegotiationError> {
        if let Err(err) = validate_intent(intent) {
            tracing::warn!(target: "negotiation", error = %err, "intent_rejected");
            return Err(err);
        }
        let payload = intent_to_wire(intent);
        let mut attempt = 0_u32;

        loop {
            self.telemetry
                .on_event(NegotiationEvent::AttemptStarted { attempt });
            tracing::debug!(
                target: "negotiation",
                attempt = attempt,
                url = %self.url,
                timeout_ms = self.config.timeout_ms,
                "attempt_started"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let phase = format!("during attempt {attempt}");
                    return Ok(self.fail_closed(cancelled_reason(&phase), attempt + 1));
                }
                result = self.send_once(&payload) => result,
            };

            let failure = match result {
                Ok(response) if response.is_success() => {
                    return Ok(self.complete(response, attempt, cancel).await);
                }
                Ok(response) if response.is_client_error() => {
                    self.record_failure(
                        attempt,
                        AttemptFailure::Status {
                            status: response.status,
                        },
                        false,
                    );
                    let reason = upstream_error_reason(response.status, &response.status_text);
                    return Ok(self.fail_closed(reason, attempt + 1));
                }
                Ok(response) => RetryableFailure::Status {
                    status: response.status,
                    status_text: response.status_text,
                },
                Err(err) => RetryableFailure::Transport(err),
            };

            let will_retry = attempt < self.config.max_retries;
            self.record_failure(attempt, failure.telemetry(), will_retry);
            if !will_retry {
                return Ok(self.fail_closed(failure.reason(), attempt + 1));
            }

            let delay = self.backoff.delay(attempt, self.jitter.as_ref());
            self.telemetry
                .on_event(NegotiationEvent::BackoffScheduled { attempt, delay });
            tracing::debug!(
                target: "negotiation",
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "backoff_scheduled"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(self.fail_closed(cancelled_reason("during backoff"), attempt + 1));
                }
                _ = self.suspender.suspend(delay) => {}
            }
            attempt += 1;
        }
    }

    /// One transport call bound to the per-attempt deadline. When the deadline
    /// fires the in-flight future is dropped, which aborts the request.
    async fn send_once(&self, payload: &Value) -> Result<TransportResponse, TransportError> {
        let deadline = self.config.timeout();
        match tokio::time::timeout(deadline, self.transport.post_intent(&self.url, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(deadline)),
        }
    }

    async fn complete(
        &self,
        response: TransportResponse,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Decision {
        let decision = match decision_from_wire(&response.body) {
            Ok(decision) => decision,
            Err(err) => {
                self.record_failure(
                    attempt,
                    AttemptFailure::Status {
                        status: response.status,
                    },
                    false,
                );
                let reason = format!(
                    "{}: invalid decision body: {}",
                    upstream_error_reason(response.status, &response.status_text),
                    err
                );
                return self.fail_closed(reason, attempt + 1);
            }
        };

        if let Some(wait) = auto_wait(&decision) {
            self.telemetry.on_event(NegotiationEvent::AutoWaitStarted {
                intent_id: decision.intent_id().to_string(),
                wait,
            });
            tracing::info!(
                target: "negotiation",
                intent_id = %decision.intent_id(),
                wait_ms = wait.as_millis() as u64,
                "auto_wait_started"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.fail_closed(cancelled_reason("during wait"), attempt + 1);
                }
                _ = self.suspender.suspend(wait) => {}
            }
        }

        self.telemetry.on_event(NegotiationEvent::Decided {
            intent_id: decision.intent_id().to_string(),
            status: decision.status(),
            attempts: attempt + 1,
        });
        tracing::info!(
            target: "negotiation",
            intent_id = %decision.intent_id(),
            status = decision.status().as_str(),
            allowed = decision.allowed(),
            attempts = attempt + 1,
            "negotiation_decided"
        );
        decision
    }

    fn record_failure(&self, attempt: u32, failure: AttemptFailure, will_retry: bool) {
        tracing::debug!(
            target: "negotiation",
            attempt = attempt,
            failure = ?failure,
            will_retry = will_retry,
            "attempt_failed"
        );
        self.telemetry.on_event(NegotiationEvent::AttemptFailed {
            attempt,
            failure,
            will_retry,
        });
    }

    fn fail_closed(&self, reason: String, attempts: u32) -> Decision {
        tracing::warn!(
            target: "negotiation",
            reason = %reason,
            attempts = attempts,
            "negotiation_failed_closed"
        );
        self.telemetry.on_event(NegotiationEvent::FailedClosed {
            reason: reason.clone(),
            attempts,
        });
        Decision::fail_closed(reason)
    }
}

/// Server-directed throttle, honored only on an approval with modifications.
fn auto_wait(decision: &Decision) -> Option<Duration> {
    if decision.status() != DecisionStatus::ApproveWithModifications {
        return None;
    }
    let seconds = decision.wait_seconds()?;
    if !(seconds.is_finite() && seconds > 0.0) {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}
