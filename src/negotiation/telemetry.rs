use std::time::Duration;

use crate::negotiation::{error::TransportErrorKind, types::DecisionStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    Status { status: u16 },
    Transport { kind: TransportErrorKind },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationEvent {
    AttemptStarted {
        attempt: u32,
    },
    AttemptFailed {
        attempt: u32,
        failure: AttemptFailure,
        will_retry: bool,
    },
    BackoffScheduled {
        attempt: u32,
        delay: Duration,
    },
    AutoWaitStarted {
        intent_id: String,
        wait: Duration,
    },
    Decided {
        intent_id: String,
        status: DecisionStatus,
        attempts: u32,
    },
    FailedClosed {
        reason: String,
        attempts: u32,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn on_event(&self, event: NegotiationEvent);
}

#[derive(Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_event(&self, _event: NegotiationEvent) {}
}
