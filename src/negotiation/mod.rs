pub mod backoff;
pub mod client;
pub mod error;
pub mod suspend;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod wire;

pub use client::NegotiationClient;
pub use error::NegotiationError;
pub use types::{Decision, DecisionStatus, Intent, Modifications, Outcome, Urgency};
