pub mod cli;
pub mod config;
pub mod logging;
pub mod negotiation;

pub use negotiation::{
    Decision, DecisionStatus, Intent, Modifications, NegotiationClient, NegotiationError, Outcome,
    Urgency,
};
