//! Outcome reporting capability
//!
//! The host application (GUI event log, CLI, test harness) supplies the
//! reporter; library code never talks to a dialog layer directly.

/// Kind of outcome being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Success,
    Command,
    Failure,
}

/// Capability for surfacing operation outcomes to the host.
pub trait EventReporter: Send + Sync {
    fn report(&self, outcome: EventOutcome, text: &str);
}

/// Default reporter that forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report(&self, outcome: EventOutcome, text: &str) {
        match outcome {
            EventOutcome::Success => tracing::info!("{text}"),
            EventOutcome::Command => tracing::debug!("{text}"),
            EventOutcome::Failure => tracing::error!("{text}"),
        }
    }
}
