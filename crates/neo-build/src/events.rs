//! Events published by the orchestrator

use crate::aggregator::SettledPass;
use crate::target::PassComplete;

/// Build progress, observable through `Orchestrator::subscribe`
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// One target finished a pass
    PassComplete(PassComplete),
    /// Every target finished the pass; downstream actions were dispatched
    PassSettled(SettledPass),
    /// A shutdown was requested and external processes were told to stop
    ShutdownRequested,
}

impl BuildEvent {
    /// Short name of the event type, for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            BuildEvent::PassComplete(_) => "pass_complete",
            BuildEvent::PassSettled(_) => "pass_settled",
            BuildEvent::ShutdownRequested => "shutdown_requested",
        }
    }
}
