//! Whether a new release actions immediately or waits for an operator

use crate::service::Service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to run; the release counts as actioned straight away
    NoActions,
    /// Approve and run every action now
    AutoApprove,
    /// Keep `approved_version` unchanged until an operator approves or skips
    Hold,
}

pub struct Gate;

impl Gate {
    pub fn decide(service: &Service) -> Decision {
        if service.actions.is_empty() {
            Decision::NoActions
        } else if service.auto_approve {
            Decision::AutoApprove
        } else {
            Decision::Hold
        }
    }
}
