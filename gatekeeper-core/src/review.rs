use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::custom_id::ControlId;
use crate::handle::Handle;
use crate::ids::UserId;

/// Lifecycle of a verification request.
///
/// A request starts `Pending` and moves to exactly one terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReviewStatus {
    #[default]
    Pending,
    Approved,
    Denied,
}

impl ReviewStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Approved => write!(f, "approved"),
            ReviewStatus::Denied => write!(f, "denied"),
        }
    }
}

/// An administrator's verdict, as carried by the approve/deny controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    /// Tag used inside control ids.
    pub fn tag(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Deny => "deny",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "approve" => Some(Decision::Approve),
            "deny" => Some(Decision::Deny),
            _ => None,
        }
    }

    /// Status a request ends in once this decision is applied.
    pub fn outcome(self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Deny => ReviewStatus::Denied,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Returned when a second decision is applied to a settled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("review request is already {0}")]
pub struct AlreadySettled(pub ReviewStatus);

/// One user's claim to own an X account, awaiting or carrying a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    requester: UserId,
    handle: Handle,
    status: ReviewStatus,
    decided_by: Option<UserId>,
}

impl ReviewRequest {
    pub fn new(requester: UserId, handle: Handle) -> Self {
        Self {
            requester,
            handle,
            status: ReviewStatus::Pending,
            decided_by: None,
        }
    }

    /// Rebuild a pending request from the identity a control carries.
    pub fn from_control(control: &ControlId) -> Self {
        Self::new(control.requester, control.handle.clone())
    }

    /// Rebuild a request from its review card, or `None` if the card is not ours.
    pub fn from_notification(notification: &crate::render::Notification) -> Option<Self> {
        crate::render::reconstruct(notification)
    }

    pub(crate) fn settled(
        requester: UserId,
        handle: Handle,
        status: ReviewStatus,
        decided_by: UserId,
    ) -> Self {
        Self {
            requester,
            handle,
            status,
            decided_by: Some(decided_by),
        }
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn status(&self) -> ReviewStatus {
        self.status
    }

    pub fn decided_by(&self) -> Option<UserId> {
        self.decided_by
    }

    /// The one mutation a request ever sees: Pending to a terminal status.
    pub fn settle(&mut self, admin: UserId, decision: Decision) -> Result<(), AlreadySettled> {
        if self.status.is_terminal() {
            return Err(AlreadySettled(self.status));
        }
        self.status = decision.outcome();
        self.decided_by = Some(admin);
        Ok(())
    }

    pub fn control_id(&self, decision: Decision) -> ControlId {
        ControlId {
            decision,
            requester: self.requester,
            handle: self.handle.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::parse_handle;

    fn request() -> ReviewRequest {
        ReviewRequest::new(UserId(100), parse_handle("elonmusk").unwrap())
    }

    #[test]
    fn test_new_request_is_pending() {
        let request = request();
        assert_eq!(request.status(), ReviewStatus::Pending);
        assert_eq!(request.decided_by(), None);
    }

    #[test]
    fn test_settle_keeps_identity() {
        let mut request = request();
        request.settle(UserId(7), Decision::Deny).unwrap();
        assert_eq!(request.requester(), UserId(100));
        assert_eq!(request.handle().as_str(), "elonmusk");
    }

    #[test]
    fn test_settle_sets_status_and_admin() {
        let mut request = request();
        request.settle(UserId(7), Decision::Approve).unwrap();
        assert_eq!(request.status(), ReviewStatus::Approved);
        assert_eq!(request.decided_by(), Some(UserId(7)));
    }

    #[test]
    fn test_second_settle_rejected() {
        let mut request = request();
        request.settle(UserId(7), Decision::Deny).unwrap();

        let err = request.settle(UserId(8), Decision::Approve).unwrap_err();
        assert_eq!(err, AlreadySettled(ReviewStatus::Denied));
        // First verdict is untouched
        assert_eq!(request.status(), ReviewStatus::Denied);
        assert_eq!(request.decided_by(), Some(UserId(7)));
    }

    #[test]
    fn test_decision_tags_round_trip() {
        for decision in [Decision::Approve, Decision::Deny] {
            assert_eq!(Decision::from_tag(decision.tag()), Some(decision));
        }
        assert_eq!(Decision::from_tag("maybe"), None);
    }
}
