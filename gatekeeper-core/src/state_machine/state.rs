use crate::ids::{RoleId, UserId};
use crate::review::{Decision, ReviewRequest};

/// Step of a decision that is currently being applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing in flight. The request is either pending or settled.
    #[default]
    Idle,
    /// Checking the requester is still a member of the guild.
    ResolvingMember { admin: UserId, decision: Decision },
    /// Approving: looking up the verified role by name.
    LookingUpRole { admin: UserId },
    /// Approving: the role grant has been issued.
    Granting { admin: UserId, role: RoleId },
    /// The verdict is recorded and the terminal card edit has been issued.
    Publishing { decision: Decision },
    /// The verdict is recorded but the card still shows its controls.
    /// Only the same decision may be applied to it again.
    Unpublished { decision: Decision },
}

impl Phase {
    /// Whether a decision is still being applied and may be abandoned.
    pub fn is_applying(&self) -> bool {
        matches!(
            self,
            Phase::ResolvingMember { .. } | Phase::LookingUpRole { .. } | Phase::Granting { .. }
        )
    }
}

/// A review request together with the decision step in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewMachine {
    pub request: ReviewRequest,
    pub phase: Phase,
}

impl ReviewMachine {
    pub fn new(request: ReviewRequest) -> Self {
        Self {
            request,
            phase: Phase::Idle,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.request.status().is_terminal()
    }

    pub fn in_flight(&self) -> bool {
        self.phase.is_applying() || matches!(self.phase, Phase::Publishing { .. })
    }
}
