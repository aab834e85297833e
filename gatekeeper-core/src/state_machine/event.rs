use crate::ids::{RoleId, UserId};
use crate::review::Decision;

/// Inputs to the decision state machine.
///
/// `DecisionRequested` comes from an administrator's click; the rest are
/// results reported back by the effect interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    DecisionRequested { admin: UserId, decision: Decision },
    MemberResolved,
    MemberMissing,
    RoleFound { role: RoleId },
    RoleMissing,
    RoleGranted,
    GrantForbidden,
    /// The terminal card edit went through.
    NotificationEdited,
    /// An effect that reports back could not be completed at all.
    EffectFailed { reason: String },
}

impl Event {
    /// Short description for log lines.
    pub fn log_summary(&self) -> String {
        match self {
            Event::DecisionRequested { admin, decision } => {
                format!("DecisionRequested({} by {})", decision, admin)
            }
            Event::MemberResolved => "MemberResolved".to_string(),
            Event::MemberMissing => "MemberMissing".to_string(),
            Event::RoleFound { role } => format!("RoleFound({})", role),
            Event::RoleMissing => "RoleMissing".to_string(),
            Event::RoleGranted => "RoleGranted".to_string(),
            Event::GrantForbidden => "GrantForbidden".to_string(),
            Event::NotificationEdited => "NotificationEdited".to_string(),
            Event::EffectFailed { reason } => format!("EffectFailed({})", reason),
        }
    }
}
