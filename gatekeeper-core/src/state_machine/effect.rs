//! Effects (side effects as data).
//!
//! The transition function only describes what should happen; the server's
//! interpreter performs it. Lookups, the grant and the card edit report back
//! with an [`Event`](super::Event), the rest are fire-and-forget.

use crate::ids::{RoleId, UserId};
use crate::render::Notification;
use crate::review::Decision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch the requester's guild membership.
    ResolveMember { user: UserId },

    /// Look up the configured verified role by name.
    FindVerifiedRole,

    /// Assign the verified role to the requester.
    GrantRole { user: UserId, role: RoleId },

    /// Replace the admin-channel notification in place.
    EditNotification { view: Notification },

    /// Answer the acting administrator privately.
    ReplyEphemeral { reply: AdminReply },

    /// Best-effort private message to the requester.
    NotifyRequester { user: UserId, text: String },

    Log { level: LogLevel, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Ephemeral replies shown to the administrator who clicked a control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminReply {
    /// The decision was applied.
    Settled { decision: Decision, requester: UserId },
    MemberNotFound,
    RoleNotFound,
    GrantForbidden,
    /// Someone else already decided this request.
    AlreadyHandled,
    /// The notification was deleted before the click was processed.
    NotificationGone,
    /// The verdict landed but the card could not be updated.
    CardNotUpdated { decision: Decision },
    /// The control id could not be decoded.
    UnknownControl,
    Failed,
}

impl AdminReply {
    /// Message text. `role_name` is the configured verified role.
    pub fn text(&self, role_name: &str) -> String {
        match self {
            AdminReply::Settled {
                decision: Decision::Approve,
                requester,
            } => format!("Verified {}.", requester.mention()),
            AdminReply::Settled {
                decision: Decision::Deny,
                requester,
            } => format!("Denied verification for {}.", requester.mention()),
            AdminReply::MemberNotFound => {
                "Could not find the requesting member in this server.".to_string()
            }
            AdminReply::RoleNotFound => format!("Error: the \"{}\" role does not exist.", role_name),
            AdminReply::GrantForbidden => {
                "Error: the bot does not have permission to assign roles.".to_string()
            }
            AdminReply::AlreadyHandled => "This request has already been handled.".to_string(),
            AdminReply::NotificationGone => "This request no longer exists.".to_string(),
            AdminReply::CardNotUpdated { decision } => format!(
                "The request was {} but the review card could not be updated. Click {} again to finish.",
                decision.outcome(),
                match decision {
                    Decision::Approve => "Approve",
                    Decision::Deny => "Deny",
                }
            ),
            AdminReply::UnknownControl => "This control is not recognised.".to_string(),
            AdminReply::Failed => {
                "Something went wrong while processing this request. Please try again.".to_string()
            }
        }
    }

    /// Whether the reply reports a problem rather than a completed decision.
    pub fn is_error(&self) -> bool {
        !matches!(self, AdminReply::Settled { .. })
    }
}
