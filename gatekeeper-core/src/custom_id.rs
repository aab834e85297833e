//! Control ids attached to the approve/deny buttons.
//!
//! Nothing besides the rendered notification remembers a pending request, so
//! each button's `custom_id` carries the requester and handle. Any process,
//! including one started after the notification was posted, can act on a click
//! from the id alone.

use std::fmt;
use thiserror::Error;

use crate::handle::{parse_handle, Handle};
use crate::ids::UserId;
use crate::review::Decision;

/// Namespace prefix so foreign components are never mistaken for ours.
pub const CONTROL_PREFIX: &str = "gatekeeper";

/// Discord's limit on `custom_id` length.
pub const MAX_CUSTOM_ID_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlIdError {
    #[error("custom id does not belong to this bot")]
    Foreign,
    #[error("unknown action tag: {0}")]
    UnknownAction(String),
    #[error("invalid requester id: {0}")]
    InvalidRequester(String),
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

/// Decoded `gatekeeper:<action>:<user id>:<handle>` control id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlId {
    pub decision: Decision,
    pub requester: UserId,
    pub handle: Handle,
}

impl ControlId {
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn parse(custom_id: &str) -> Result<Self, ControlIdError> {
        let mut parts = custom_id.splitn(4, ':');

        if parts.next() != Some(CONTROL_PREFIX) {
            return Err(ControlIdError::Foreign);
        }

        let action = parts.next().unwrap_or_default();
        let decision = Decision::from_tag(action)
            .ok_or_else(|| ControlIdError::UnknownAction(action.to_string()))?;

        let requester = parts.next().unwrap_or_default();
        let requester = requester
            .parse::<UserId>()
            .map_err(|_| ControlIdError::InvalidRequester(requester.to_string()))?;

        let handle = parts.next().unwrap_or_default();
        let handle =
            parse_handle(handle).ok_or_else(|| ControlIdError::InvalidHandle(handle.to_string()))?;

        Ok(Self {
            decision,
            requester,
            handle,
        })
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            CONTROL_PREFIX,
            self.decision.tag(),
            self.requester,
            self.handle
        )
    }
}
