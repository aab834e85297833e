//! Parsing of claimed X (Twitter) handles posted in the submission channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest handle X allows.
pub const MAX_HANDLE_LEN: usize = 15;

const PROFILE_URL_BASE: &str = "https://twitter.com/";

/// A syntactically valid handle, without the leading `@`.
///
/// Only the shape is checked; nothing proves the submitter owns the account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Public profile link for administrators to inspect.
    pub fn profile_url(&self) -> String {
        format!("{}{}", PROFILE_URL_BASE, self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a raw submission as a handle.
///
/// Surrounding whitespace and one leading `@` are stripped; what remains must be
/// 1 to 15 characters of `[A-Za-z0-9_]`. Case is preserved. Returns None for
/// anything else, and the caller is expected to ignore such messages silently
/// so the channel stays usable for ordinary conversation.
pub fn parse_handle(raw: &str) -> Option<Handle> {
    let trimmed = raw.trim();
    let candidate = trimmed.strip_prefix('@').unwrap_or(trimmed);

    if candidate.is_empty() || candidate.len() > MAX_HANDLE_LEN {
        return None;
    }

    if !candidate
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return None;
    }

    Some(Handle(candidate.to_string()))
}
