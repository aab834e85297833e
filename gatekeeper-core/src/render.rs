//! Rendering of review requests as admin-channel notifications.
//!
//! A [`Notification`] mirrors the subset of a Discord message body the bot
//! uses: embeds plus component rows. The same type is sent, edited and read
//! back, so [`reconstruct`] can recover a request from a fetched message.

use serde::{Deserialize, Serialize};

use crate::handle::{parse_handle, Handle};
use crate::ids::UserId;
use crate::review::{Decision, ReviewRequest, ReviewStatus};

pub const PENDING_COLOR: u32 = 0x3498DB;
pub const APPROVED_COLOR: u32 = 0x2ECC71;
pub const DENIED_COLOR: u32 = 0xE74C3C;

pub const REQUEST_TITLE: &str = "Verification request";
pub const REQUEST_DESCRIPTION: &str =
    "The following user has requested verification of their X account.";
pub const REQUESTER_FIELD: &str = "Requester";
pub const HANDLE_FIELD: &str = "X (Twitter) handle";

pub const COMPONENT_ACTION_ROW: u8 = 1;
pub const COMPONENT_BUTTON: u8 = 2;
pub const BUTTON_STYLE_SUCCESS: u8 = 3;
pub const BUTTON_STYLE_DANGER: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Always serialized, so an edit with no rows clears existing buttons.
    #[serde(default)]
    pub components: Vec<ActionRow>,
}

impl Notification {
    /// Every interactive control across all rows.
    pub fn controls(&self) -> impl Iterator<Item = &Button> {
        self.components.iter().flat_map(|row| row.components.iter())
    }

    pub fn has_controls(&self) -> bool {
        self.controls().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub components: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: u8,
    pub style: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
}

/// Card shown to administrators while a request awaits a decision.
pub fn render_pending(request: &ReviewRequest) -> Notification {
    let buttons = vec![
        Button {
            kind: COMPONENT_BUTTON,
            style: BUTTON_STYLE_SUCCESS,
            label: Some("Approve".to_string()),
            custom_id: Some(request.control_id(Decision::Approve).encode()),
        },
        Button {
            kind: COMPONENT_BUTTON,
            style: BUTTON_STYLE_DANGER,
            label: Some("Deny".to_string()),
            custom_id: Some(request.control_id(Decision::Deny).encode()),
        },
    ];

    Notification {
        embeds: vec![Embed {
            title: Some(REQUEST_TITLE.to_string()),
            description: Some(REQUEST_DESCRIPTION.to_string()),
            color: Some(PENDING_COLOR),
            fields: request_fields(request),
        }],
        components: vec![ActionRow {
            kind: COMPONENT_ACTION_ROW,
            components: buttons,
        }],
    }
}

/// Card that replaces the pending one once a decision lands.
///
/// Returns None while the request is still pending. The result has no
/// component rows, which is what stops a second decision from the same card.
pub fn render_terminal(request: &ReviewRequest) -> Option<Notification> {
    let admin = request.decided_by()?;
    let color = match request.status() {
        ReviewStatus::Pending => return None,
        ReviewStatus::Approved => APPROVED_COLOR,
        ReviewStatus::Denied => DENIED_COLOR,
    };

    Some(Notification {
        embeds: vec![Embed {
            title: Some(REQUEST_TITLE.to_string()),
            description: status_line(request.status(), admin),
            color: Some(color),
            fields: request_fields(request),
        }],
        components: Vec::new(),
    })
}

fn request_fields(request: &ReviewRequest) -> Vec<EmbedField> {
    vec![
        EmbedField {
            name: REQUESTER_FIELD.to_string(),
            value: request.requester().mention(),
            inline: false,
        },
        EmbedField {
            name: HANDLE_FIELD.to_string(),
            value: format!("[{}]({})", request.handle(), request.handle().profile_url()),
            inline: false,
        },
    ]
}

/// Description line of a settled card.
pub fn status_line(status: ReviewStatus, admin: UserId) -> Option<String> {
    match status {
        ReviewStatus::Pending => None,
        ReviewStatus::Approved => Some(format!(
            "✅ **Approved** - handled by {}.",
            admin.mention()
        )),
        ReviewStatus::Denied => Some(format!("❌ **Denied** - handled by {}.", admin.mention())),
    }
}

/// Private message confirming a submission reached the administrators.
pub fn submission_received_message(handle: &Handle) -> String {
    format!(
        "Your verification request for X account `{}` has been sent. \
         Please wait for an administrator to review it.",
        handle
    )
}

/// Private message telling the requester how their request ended.
pub fn outcome_message(decision: Decision, handle: &Handle) -> String {
    match decision {
        Decision::Approve => format!("Your X account (`{}`) has been verified!", handle),
        Decision::Deny => format!(
            "Sorry, verification of your X account (`{}`) was denied.",
            handle
        ),
    }
}

/// Recover a request from a notification as read back from the channel.
///
/// A card that still has controls is pending, and its identity comes from the
/// first control id. A card without controls is settled; the requester, handle,
/// outcome and deciding admin are read from its fields, colour and status line.
pub fn reconstruct(notification: &Notification) -> Option<ReviewRequest> {
    if let Some(custom_id) = notification.controls().find_map(|b| b.custom_id.as_deref()) {
        let control = crate::custom_id::ControlId::parse(custom_id).ok()?;
        return Some(ReviewRequest::from_control(&control));
    }

    let embed = notification.embeds.first()?;
    let requester = parse_mention(embed.field(REQUESTER_FIELD)?)?;
    let handle = parse_handle_link(embed.field(HANDLE_FIELD)?)?;
    let status = match embed.color? {
        APPROVED_COLOR => ReviewStatus::Approved,
        DENIED_COLOR => ReviewStatus::Denied,
        _ => return None,
    };
    let admin = parse_mention(embed.description.as_deref()?)?;

    Some(ReviewRequest::settled(requester, handle, status, admin))
}

fn parse_mention(text: &str) -> Option<UserId> {
    let start = text.find("<@")? + 2;
    let rest = &text[start..];
    let rest = rest.strip_prefix('!').unwrap_or(rest);
    let end = rest.find('>')?;
    rest[..end].parse().ok()
}

fn parse_handle_link(text: &str) -> Option<Handle> {
    let inner = text.strip_prefix('[')?;
    let end = inner.find(']')?;
    parse_handle(&inner[..end])
}
