//! Discord REST API access.
//!
//! [`DiscordApi`] is the seam between the verification workflow and the
//! platform. [`DiscordClient`] implements it over HTTP; tests use the
//! in-memory fake in `crate::testing`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::{debug, error, info};

use gatekeeper_core::{
    ApplicationId, ChannelId, GuildId, InteractionId, MessageId, MessageRef, Notification,
    RoleId, UserId,
};

use crate::recording::{RecordingLogger, RecordingMiddleware};

/// Interaction callback type for a deferred reply.
const DEFERRED_CHANNEL_MESSAGE: u8 = 5;
/// Message flag that makes a reply visible only to the invoking user.
pub const EPHEMERAL_FLAG: u64 = 1 << 6;
/// JSON error code Discord returns when a user does not accept DMs.
const CANNOT_MESSAGE_USER: u64 = 50007;

/// Outcome of deleting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Forbidden,
    /// Someone else removed it first.
    AlreadyGone,
}

/// Outcome of a best-effort private message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The user has DMs closed or shares no server with the bot.
    Undeliverable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    Forbidden,
}

/// Handle for answering one interaction.
#[derive(Clone, PartialEq, Eq)]
pub struct InteractionRef {
    pub application: ApplicationId,
    pub id: InteractionId,
    pub token: String,
}

impl fmt::Debug for InteractionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionRef")
            .field("application", &self.application)
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Platform operations the verification workflow depends on.
#[async_trait]
pub trait DiscordApi: Send + Sync {
    /// Look up a channel the bot can see. None if it does not exist or is hidden.
    async fn find_channel(&self, channel: ChannelId) -> Result<Option<ChannelId>>;

    async fn send_notification(
        &self,
        channel: ChannelId,
        notification: &Notification,
    ) -> Result<MessageRef>;

    /// Read a notification back. None if the message was deleted.
    async fn fetch_notification(&self, message: &MessageRef) -> Result<Option<Notification>>;

    async fn edit_notification(&self, message: &MessageRef, notification: &Notification)
        -> Result<()>;

    async fn delete_message(&self, message: &MessageRef) -> Result<DeleteOutcome>;

    async fn send_private_message(&self, user: UserId, text: &str) -> Result<Delivery>;

    /// Confirm the user is (still) a member of the guild.
    async fn resolve_member(&self, guild: GuildId, user: UserId) -> Result<Option<UserId>>;

    async fn find_role_by_name(&self, guild: GuildId, name: &str) -> Result<Option<RoleId>>;

    async fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId)
        -> Result<GrantOutcome>;

    /// Defer the interaction with an ephemeral "thinking" reply.
    async fn acknowledge_interaction(&self, interaction: &InteractionRef) -> Result<()>;

    /// Fill in the deferred ephemeral reply.
    async fn reply_ephemeral(&self, interaction: &InteractionRef, text: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct DiscordClient {
    client: ClientWithMiddleware,
    token: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: MessageId,
    channel_id: ChannelId,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: ChannelId,
}

#[derive(Debug, Deserialize)]
struct RoleResponse {
    id: RoleId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberResponse {
    user: MemberUser,
}

#[derive(Debug, Deserialize)]
struct MemberUser {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: u64,
}

#[derive(Debug, Serialize)]
struct CreateDmRequest {
    recipient_id: UserId,
}

impl DiscordClient {
    pub fn new(token: String, api_base: String) -> Self {
        Self::new_with_recording(token, api_base, None)
    }

    pub fn new_with_recording(
        token: String,
        api_base: String,
        recording_logger: Option<RecordingLogger>,
    ) -> Self {
        Self {
            client: create_discord_client(recording_logger),
            token,
            api_base,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bot {}", self.token))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        self.authorized(self.client.get(self.url(path)))
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))
    }

    async fn send_message(&self, channel: ChannelId, body: &serde_json::Value) -> Result<MessageRef> {
        let path = format!("/channels/{}/messages", channel);
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .json(body)
            .send()
            .await
            .context("Failed to send create message request")?;

        let response = ensure_success(response, "create message").await?;
        let message: MessageResponse = response
            .json()
            .await
            .context("Failed to parse create message response")?;

        Ok(MessageRef::new(message.channel_id, message.id))
    }
}

/// Pass successful responses through, turn anything else into an error.
async fn ensure_success(response: reqwest::Response, operation: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response
        .text()
        .await
        .context("Failed to read error response body")?;
    error!("Discord {} failed: {} - {}", operation, status, error_text);
    Err(anyhow!(
        "Discord {} failed: {} - {}",
        operation,
        status,
        error_text
    ))
}

/// Classify a 403 from a DM call. Only "cannot send messages to this user"
/// (or a body without a code) means the user is unreachable.
async fn dm_refusal(response: reqwest::Response, user: UserId) -> Result<Delivery> {
    let code = response.json::<ErrorResponse>().await.map(|e| e.code).ok();
    debug!("DM to {} refused (code {:?})", user, code);
    match code {
        Some(CANNOT_MESSAGE_USER) | None => Ok(Delivery::Undeliverable),
        Some(other) => Err(anyhow!("Discord refused DM with unexpected code {}", other)),
    }
}

#[async_trait]
impl DiscordApi for DiscordClient {
    async fn find_channel(&self, channel: ChannelId) -> Result<Option<ChannelId>> {
        let response = self.get(&format!("/channels/{}", channel)).await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(None),
            _ => {
                let response = ensure_success(response, "get channel").await?;
                let found: ChannelResponse = response
                    .json()
                    .await
                    .context("Failed to parse channel response")?;
                Ok(Some(found.id))
            }
        }
    }

    async fn send_notification(
        &self,
        channel: ChannelId,
        notification: &Notification,
    ) -> Result<MessageRef> {
        let body = serde_json::to_value(notification).context("Failed to serialize notification")?;
        let message = self.send_message(channel, &body).await?;
        info!("Posted notification {} in channel {}", message.message, channel);
        Ok(message)
    }

    async fn fetch_notification(&self, message: &MessageRef) -> Result<Option<Notification>> {
        let response = self
            .get(&format!(
                "/channels/{}/messages/{}",
                message.channel, message.message
            ))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response, "get message").await?;
        let notification = response
            .json()
            .await
            .context("Failed to parse message response")?;
        Ok(Some(notification))
    }

    async fn edit_notification(
        &self,
        message: &MessageRef,
        notification: &Notification,
    ) -> Result<()> {
        let path = format!("/channels/{}/messages/{}", message.channel, message.message);
        let response = self
            .authorized(self.client.patch(self.url(&path)))
            .json(notification)
            .send()
            .await
            .context("Failed to send edit message request")?;

        ensure_success(response, "edit message").await?;
        info!("Edited notification {}", message.message);
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<DeleteOutcome> {
        let path = format!("/channels/{}/messages/{}", message.channel, message.message);
        let response = self
            .authorized(self.client.delete(self.url(&path)))
            .send()
            .await
            .context("Failed to send delete message request")?;

        match response.status() {
            StatusCode::FORBIDDEN => Ok(DeleteOutcome::Forbidden),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyGone),
            _ => {
                ensure_success(response, "delete message").await?;
                Ok(DeleteOutcome::Deleted)
            }
        }
    }

    async fn send_private_message(&self, user: UserId, text: &str) -> Result<Delivery> {
        let response = self
            .authorized(self.client.post(self.url("/users/@me/channels")))
            .json(&CreateDmRequest { recipient_id: user })
            .send()
            .await
            .context("Failed to send create DM request")?;

        if response.status() == StatusCode::FORBIDDEN {
            return dm_refusal(response, user).await;
        }

        let response = ensure_success(response, "create DM").await?;
        let dm: ChannelResponse = response
            .json()
            .await
            .context("Failed to parse DM channel response")?;

        let path = format!("/channels/{}/messages", dm.id);
        let response = self
            .authorized(self.client.post(self.url(&path)))
            .json(&json!({ "content": text }))
            .send()
            .await
            .context("Failed to send DM request")?;

        if response.status() == StatusCode::FORBIDDEN {
            return dm_refusal(response, user).await;
        }

        ensure_success(response, "send DM").await?;
        Ok(Delivery::Delivered)
    }

    async fn resolve_member(&self, guild: GuildId, user: UserId) -> Result<Option<UserId>> {
        let response = self
            .get(&format!("/guilds/{}/members/{}", guild, user))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = ensure_success(response, "get member").await?;
        let member: MemberResponse = response
            .json()
            .await
            .context("Failed to parse member response")?;
        Ok(Some(member.user.id))
    }

    async fn find_role_by_name(&self, guild: GuildId, name: &str) -> Result<Option<RoleId>> {
        let response = self.get(&format!("/guilds/{}/roles", guild)).await?;
        let response = ensure_success(response, "list roles").await?;
        let roles: Vec<RoleResponse> = response
            .json()
            .await
            .context("Failed to parse roles response")?;

        Ok(roles.into_iter().find(|r| r.name == name).map(|r| r.id))
    }

    async fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<GrantOutcome> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild, user, role);
        let response = self
            .authorized(self.client.put(self.url(&path)))
            .header("X-Audit-Log-Reason", "X account verification approved")
            .send()
            .await
            .context("Failed to send add role request")?;

        if response.status() == StatusCode::FORBIDDEN {
            return Ok(GrantOutcome::Forbidden);
        }

        ensure_success(response, "add role").await?;
        info!("Granted role {} to {} in guild {}", role, user, guild);
        Ok(GrantOutcome::Granted)
    }

    async fn acknowledge_interaction(&self, interaction: &InteractionRef) -> Result<()> {
        let path = format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        );
        let response = self
            .client
            .post(self.url(&path))
            .json(&deferred_ephemeral_response())
            .send()
            .await
            .context("Failed to send interaction callback")?;

        ensure_success(response, "interaction callback").await?;
        Ok(())
    }

    async fn reply_ephemeral(&self, interaction: &InteractionRef, text: &str) -> Result<()> {
        let path = format!(
            "/webhooks/{}/{}/messages/@original",
            interaction.application, interaction.token
        );
        let response = self
            .client
            .patch(self.url(&path))
            .json(&json!({ "content": text }))
            .send()
            .await
            .context("Failed to send interaction reply")?;

        ensure_success(response, "interaction reply").await?;
        Ok(())
    }
}

/// Interaction response that defers with an ephemeral placeholder.
pub fn deferred_ephemeral_response() -> serde_json::Value {
    json!({
        "type": DEFERRED_CHANNEL_MESSAGE,
        "data": { "flags": EPHEMERAL_FLAG }
    })
}

pub fn create_discord_client(recording_logger: Option<RecordingLogger>) -> ClientWithMiddleware {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(concat!(
            "DiscordBot (https://github.com/gatekeeper, ",
            env!("CARGO_PKG_VERSION"),
            ")"
        ))
        .build()
        .unwrap_or_default();

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger));
    }

    builder.build()
}
