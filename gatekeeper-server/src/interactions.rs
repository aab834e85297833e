//! Component interactions: the Approve and Deny buttons on review cards.
//!
//! Clicks arrive either over the gateway or, when an application public key is
//! configured, as signed HTTP requests to `/interactions`. Both paths end in
//! [`dispatch_component`].

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gatekeeper_core::state_machine::AdminReply;
use gatekeeper_core::{
    ApplicationId, ChannelId, ControlId, ControlIdError, CorrelationId, EventType, GuildId,
    InteractionId, MessageId, MessageRef, UserId,
};

use crate::decision::DecisionContext;
use crate::discord::{deferred_ephemeral_response, InteractionRef};
use crate::AppState;

pub const INTERACTION_PING: u8 = 1;
pub const INTERACTION_MESSAGE_COMPONENT: u8 = 3;

const SIGNATURE_HEADER: &str = "x-signature-ed25519";
const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

#[derive(Clone, Deserialize)]
pub struct Interaction {
    pub id: InteractionId,
    pub application_id: ApplicationId,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub token: String,
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    /// Present for clicks inside a guild.
    pub member: Option<InteractionMember>,
    /// Present for clicks in direct messages.
    pub user: Option<InteractionUser>,
    pub message: Option<InteractionMessage>,
    pub data: Option<ComponentData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionMember {
    pub user: InteractionUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionUser {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentData {
    #[serde(default)]
    pub custom_id: Option<String>,
}

impl Interaction {
    pub fn interaction_ref(&self) -> InteractionRef {
        InteractionRef {
            application: self.application_id,
            id: self.id,
            token: self.token.clone(),
        }
    }

    /// The user who clicked.
    pub fn actor(&self) -> Option<UserId> {
        self.member
            .as_ref()
            .map(|m| m.user.id)
            .or_else(|| self.user.as_ref().map(|u| u.id))
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.data.as_ref()?.custom_id.as_deref()
    }
}

/// Work out what a click asks for, or the reply explaining why it cannot run.
fn decision_context(
    interaction: &Interaction,
    admin_channel: ChannelId,
) -> Result<DecisionContext, AdminReply> {
    let custom_id = interaction.custom_id().ok_or(AdminReply::UnknownControl)?;
    let control = ControlId::parse(custom_id).map_err(|e| {
        match e {
            ControlIdError::Foreign => debug!("Ignoring foreign control {:?}", custom_id),
            _ => warn!("Malformed control id {:?}: {}", custom_id, e),
        }
        AdminReply::UnknownControl
    })?;

    let message = interaction
        .message
        .as_ref()
        .ok_or(AdminReply::NotificationGone)?;
    if message.channel_id != admin_channel {
        warn!(
            "Control clicked outside the admin channel (channel {})",
            message.channel_id
        );
        return Err(AdminReply::UnknownControl);
    }

    let (Some(guild), Some(admin)) = (interaction.guild_id, interaction.actor()) else {
        warn!("Interaction {} has no guild member", interaction.id);
        return Err(AdminReply::Failed);
    };

    Ok(DecisionContext {
        guild,
        admin,
        notification: MessageRef::new(message.channel_id, message.id),
        interaction: interaction.interaction_ref(),
        decision: control.decision,
    })
}

/// Handle an already-acknowledged component interaction.
///
/// Every path ends with an ephemeral reply to the clicking administrator.
pub async fn dispatch_component(state: &AppState, interaction: Interaction) {
    let reference = interaction.interaction_ref();
    let role = &state.config.verified_role_name;

    let ctx = match decision_context(&interaction, state.config.admin_channel_id) {
        Ok(ctx) => ctx,
        Err(reply) => {
            if let Err(e) = state.api.reply_ephemeral(&reference, &reply.text(role)).await {
                warn!("Failed to reply to interaction {}: {:#}", interaction.id, e);
            }
            return;
        }
    };

    info!(
        "{} requested {} on notification {}",
        ctx.admin, ctx.decision, ctx.notification.message
    );

    match state.decisions.process(&ctx).await {
        Ok(outcome) => debug!("Interaction {} finished: {:?}", interaction.id, outcome),
        Err(e) => {
            error!("Failed to process interaction {}: {:#}", interaction.id, e);
            let text = AdminReply::Failed.text(role);
            if let Err(e) = state.api.reply_ephemeral(&reference, &text).await {
                warn!("Failed to reply to interaction {}: {:#}", interaction.id, e);
            }
        }
    }
}

/// Check a Discord interaction signature: Ed25519 over timestamp followed by body.
pub fn verify_discord_signature(
    key: &VerifyingKey,
    timestamp: &str,
    body: &[u8],
    signature_hex: &str,
) -> bool {
    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let signature = match Signature::from_slice(&signature_bytes) {
        Ok(signature) => signature,
        Err(_) => return false,
    };

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    key.verify_strict(&message, &signature).is_ok()
}

async fn verify_interaction_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = state
        .config
        .discord_public_key
        .as_ref()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)
    };
    let signature = header(SIGNATURE_HEADER)?;
    let timestamp = header(TIMESTAMP_HEADER)?;

    if !verify_discord_signature(key, timestamp, &bytes, signature) {
        error!("Invalid interaction signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let correlation_id = CorrelationId(Uuid::new_v4().to_string());
    if let Some(ref logger) = state.recording_logger {
        let payload =
            serde_json::from_slice::<serde_json::Value>(&bytes).unwrap_or(serde_json::Value::Null);
        logger.record_inbound(
            &correlation_id,
            EventType::InteractionReceived,
            "interaction",
            &payload,
        );
    }

    let mut request = Request::from_parts(parts, axum::body::Body::from(bytes));
    request.extensions_mut().insert(correlation_id);

    Ok(next.run(request).await)
}

pub async fn interactions_handler(
    State(state): State<Arc<AppState>>,
    Json(interaction): Json<Interaction>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match interaction.kind {
        INTERACTION_PING => Ok(Json(serde_json::json!({ "type": INTERACTION_PING }))),
        INTERACTION_MESSAGE_COMPONENT => {
            // The HTTP response is the acknowledgement; the decision runs after it
            tokio::spawn(async move {
                dispatch_component(&state, interaction).await;
            });
            Ok(Json(deferred_ephemeral_response()))
        }
        other => {
            warn!("Unsupported interaction type {}", other);
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// Routes for HTTP interaction delivery. Empty when no public key is configured.
pub fn interactions_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    if middleware_state.config.discord_public_key.is_none() {
        return Router::new();
    }

    Router::new()
        .route("/interactions", post(interactions_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_interaction_signature,
        ))
}
