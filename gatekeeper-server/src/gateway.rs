//! Discord gateway client.
//!
//! Keeps one websocket session alive, answers heartbeats and routes the
//! dispatches the bot cares about. Sessions are never resumed: a dropped
//! connection identifies afresh, which is enough for a bot without
//! in-memory request state.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gatekeeper_core::{ChannelId, CorrelationId, EventType, MessageId, UserId};

use crate::ingest::InboundMessage;
use crate::interactions::{dispatch_component, Interaction, INTERACTION_MESSAGE_COMPONENT};
use crate::AppState;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const INTENT_GUILDS: u64 = 1 << 0;
const INTENT_GUILD_MEMBERS: u64 = 1 << 1;
const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

pub const INTENTS: u64 =
    INTENT_GUILDS | INTENT_GUILD_MEMBERS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
struct Ready {
    user: ReadyUser,
}

#[derive(Debug, Deserialize)]
struct ReadyUser {
    id: UserId,
    username: String,
}

#[derive(Debug, Deserialize)]
struct MessageCreate {
    id: MessageId,
    channel_id: ChannelId,
    author: Author,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Author {
    id: UserId,
    #[serde(default)]
    bot: bool,
}

impl From<MessageCreate> for InboundMessage {
    fn from(message: MessageCreate) -> Self {
        InboundMessage {
            id: message.id,
            channel: message.channel_id,
            author: message.author.id,
            author_is_bot: message.author.bot,
            content: message.content,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Discord asked for a new session or the connection dropped.
    Reconnect,
    /// Reconnecting would fail the same way.
    Fatal(String),
}

pub fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "gatekeeper",
                "device": "gatekeeper"
            }
        }
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": sequence })
}

/// Run the gateway connection until a fatal close.
pub async fn run_gateway(state: Arc<AppState>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match connect_once(&state).await {
            Ok(SessionEnd::Reconnect) => {
                info!("Gateway session ended, reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Ok(SessionEnd::Fatal(reason)) => {
                error!("Gateway closed permanently: {}", reason);
                return;
            }
            Err(e) => {
                error!("Gateway connection failed: {:#}", e);
            }
        }

        sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn connect_once(state: &Arc<AppState>) -> Result<SessionEnd> {
    let (socket, _) = connect_async(state.config.gateway_url.as_str())
        .await
        .context("Failed to connect to gateway")?;
    let (mut sink, mut stream) = socket.split();

    let hello = match next_frame(&mut stream).await? {
        Frame::Payload(payload) if payload.op == OP_HELLO => payload,
        Frame::Payload(payload) => bail!("Expected Hello, got op {}", payload.op),
        Frame::Closed(end) => return Ok(end),
    };
    let Hello { heartbeat_interval } =
        serde_json::from_value(hello.d).context("Failed to parse Hello")?;
    let period = Duration::from_millis(heartbeat_interval);

    sink.send(Message::Text(
        identify_payload(&state.config.bot_token).to_string(),
    ))
    .await
    .context("Failed to send Identify")?;

    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut sequence: Option<u64> = None;
    let mut awaiting_ack = false;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    warn!("Heartbeat not acknowledged, dropping session");
                    return Ok(SessionEnd::Reconnect);
                }
                sink.send(Message::Text(heartbeat_payload(sequence).to_string()))
                    .await
                    .context("Failed to send heartbeat")?;
                awaiting_ack = true;
            }
            frame = next_frame(&mut stream) => {
                let payload = match frame? {
                    Frame::Payload(payload) => payload,
                    Frame::Closed(end) => return Ok(end),
                };
                if payload.s.is_some() {
                    sequence = payload.s;
                }

                match payload.op {
                    OP_DISPATCH => {
                        if let Some(event) = payload.t.as_deref() {
                            route_dispatch(state, event, payload.d);
                        }
                    }
                    OP_HEARTBEAT => {
                        sink.send(Message::Text(heartbeat_payload(sequence).to_string()))
                            .await
                            .context("Failed to send requested heartbeat")?;
                    }
                    OP_HEARTBEAT_ACK => awaiting_ack = false,
                    OP_RECONNECT => return Ok(SessionEnd::Reconnect),
                    OP_INVALID_SESSION => {
                        warn!("Gateway invalidated the session");
                        return Ok(SessionEnd::Reconnect);
                    }
                    other => debug!("Ignoring gateway op {}", other),
                }
            }
        }
    }
}

enum Frame {
    Payload(GatewayPayload),
    Closed(SessionEnd),
}

/// Read until the next JSON payload or the end of the session.
async fn next_frame<S>(stream: &mut S) -> Result<Frame>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message.context("Failed to read from gateway")? {
            Message::Text(text) => {
                let payload =
                    serde_json::from_str(&text).context("Failed to parse gateway payload")?;
                return Ok(Frame::Payload(payload));
            }
            Message::Close(frame) => return Ok(Frame::Closed(close_outcome(frame))),
            // Pings are answered by tungstenite itself
            _ => {}
        }
    }

    Ok(Frame::Closed(SessionEnd::Reconnect))
}

fn close_outcome(frame: Option<CloseFrame<'_>>) -> SessionEnd {
    let Some(frame) = frame else {
        return SessionEnd::Reconnect;
    };
    let code = u16::from(frame.code);
    if FATAL_CLOSE_CODES.contains(&code) {
        SessionEnd::Fatal(format!("close code {}: {}", code, frame.reason))
    } else {
        info!("Gateway closed with code {}", code);
        SessionEnd::Reconnect
    }
}

/// Hand a dispatch to the workflow. Returns the spawned task, if any.
pub(crate) fn route_dispatch(
    state: &Arc<AppState>,
    event: &str,
    data: Value,
) -> Option<JoinHandle<()>> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    match event {
        "READY" => {
            match serde_json::from_value::<Ready>(data) {
                Ok(ready) => info!(
                    "Connected to gateway as {} ({}), submissions in {}, reviews in {}",
                    ready.user.username,
                    ready.user.id,
                    state.config.auth_channel_id,
                    state.config.admin_channel_id
                ),
                Err(e) => warn!("Failed to parse READY: {}", e),
            }
            None
        }

        "MESSAGE_CREATE" => {
            let message: InboundMessage = match serde_json::from_value::<MessageCreate>(data) {
                Ok(message) => message.into(),
                Err(e) => {
                    warn!("Failed to parse MESSAGE_CREATE: {}", e);
                    return None;
                }
            };
            if message.channel != state.config.auth_channel_id {
                return None;
            }
            record(state, &correlation_id, event, &message_summary(&message));

            let state = state.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = state.ingest.handle_message(&message).await {
                    error!("Failed to handle submission {}: {:#}", message.id, e);
                }
            }))
        }

        "INTERACTION_CREATE" => {
            record(state, &correlation_id, event, &data);
            let interaction: Interaction = match serde_json::from_value(data) {
                Ok(interaction) => interaction,
                Err(e) => {
                    warn!("Failed to parse INTERACTION_CREATE: {}", e);
                    return None;
                }
            };
            if interaction.kind != INTERACTION_MESSAGE_COMPONENT {
                debug!("Ignoring interaction of type {}", interaction.kind);
                return None;
            }

            let state = state.clone();
            Some(tokio::spawn(async move {
                // Discord expects an answer within three seconds
                if let Err(e) = state
                    .api
                    .acknowledge_interaction(&interaction.interaction_ref())
                    .await
                {
                    error!("Failed to acknowledge interaction {}: {:#}", interaction.id, e);
                    return;
                }
                dispatch_component(&state, interaction).await;
            }))
        }

        _ => None,
    }
}

fn record(state: &AppState, correlation_id: &CorrelationId, event: &str, data: &Value) {
    if let Some(ref logger) = state.recording_logger {
        logger.record_inbound(correlation_id, EventType::GatewayDispatch, event, data);
    }
}

fn message_summary(message: &InboundMessage) -> Value {
    json!({
        "id": message.id,
        "channel_id": message.channel,
        "author_id": message.author,
        "bot": message.author_is_bot,
        "content": message.content,
    })
}
