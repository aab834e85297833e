use anyhow::{anyhow, Context, Result};
use ed25519_dalek::VerifyingKey;
use std::env;

use gatekeeper_core::ChannelId;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    /// Name of the role granted on approval.
    pub verified_role_name: String,
    /// Channel where administrators receive review requests.
    pub admin_channel_id: ChannelId,
    /// Channel where users post their handles.
    pub auth_channel_id: ChannelId,
    pub port: u16,
    /// Application public key. When set, `/interactions` accepts signed
    /// interaction webhooks in addition to gateway delivery.
    pub discord_public_key: Option<VerifyingKey>,
    pub recording_enabled: bool,
    pub recording_log_path: String,
    pub api_base: String,
    pub gateway_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = required(&lookup, "DISCORD_BOT_TOKEN")?;
        let verified_role_name = required(&lookup, "VERIFIED_ROLE_NAME")?;

        let admin_channel_id = required(&lookup, "ADMIN_CHANNEL_ID")?
            .trim()
            .parse::<ChannelId>()
            .context("ADMIN_CHANNEL_ID must be a valid channel id")?;

        let auth_channel_id = required(&lookup, "AUTH_CHANNEL_ID")?
            .trim()
            .parse::<ChannelId>()
            .context("AUTH_CHANNEL_ID must be a valid channel id")?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let discord_public_key = parse_public_key(non_empty(lookup("DISCORD_PUBLIC_KEY")))
            .context("DISCORD_PUBLIC_KEY must be a hex-encoded Ed25519 public key")?;

        let recording_enabled = lookup("RECORDING_ENABLED")
            .unwrap_or_else(|| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let recording_log_path =
            lookup("RECORDING_LOG_PATH").unwrap_or_else(|| "recordings.jsonl".to_string());

        let api_base = non_empty(lookup("DISCORD_API_BASE"))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let gateway_url = non_empty(lookup("DISCORD_GATEWAY_URL"))
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        Ok(Config {
            bot_token,
            verified_role_name,
            admin_channel_id,
            auth_channel_id,
            port,
            discord_public_key,
            recording_enabled,
            recording_log_path,
            api_base,
            gateway_url,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    non_empty(lookup(key)).with_context(|| format!("{} environment variable is required", key))
}

/// Treat empty or whitespace-only values as unset.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_public_key(value: Option<String>) -> Result<Option<VerifyingKey>> {
    let Some(value) = value else {
        return Ok(None);
    };

    let bytes = hex::decode(value.trim()).context("public key is not valid hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("public key must be 32 bytes, got {}", b.len()))?;
    let key = VerifyingKey::from_bytes(&bytes).context("public key is not a valid curve point")?;

    Ok(Some(key))
}
