pub mod config;
pub mod decision;
pub mod discord;
pub mod gateway;
pub mod ingest;
pub mod interactions;
pub mod recording;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

pub use config::Config;
pub use decision::DecisionProcessor;
pub use discord::{DiscordApi, DiscordClient};
pub use ingest::IngestGateway;
pub use recording::RecordingLogger;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

pub fn get_bot_version() -> String {
    // Hash injected by the packaging build wins over the one `built` detected
    if let Some(git_hash) = option_env!("GATEKEEPER_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}

pub struct AppState {
    pub config: Config,
    pub api: Arc<dyn DiscordApi>,
    pub ingest: IngestGateway,
    pub decisions: DecisionProcessor,
    pub recording_logger: Option<RecordingLogger>,
}

impl AppState {
    pub fn new(
        config: Config,
        api: Arc<dyn DiscordApi>,
        recording_logger: Option<RecordingLogger>,
    ) -> Self {
        let ingest = IngestGateway::new(
            api.clone(),
            config.auth_channel_id,
            config.admin_channel_id,
        );
        let decisions = DecisionProcessor::new(api.clone(), config.verified_role_name.clone());

        Self {
            config,
            api,
            ingest,
            decisions,
            recording_logger,
        }
    }
}
