//! In-memory stand-in for Discord, used by the workflow tests.
//!
//! Models a single guild. Lookups yield to the scheduler before answering so
//! concurrent tasks interleave the way they would against the real API.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use gatekeeper_core::{
    ChannelId, GuildId, InteractionId, MessageId, MessageRef, Notification, RoleId, UserId,
};

use crate::discord::{DeleteOutcome, Delivery, DiscordApi, GrantOutcome, InteractionRef};

#[derive(Default)]
struct FakeState {
    next_id: u64,
    channels: HashSet<ChannelId>,
    /// Every message by id. User messages carry no notification.
    messages: BTreeMap<MessageId, (ChannelId, Option<Notification>)>,
    dms: HashMap<UserId, Vec<String>>,
    closed_dms: HashSet<UserId>,
    members: HashSet<UserId>,
    roles: HashMap<String, RoleId>,
    member_roles: HashMap<UserId, Vec<RoleId>>,
    grant_calls: usize,
    edit_calls: usize,
    forbid_deletes: bool,
    forbid_grants: bool,
    fail_member_lookups: bool,
    fail_edits: bool,
    acknowledged: Vec<InteractionId>,
    replies: HashMap<InteractionId, Vec<String>>,
}

impl FakeState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }
}

#[derive(Default)]
pub struct FakeDiscord {
    state: Mutex<FakeState>,
}

impl FakeDiscord {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_channel(&self, channel: ChannelId) {
        self.with(|s| s.channels.insert(channel));
    }

    pub fn add_member(&self, user: UserId) {
        self.with(|s| s.members.insert(user));
    }

    pub fn add_role(&self, name: &str) -> RoleId {
        self.with(|s| {
            let role = RoleId(s.allocate());
            s.roles.insert(name.to_string(), role);
            role
        })
    }

    pub fn close_dms(&self, user: UserId) {
        self.with(|s| s.closed_dms.insert(user));
    }

    pub fn forbid_deletes(&self) {
        self.with(|s| s.forbid_deletes = true);
    }

    pub fn forbid_grants(&self) {
        self.with(|s| s.forbid_grants = true);
    }

    pub fn fail_member_lookups(&self) {
        self.with(|s| s.fail_member_lookups = true);
    }

    pub fn fail_edits(&self, failing: bool) {
        self.with(|s| s.fail_edits = failing);
    }

    /// Post an ordinary user message and return its id.
    pub fn post_user_message(&self, channel: ChannelId) -> MessageId {
        self.with(|s| {
            let id = MessageId(s.allocate());
            s.messages.insert(id, (channel, None));
            id
        })
    }

    /// Remove a message as if someone deleted it by hand.
    pub fn remove_message(&self, message: &MessageRef) {
        self.with(|s| s.messages.remove(&message.message));
    }

    pub fn message_exists(&self, message: &MessageRef) -> bool {
        self.with(|s| {
            s.messages
                .get(&message.message)
                .is_some_and(|(channel, _)| *channel == message.channel)
        })
    }

    pub fn notification(&self, message: &MessageRef) -> Option<Notification> {
        self.with(|s| s.messages.get(&message.message).and_then(|(_, n)| n.clone()))
    }

    /// Notifications in a channel, oldest first.
    pub fn notifications_in(&self, channel: ChannelId) -> Vec<Notification> {
        self.with(|s| {
            s.messages
                .values()
                .filter(|(c, _)| *c == channel)
                .filter_map(|(_, n)| n.clone())
                .collect()
        })
    }

    pub fn dms_to(&self, user: UserId) -> Vec<String> {
        self.with(|s| s.dms.get(&user).cloned().unwrap_or_default())
    }

    pub fn roles_of(&self, user: UserId) -> Vec<RoleId> {
        self.with(|s| s.member_roles.get(&user).cloned().unwrap_or_default())
    }

    pub fn grant_calls(&self) -> usize {
        self.with(|s| s.grant_calls)
    }

    pub fn edit_calls(&self) -> usize {
        self.with(|s| s.edit_calls)
    }

    pub fn acknowledged(&self) -> Vec<InteractionId> {
        self.with(|s| s.acknowledged.clone())
    }

    pub fn replies_to(&self, interaction: InteractionId) -> Vec<String> {
        self.with(|s| s.replies.get(&interaction).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DiscordApi for FakeDiscord {
    async fn find_channel(&self, channel: ChannelId) -> Result<Option<ChannelId>> {
        Ok(self.with(|s| s.channels.contains(&channel).then_some(channel)))
    }

    async fn send_notification(
        &self,
        channel: ChannelId,
        notification: &Notification,
    ) -> Result<MessageRef> {
        self.with(|s| {
            if !s.channels.contains(&channel) {
                return Err(anyhow!("Unknown channel {}", channel));
            }
            let id = MessageId(s.allocate());
            s.messages.insert(id, (channel, Some(notification.clone())));
            Ok(MessageRef::new(channel, id))
        })
    }

    async fn fetch_notification(&self, message: &MessageRef) -> Result<Option<Notification>> {
        tokio::task::yield_now().await;
        Ok(self.notification(message))
    }

    async fn edit_notification(
        &self,
        message: &MessageRef,
        notification: &Notification,
    ) -> Result<()> {
        self.with(|s| {
            s.edit_calls += 1;
            if s.fail_edits {
                return Err(anyhow!("Discord edit message failed: 503 Service Unavailable"));
            }
            match s.messages.get_mut(&message.message) {
                Some((_, stored)) => {
                    *stored = Some(notification.clone());
                    Ok(())
                }
                None => Err(anyhow!("Unknown message {}", message.message)),
            }
        })
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<DeleteOutcome> {
        Ok(self.with(|s| {
            if s.forbid_deletes {
                DeleteOutcome::Forbidden
            } else if s.messages.remove(&message.message).is_some() {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::AlreadyGone
            }
        }))
    }

    async fn send_private_message(&self, user: UserId, text: &str) -> Result<Delivery> {
        Ok(self.with(|s| {
            if s.closed_dms.contains(&user) {
                return Delivery::Undeliverable;
            }
            s.dms.entry(user).or_default().push(text.to_string());
            Delivery::Delivered
        }))
    }

    async fn resolve_member(&self, _guild: GuildId, user: UserId) -> Result<Option<UserId>> {
        tokio::task::yield_now().await;
        self.with(|s| {
            if s.fail_member_lookups {
                return Err(anyhow!("Discord get member failed: 500 Internal Server Error"));
            }
            Ok(s.members.contains(&user).then_some(user))
        })
    }

    async fn find_role_by_name(&self, _guild: GuildId, name: &str) -> Result<Option<RoleId>> {
        Ok(self.with(|s| s.roles.get(name).copied()))
    }

    async fn grant_role(
        &self,
        _guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<GrantOutcome> {
        tokio::task::yield_now().await;
        Ok(self.with(|s| {
            s.grant_calls += 1;
            if s.forbid_grants {
                return GrantOutcome::Forbidden;
            }
            let roles = s.member_roles.entry(user).or_default();
            if !roles.contains(&role) {
                roles.push(role);
            }
            GrantOutcome::Granted
        }))
    }

    async fn acknowledge_interaction(&self, interaction: &InteractionRef) -> Result<()> {
        self.with(|s| s.acknowledged.push(interaction.id));
        Ok(())
    }

    async fn reply_ephemeral(&self, interaction: &InteractionRef, text: &str) -> Result<()> {
        self.with(|s| {
            s.replies
                .entry(interaction.id)
                .or_default()
                .push(text.to_string())
        });
        Ok(())
    }
}

/// Application state wired to a fake. Submissions go to channel 10 and
/// review cards to channel 20.
pub fn test_state(
    api: std::sync::Arc<FakeDiscord>,
    public_key: Option<ed25519_dalek::VerifyingKey>,
) -> crate::AppState {
    let config = crate::Config {
        bot_token: "test-token".to_string(),
        verified_role_name: "X Verified".to_string(),
        admin_channel_id: ChannelId(20),
        auth_channel_id: ChannelId(10),
        port: 0,
        discord_public_key: public_key,
        recording_enabled: false,
        recording_log_path: "recordings.jsonl".to_string(),
        api_base: crate::config::DEFAULT_API_BASE.to_string(),
        gateway_url: crate::config::DEFAULT_GATEWAY_URL.to_string(),
    };
    crate::AppState::new(config, api, None)
}
