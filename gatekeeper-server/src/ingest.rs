//! Intake of handle submissions from the public verification channel.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use gatekeeper_core::render::submission_received_message;
use gatekeeper_core::{
    parse_handle, render_pending, ChannelId, MessageId, MessageRef, ReviewRequest, UserId,
};

use crate::discord::{DeleteOutcome, Delivery, DiscordApi};

/// A message posted somewhere the bot can read.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel: ChannelId,
    pub author: UserId,
    pub author_is_bot: bool,
    pub content: String,
}

impl InboundMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(self.channel, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Wrong channel, bot author or not shaped like a handle.
    Ignored,
    /// The admin channel could not be found; nothing was sent.
    AdminChannelMissing,
    Submitted {
        request: ReviewRequest,
        notification: MessageRef,
    },
}

pub struct IngestGateway {
    api: Arc<dyn DiscordApi>,
    submission_channel: ChannelId,
    admin_channel: ChannelId,
}

impl IngestGateway {
    pub fn new(
        api: Arc<dyn DiscordApi>,
        submission_channel: ChannelId,
        admin_channel: ChannelId,
    ) -> Self {
        Self {
            api,
            submission_channel,
            admin_channel,
        }
    }

    /// Turn a handle posted in the submission channel into a review request.
    ///
    /// Anything that is not a handle is left alone so the channel can still be
    /// used for conversation. Once the request reaches the admin channel, the
    /// acknowledgement DM and the deletion of the original message are both
    /// best effort and never undo the submission.
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<IngestOutcome> {
        if message.channel != self.submission_channel || message.author_is_bot {
            return Ok(IngestOutcome::Ignored);
        }

        let Some(handle) = parse_handle(&message.content) else {
            debug!("Message {} is not a handle, ignoring", message.id);
            return Ok(IngestOutcome::Ignored);
        };

        let Some(admin_channel) = self.api.find_channel(self.admin_channel).await? else {
            error!(
                "Admin channel ({}) not found, dropping submission from {}",
                self.admin_channel, message.author
            );
            return Ok(IngestOutcome::AdminChannelMissing);
        };

        let request = ReviewRequest::new(message.author, handle);
        let notification = self
            .api
            .send_notification(admin_channel, &render_pending(&request))
            .await
            .context("Failed to send review request to admin channel")?;

        info!(
            "Forwarded verification request for {} from {}",
            request.handle(),
            request.requester()
        );

        match self
            .api
            .send_private_message(message.author, &submission_received_message(request.handle()))
            .await
        {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::Undeliverable) => {
                debug!("{} does not accept DMs, skipping receipt", message.author)
            }
            Err(e) => warn!("Failed to send receipt DM to {}: {:#}", message.author, e),
        }

        match self.api.delete_message(&message.message_ref()).await {
            Ok(DeleteOutcome::Deleted) | Ok(DeleteOutcome::AlreadyGone) => {}
            Ok(DeleteOutcome::Forbidden) => error!(
                "Missing permission to delete messages in channel {}",
                message.channel
            ),
            Err(e) => error!("Failed to delete submission {}: {:#}", message.id, e),
        }

        Ok(IngestOutcome::Submitted {
            request,
            notification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDiscord;

    const SUBMISSIONS: ChannelId = ChannelId(10);
    const ADMINS: ChannelId = ChannelId(20);
    const USER: UserId = UserId(100);

    fn setup() -> (Arc<FakeDiscord>, IngestGateway) {
        let fake = Arc::new(FakeDiscord::new());
        fake.add_channel(SUBMISSIONS);
        fake.add_channel(ADMINS);
        let gateway = IngestGateway::new(fake.clone(), SUBMISSIONS, ADMINS);
        (fake, gateway)
    }

    fn post(fake: &FakeDiscord, channel: ChannelId, content: &str) -> InboundMessage {
        let id = fake.post_user_message(channel);
        InboundMessage {
            id,
            channel,
            author: USER,
            author_is_bot: false,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_handle_submission_reaches_admins() {
        let (fake, gateway) = setup();
        let message = post(&fake, SUBMISSIONS, "elonmusk");

        let outcome = gateway.handle_message(&message).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Submitted { .. }));

        let notifications = fake.notifications_in(ADMINS);
        assert_eq!(notifications.len(), 1);
        let rendered = serde_json::to_string(&notifications[0]).unwrap();
        assert!(rendered.contains("elonmusk"));
        assert!(rendered.contains("https://twitter.com/elonmusk"));
        assert!(notifications[0].has_controls());

        assert!(!fake.message_exists(&message.message_ref()));
        assert_eq!(fake.dms_to(USER).len(), 1);
    }

    #[tokio::test]
    async fn test_non_handle_is_left_alone() {
        let (fake, gateway) = setup();
        let message = post(&fake, SUBMISSIONS, "this is not a handle");

        let outcome = gateway.handle_message(&message).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert!(fake.notifications_in(ADMINS).is_empty());
        assert!(fake.message_exists(&message.message_ref()));
        assert!(fake.dms_to(USER).is_empty());
    }

    #[tokio::test]
    async fn test_other_channels_ignored() {
        let (fake, gateway) = setup();
        let message = post(&fake, ChannelId(99), "elonmusk");

        let outcome = gateway.handle_message(&message).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert!(fake.notifications_in(ADMINS).is_empty());
    }

    #[tokio::test]
    async fn test_bot_authors_ignored() {
        let (fake, gateway) = setup();
        let mut message = post(&fake, SUBMISSIONS, "elonmusk");
        message.author_is_bot = true;

        let outcome = gateway.handle_message(&message).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Ignored);
        assert!(fake.message_exists(&message.message_ref()));
    }

    #[tokio::test]
    async fn test_missing_admin_channel_aborts() {
        let fake = Arc::new(FakeDiscord::new());
        fake.add_channel(SUBMISSIONS);
        let gateway = IngestGateway::new(fake.clone(), SUBMISSIONS, ADMINS);
        let message = post(&fake, SUBMISSIONS, "@jack");

        let outcome = gateway.handle_message(&message).await.unwrap();
        assert_eq!(outcome, IngestOutcome::AdminChannelMissing);
        assert!(fake.message_exists(&message.message_ref()));
        assert!(fake.dms_to(USER).is_empty());
    }

    #[tokio::test]
    async fn test_closed_dms_and_forbidden_delete_do_not_fail() {
        let (fake, gateway) = setup();
        fake.close_dms(USER);
        fake.forbid_deletes();
        let message = post(&fake, SUBMISSIONS, "jack");

        let outcome = gateway.handle_message(&message).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Submitted { .. }));
        assert_eq!(fake.notifications_in(ADMINS).len(), 1);
        // Deletion was refused, so the message stays
        assert!(fake.message_exists(&message.message_ref()));
    }

    #[tokio::test]
    async fn test_already_deleted_submission_is_fine() {
        let (fake, gateway) = setup();
        let message = InboundMessage {
            id: MessageId(12345),
            channel: SUBMISSIONS,
            author: USER,
            author_is_bot: false,
            content: "jack".to_string(),
        };

        // The fake never saw this message, so deleting it finds nothing
        let outcome = gateway.handle_message(&message).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Submitted { .. }));

        let notifications = fake.notifications_in(ADMINS);
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].has_controls());
        let dms = fake.dms_to(USER);
        assert_eq!(dms.len(), 1);
        assert!(dms[0].contains("jack"));
    }
}
