//! Applying administrator decisions to review requests.
//!
//! Each click is serialised on the notification it targets. Under that lock
//! the notification is read back from Discord: a card that has lost its
//! controls was already decided, so a second click cannot grant twice. The
//! request itself is rebuilt from the card, which keeps the bot stateless
//! across restarts.
//!
//! The one exception is a verdict whose card edit failed. The card still
//! shows its controls, so the verdict is remembered in memory and only the
//! same decision is accepted on that card until the edit goes through.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use gatekeeper_core::state_machine::{
    transition, AdminReply, Effect, Event, LogLevel, Phase, ReviewMachine, TransitionResult,
};
use gatekeeper_core::{Decision, GuildId, MessageRef, ReviewRequest, UserId};

use crate::discord::{Delivery, DiscordApi, GrantOutcome, InteractionRef};

/// Everything known about one administrator click.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub guild: GuildId,
    pub admin: UserId,
    pub notification: MessageRef,
    pub interaction: InteractionRef,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The decision landed and the card now shows the verdict.
    Settled(ReviewRequest),
    /// The decision could not be applied; the request stays open.
    StillPending(ReviewRequest),
    /// The decision landed but the card still shows its controls.
    Unpublished(ReviewRequest),
    AlreadyHandled,
    NotificationGone,
}

pub struct DecisionProcessor {
    api: Arc<dyn DiscordApi>,
    verified_role: String,
    /// Per-notification locks.
    locks: RwLock<HashMap<MessageRef, Arc<Mutex<()>>>>,
    /// Verdicts whose card edit failed, by card.
    unpublished: Mutex<HashMap<MessageRef, Decision>>,
}

impl DecisionProcessor {
    pub fn new(api: Arc<dyn DiscordApi>, verified_role: String) -> Self {
        Self {
            api,
            verified_role,
            locks: RwLock::new(HashMap::new()),
            unpublished: Mutex::new(HashMap::new()),
        }
    }

    async fn get_or_create_lock(&self, key: &MessageRef) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(key) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(*key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the table entry once nobody else holds or waits on it.
    async fn release_lock(&self, key: &MessageRef, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.write().await;
        // One reference in the table, one held here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Apply one administrator decision.
    ///
    /// The administrator always receives an ephemeral reply when this returns
    /// `Ok`. On `Err` the caller is responsible for telling them.
    pub async fn process(&self, ctx: &DecisionContext) -> Result<DecisionOutcome> {
        let lock = self.get_or_create_lock(&ctx.notification).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.process_locked(ctx).await
        };
        self.release_lock(&ctx.notification, lock).await;
        outcome
    }

    async fn process_locked(&self, ctx: &DecisionContext) -> Result<DecisionOutcome> {
        let Some(notification) = self.api.fetch_notification(&ctx.notification).await? else {
            info!(
                "Notification {} is gone, ignoring {} by {}",
                ctx.notification.message, ctx.decision, ctx.admin
            );
            self.unpublished.lock().await.remove(&ctx.notification);
            self.reply(ctx, &AdminReply::NotificationGone).await;
            return Ok(DecisionOutcome::NotificationGone);
        };

        if !notification.has_controls() {
            info!(
                "Notification {} already decided, ignoring {} by {}",
                ctx.notification.message, ctx.decision, ctx.admin
            );
            self.unpublished.lock().await.remove(&ctx.notification);
            self.reply(ctx, &AdminReply::AlreadyHandled).await;
            return Ok(DecisionOutcome::AlreadyHandled);
        }

        let recorded = self.unpublished.lock().await.get(&ctx.notification).copied();
        if let Some(recorded) = recorded {
            if recorded != ctx.decision {
                info!(
                    "Notification {} already has an unpublished {}, ignoring {} by {}",
                    ctx.notification.message, recorded, ctx.decision, ctx.admin
                );
                self.reply(ctx, &AdminReply::AlreadyHandled).await;
                return Ok(DecisionOutcome::AlreadyHandled);
            }
        }

        let Some(request) = ReviewRequest::from_notification(&notification) else {
            self.reply(ctx, &AdminReply::UnknownControl).await;
            return Err(anyhow!(
                "Notification {} does not carry a review request",
                ctx.notification.message
            ));
        };

        let machine = self
            .run(
                ctx,
                ReviewMachine::new(request),
                Event::DecisionRequested {
                    admin: ctx.admin,
                    decision: ctx.decision,
                },
            )
            .await;

        let ReviewMachine { request, phase } = machine;
        match phase {
            Phase::Unpublished { decision } => {
                warn!(
                    "{} {} for {} but notification {} still shows controls",
                    ctx.admin,
                    request.status(),
                    request.requester(),
                    ctx.notification.message
                );
                self.unpublished
                    .lock()
                    .await
                    .insert(ctx.notification, decision);
                Ok(DecisionOutcome::Unpublished(request))
            }
            _ if request.status().is_terminal() => {
                self.unpublished.lock().await.remove(&ctx.notification);
                info!(
                    "{} {} for {} ({})",
                    ctx.admin,
                    request.status(),
                    request.requester(),
                    request.handle()
                );
                Ok(DecisionOutcome::Settled(request))
            }
            _ => Ok(DecisionOutcome::StillPending(request)),
        }
    }

    /// Drive the state machine until no effect reports back.
    async fn run(&self, ctx: &DecisionContext, machine: ReviewMachine, event: Event) -> ReviewMachine {
        let mut current = machine;
        let mut events_to_process = vec![event];

        while let Some(event) = events_to_process.pop() {
            debug!(
                "Processing {} for notification {}",
                event.log_summary(),
                ctx.notification.message
            );

            let TransitionResult { state, effects } = transition(current, event);
            current = state;

            let mut result_events = Vec::new();
            for effect in effects {
                if let Some(result) = self.execute_effect(ctx, effect).await {
                    result_events.push(result);
                }
            }

            // Reverse so results are handled in the order effects ran
            events_to_process.extend(result_events.into_iter().rev());
        }

        current
    }

    async fn execute_effect(&self, ctx: &DecisionContext, effect: Effect) -> Option<Event> {
        match effect {
            Effect::ResolveMember { user } => {
                Some(match self.api.resolve_member(ctx.guild, user).await {
                    Ok(Some(_)) => Event::MemberResolved,
                    Ok(None) => Event::MemberMissing,
                    Err(e) => failed(e),
                })
            }

            Effect::FindVerifiedRole => Some(
                match self
                    .api
                    .find_role_by_name(ctx.guild, &self.verified_role)
                    .await
                {
                    Ok(Some(role)) => Event::RoleFound { role },
                    Ok(None) => {
                        error!(
                            "Role \"{}\" not found in guild {}",
                            self.verified_role, ctx.guild
                        );
                        Event::RoleMissing
                    }
                    Err(e) => failed(e),
                },
            ),

            Effect::GrantRole { user, role } => {
                Some(match self.api.grant_role(ctx.guild, user, role).await {
                    Ok(GrantOutcome::Granted) => Event::RoleGranted,
                    Ok(GrantOutcome::Forbidden) => {
                        error!("Missing permission to grant role {} to {}", role, user);
                        Event::GrantForbidden
                    }
                    Err(e) => failed(e),
                })
            }

            Effect::EditNotification { view } => Some(
                match self.api.edit_notification(&ctx.notification, &view).await {
                    Ok(()) => Event::NotificationEdited,
                    Err(e) => {
                        error!(
                            "Failed to update notification {}: {:#}",
                            ctx.notification.message, e
                        );
                        failed(e)
                    }
                },
            ),

            Effect::ReplyEphemeral { reply } => {
                self.reply(ctx, &reply).await;
                None
            }

            Effect::NotifyRequester { user, text } => {
                match self.api.send_private_message(user, &text).await {
                    Ok(Delivery::Delivered) => {}
                    Ok(Delivery::Undeliverable) => {
                        info!("{} does not accept DMs, outcome not delivered", user)
                    }
                    Err(e) => warn!("Failed to DM outcome to {}: {:#}", user, e),
                }
                None
            }

            Effect::Log { level, message } => {
                match level {
                    LogLevel::Debug => debug!("{}", message),
                    LogLevel::Info => info!("{}", message),
                    LogLevel::Warn => warn!("{}", message),
                    LogLevel::Error => error!("{}", message),
                }
                None
            }
        }
    }

    async fn reply(&self, ctx: &DecisionContext, reply: &AdminReply) {
        let text = reply.text(&self.verified_role);
        if let Err(e) = self.api.reply_ephemeral(&ctx.interaction, &text).await {
            warn!("Failed to reply to {}: {:#}", ctx.admin, e);
        }
    }
}

fn failed(error: anyhow::Error) -> Event {
    Event::EffectFailed {
        reason: format!("{:#}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDiscord;
    use gatekeeper_core::render::{render_pending, APPROVED_COLOR, DENIED_COLOR};
    use gatekeeper_core::{
        parse_handle, ApplicationId, ChannelId, InteractionId, ReviewStatus,
    };

    const GUILD: GuildId = GuildId(1);
    const ADMINS: ChannelId = ChannelId(20);
    const ADMIN: UserId = UserId(7);
    const OTHER_ADMIN: UserId = UserId(8);
    const USER: UserId = UserId(100);
    const ROLE_NAME: &str = "X Verified";

    struct Fixture {
        fake: Arc<FakeDiscord>,
        processor: Arc<DecisionProcessor>,
        card: MessageRef,
    }

    async fn fixture() -> Fixture {
        let fake = Arc::new(FakeDiscord::new());
        fake.add_channel(ADMINS);
        fake.add_member(USER);
        let request = ReviewRequest::new(USER, parse_handle("elonmusk").unwrap());
        let card = fake
            .send_notification(ADMINS, &render_pending(&request))
            .await
            .unwrap();
        let processor = Arc::new(DecisionProcessor::new(fake.clone(), ROLE_NAME.to_string()));
        Fixture {
            fake,
            processor,
            card,
        }
    }

    fn click(f: &Fixture, admin: UserId, decision: Decision, interaction: u64) -> DecisionContext {
        DecisionContext {
            guild: GUILD,
            admin,
            notification: f.card,
            interaction: InteractionRef {
                application: ApplicationId(2),
                id: InteractionId(interaction),
                token: format!("token-{}", interaction),
            },
            decision,
        }
    }

    #[tokio::test]
    async fn test_approve_grants_role_and_settles_card() {
        let f = fixture().await;
        let role = f.fake.add_role(ROLE_NAME);

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        let DecisionOutcome::Settled(request) = outcome else {
            panic!("expected settled, got {:?}", outcome);
        };
        assert_eq!(request.status(), ReviewStatus::Approved);
        assert_eq!(request.decided_by(), Some(ADMIN));
        assert_eq!(f.fake.roles_of(USER), vec![role]);

        let card = f.fake.notification(&f.card).unwrap();
        assert!(!card.has_controls());
        assert_eq!(card.embeds[0].color, Some(APPROVED_COLOR));

        assert_eq!(f.fake.replies_to(InteractionId(1)), vec!["Verified <@100>."]);
        let dms = f.fake.dms_to(USER);
        assert_eq!(dms.len(), 1);
        assert!(dms[0].contains("elonmusk"));
    }

    #[tokio::test]
    async fn test_deny_never_grants() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Deny, 1))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DecisionOutcome::Settled(ref r) if r.status() == ReviewStatus::Denied
        ));
        assert_eq!(f.fake.grant_calls(), 0);
        assert!(f.fake.roles_of(USER).is_empty());

        let card = f.fake.notification(&f.card).unwrap();
        assert_eq!(card.embeds[0].color, Some(DENIED_COLOR));
        assert_eq!(
            f.fake.replies_to(InteractionId(1)),
            vec!["Denied verification for <@100>."]
        );
    }

    #[tokio::test]
    async fn test_concurrent_approvals_grant_once() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);

        let first = click(&f, ADMIN, Decision::Approve, 1);
        let second = click(&f, OTHER_ADMIN, Decision::Approve, 2);
        let (a, b) = tokio::join!(f.processor.process(&first), f.processor.process(&second));

        let outcomes = [a.unwrap(), b.unwrap()];
        let settled = outcomes
            .iter()
            .filter(|o| matches!(o, DecisionOutcome::Settled(_)))
            .count();
        let rejected = outcomes
            .iter()
            .filter(|o| **o == DecisionOutcome::AlreadyHandled)
            .count();

        assert_eq!(settled, 1);
        assert_eq!(rejected, 1);
        assert_eq!(f.fake.grant_calls(), 1);
        assert_eq!(f.fake.edit_calls(), 1);
        assert_eq!(f.fake.dms_to(USER).len(), 1);
    }

    #[tokio::test]
    async fn test_approve_and_deny_race_has_one_verdict() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);

        let approve = click(&f, ADMIN, Decision::Approve, 1);
        let deny = click(&f, OTHER_ADMIN, Decision::Deny, 2);
        let (a, b) = tokio::join!(f.processor.process(&approve), f.processor.process(&deny));

        // Whichever click takes the lock first wins
        let (winner, loser) = match (a.unwrap(), b.unwrap()) {
            (DecisionOutcome::Settled(r), DecisionOutcome::AlreadyHandled) => (r, InteractionId(2)),
            (DecisionOutcome::AlreadyHandled, DecisionOutcome::Settled(r)) => (r, InteractionId(1)),
            other => panic!("expected one verdict, got {:?}", other),
        };
        assert!(winner.status().is_terminal());
        assert_eq!(
            f.fake.replies_to(loser),
            vec!["This request has already been handled."]
        );
        assert_eq!(f.fake.edit_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_role_leaves_request_pending() {
        let f = fixture().await;

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert!(matches!(outcome, DecisionOutcome::StillPending(_)));
        assert_eq!(f.fake.grant_calls(), 0);
        assert!(f.fake.notification(&f.card).unwrap().has_controls());
        assert_eq!(
            f.fake.replies_to(InteractionId(1)),
            vec!["Error: the \"X Verified\" role does not exist."]
        );
        assert!(f.fake.dms_to(USER).is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_role_is_created() {
        let f = fixture().await;

        f.processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();
        f.fake.add_role(ROLE_NAME);
        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 2))
            .await
            .unwrap();

        assert!(matches!(outcome, DecisionOutcome::Settled(_)));
        assert_eq!(f.fake.grant_calls(), 1);
    }

    #[tokio::test]
    async fn test_departed_member_leaves_request_pending() {
        let fake = Arc::new(FakeDiscord::new());
        fake.add_channel(ADMINS);
        fake.add_role(ROLE_NAME);
        let request = ReviewRequest::new(USER, parse_handle("jack").unwrap());
        let card = fake
            .send_notification(ADMINS, &render_pending(&request))
            .await
            .unwrap();
        let f = Fixture {
            processor: Arc::new(DecisionProcessor::new(fake.clone(), ROLE_NAME.to_string())),
            fake,
            card,
        };

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Deny, 1))
            .await
            .unwrap();

        assert!(matches!(outcome, DecisionOutcome::StillPending(_)));
        assert!(f.fake.notification(&f.card).unwrap().has_controls());
        assert_eq!(
            f.fake.replies_to(InteractionId(1)),
            vec!["Could not find the requesting member in this server."]
        );
    }

    #[tokio::test]
    async fn test_forbidden_grant_leaves_request_pending() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);
        f.fake.forbid_grants();

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert!(matches!(outcome, DecisionOutcome::StillPending(_)));
        assert!(f.fake.notification(&f.card).unwrap().has_controls());
        assert_eq!(
            f.fake.replies_to(InteractionId(1)),
            vec!["Error: the bot does not have permission to assign roles."]
        );
    }

    #[tokio::test]
    async fn test_closed_dms_do_not_undo_approval() {
        let f = fixture().await;
        let role = f.fake.add_role(ROLE_NAME);
        f.fake.close_dms(USER);

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert!(matches!(outcome, DecisionOutcome::Settled(_)));
        assert_eq!(f.fake.roles_of(USER), vec![role]);
        assert_eq!(f.fake.replies_to(InteractionId(1)), vec!["Verified <@100>."]);
    }

    #[tokio::test]
    async fn test_failed_card_edit_only_accepts_same_decision() {
        let f = fixture().await;
        let role = f.fake.add_role(ROLE_NAME);
        f.fake.fail_edits(true);

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DecisionOutcome::Unpublished(ref r) if r.status() == ReviewStatus::Approved
        ));
        assert!(f.fake.notification(&f.card).unwrap().has_controls());
        assert_eq!(
            f.fake.replies_to(InteractionId(1)),
            vec![
                "The request was approved but the review card could not be updated. \
                 Click Approve again to finish."
            ]
        );
        assert!(f.fake.dms_to(USER).is_empty());

        // The card is still live, but a denial must not land on top
        f.fake.fail_edits(false);
        let outcome = f
            .processor
            .process(&click(&f, OTHER_ADMIN, Decision::Deny, 2))
            .await
            .unwrap();

        assert_eq!(outcome, DecisionOutcome::AlreadyHandled);
        assert_eq!(
            f.fake.replies_to(InteractionId(2)),
            vec!["This request has already been handled."]
        );
        assert!(f.fake.notification(&f.card).unwrap().has_controls());
        assert_eq!(f.fake.roles_of(USER), vec![role]);
        assert!(f.fake.dms_to(USER).is_empty());

        let outcome = f
            .processor
            .process(&click(&f, OTHER_ADMIN, Decision::Approve, 3))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DecisionOutcome::Settled(ref r) if r.status() == ReviewStatus::Approved
        ));
        let card = f.fake.notification(&f.card).unwrap();
        assert!(!card.has_controls());
        assert_eq!(card.embeds[0].color, Some(APPROVED_COLOR));
        assert_eq!(f.fake.roles_of(USER), vec![role]);
        assert_eq!(f.fake.replies_to(InteractionId(3)), vec!["Verified <@100>."]);
        assert_eq!(f.fake.dms_to(USER).len(), 1);
        assert!(f.processor.unpublished.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_notification() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);
        f.fake.remove_message(&f.card);

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert_eq!(outcome, DecisionOutcome::NotificationGone);
        assert_eq!(f.fake.grant_calls(), 0);
        assert_eq!(
            f.fake.replies_to(InteractionId(1)),
            vec!["This request no longer exists."]
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_replies_and_stays_pending() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);
        f.fake.fail_member_lookups();

        let outcome = f
            .processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert!(matches!(outcome, DecisionOutcome::StillPending(_)));
        let replies = f.fake.replies_to(InteractionId(1));
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("Something went wrong"));
    }

    #[tokio::test]
    async fn test_lock_table_is_emptied() {
        let f = fixture().await;
        f.fake.add_role(ROLE_NAME);

        f.processor
            .process(&click(&f, ADMIN, Decision::Approve, 1))
            .await
            .unwrap();

        assert!(f.processor.locks.read().await.is_empty());
    }
}
