//! Pure transition function for the decision state machine.

use super::effect::{AdminReply, Effect, LogLevel};
use super::event::Event;
use super::state::{Phase, ReviewMachine};
use crate::ids::UserId;
use crate::render::{outcome_message, render_terminal};
use crate::review::{Decision, ReviewRequest};

/// Result of a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionResult {
    pub state: ReviewMachine,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ReviewMachine, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }
}

/// Apply one event to a review request.
///
/// Failures while applying a decision (member gone, role missing, grant
/// forbidden) return the request to an idle pending state with an error reply,
/// so an administrator can retry once the cause is fixed. Reaching a verdict
/// settles the request and issues the terminal card edit. Only once the edit
/// lands are the administrator acknowledgement and the private message to the
/// requester sent. If the edit fails the request ends `Unpublished`, and the
/// caller must refuse any other decision on that card until it is retried.
pub fn transition(machine: ReviewMachine, event: Event) -> TransitionResult {
    let ReviewMachine { request, phase } = machine;

    match (phase, event) {
        (Phase::Idle, Event::DecisionRequested { admin, decision }) => {
            if request.status().is_terminal() {
                let message = format!(
                    "Ignoring {} from {} on request for @{}: already {}",
                    decision,
                    admin,
                    request.handle(),
                    request.status()
                );
                return TransitionResult::new(
                    ReviewMachine::new(request),
                    vec![
                        Effect::Log {
                            level: LogLevel::Info,
                            message,
                        },
                        Effect::ReplyEphemeral {
                            reply: AdminReply::AlreadyHandled,
                        },
                    ],
                );
            }
            let user = request.requester();
            TransitionResult::new(
                ReviewMachine {
                    request,
                    phase: Phase::ResolvingMember { admin, decision },
                },
                vec![Effect::ResolveMember { user }],
            )
        }

        (Phase::ResolvingMember { .. }, Event::MemberMissing) => {
            abort(request, AdminReply::MemberNotFound)
        }

        (
            Phase::ResolvingMember {
                admin,
                decision: Decision::Approve,
            },
            Event::MemberResolved,
        ) => TransitionResult::new(
            ReviewMachine {
                request,
                phase: Phase::LookingUpRole { admin },
            },
            vec![Effect::FindVerifiedRole],
        ),

        // Denial has no role side effect
        (
            Phase::ResolvingMember {
                admin,
                decision: Decision::Deny,
            },
            Event::MemberResolved,
        ) => settle(request, admin, Decision::Deny),

        (Phase::LookingUpRole { .. }, Event::RoleMissing) => {
            abort(request, AdminReply::RoleNotFound)
        }

        (Phase::LookingUpRole { admin }, Event::RoleFound { role }) => {
            let user = request.requester();
            TransitionResult::new(
                ReviewMachine {
                    request,
                    phase: Phase::Granting { admin, role },
                },
                vec![Effect::GrantRole { user, role }],
            )
        }

        (Phase::Granting { .. }, Event::GrantForbidden) => {
            abort(request, AdminReply::GrantForbidden)
        }

        (Phase::Granting { admin, .. }, Event::RoleGranted) => {
            settle(request, admin, Decision::Approve)
        }

        (Phase::Publishing { decision }, Event::NotificationEdited) => {
            let effects = announce(&request, decision);
            TransitionResult::new(ReviewMachine::new(request), effects)
        }

        (Phase::Publishing { decision }, Event::EffectFailed { reason }) => {
            let message = format!(
                "Request for @{} is {} but the card was not updated: {}",
                request.handle(),
                request.status(),
                reason
            );
            TransitionResult::new(
                ReviewMachine {
                    request,
                    phase: Phase::Unpublished { decision },
                },
                vec![
                    Effect::Log {
                        level: LogLevel::Error,
                        message,
                    },
                    Effect::ReplyEphemeral {
                        reply: AdminReply::CardNotUpdated { decision },
                    },
                ],
            )
        }

        (phase, Event::EffectFailed { reason }) if phase.is_applying() => TransitionResult::new(
            ReviewMachine::new(request),
            vec![
                Effect::Log {
                    level: LogLevel::Error,
                    message: format!("Decision aborted in {:?}: {}", phase, reason),
                },
                Effect::ReplyEphemeral {
                    reply: AdminReply::Failed,
                },
            ],
        ),

        (phase, event) => {
            let message = format!(
                "Ignoring {} in phase {:?} (status {})",
                event.log_summary(),
                phase,
                request.status()
            );
            TransitionResult::new(
                ReviewMachine { request, phase },
                vec![Effect::Log {
                    level: LogLevel::Warn,
                    message,
                }],
            )
        }
    }
}

fn abort(request: ReviewRequest, reply: AdminReply) -> TransitionResult {
    TransitionResult::new(
        ReviewMachine::new(request),
        vec![Effect::ReplyEphemeral { reply }],
    )
}

fn settle(mut request: ReviewRequest, admin: UserId, decision: Decision) -> TransitionResult {
    if request.settle(admin, decision).is_err() {
        return abort(request, AdminReply::AlreadyHandled);
    }

    match render_terminal(&request) {
        Some(view) => TransitionResult::new(
            ReviewMachine {
                request,
                phase: Phase::Publishing { decision },
            },
            vec![Effect::EditNotification { view }],
        ),
        None => {
            let effects = announce(&request, decision);
            TransitionResult::new(ReviewMachine::new(request), effects)
        }
    }
}

/// Acknowledge the acting administrator, then tell the requester.
fn announce(request: &ReviewRequest, decision: Decision) -> Vec<Effect> {
    vec![
        Effect::ReplyEphemeral {
            reply: AdminReply::Settled {
                decision,
                requester: request.requester(),
            },
        },
        Effect::NotifyRequester {
            user: request.requester(),
            text: outcome_message(decision, request.handle()),
        },
    ]
}
