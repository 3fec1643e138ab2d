//! Applies events to persisted thread chats.
//!
//! No lock is ever taken on a thread. A transition is computed from the status
//! that was read and written back with a conditional update on that same
//! status; when several processes race on one chat, the first valid write
//! commits and the rest observe `applied: false`.

use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thread_lifecycle_protocol::{ThreadEvent, ThreadStatus};
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, Result};
use crate::guard::panic_message;
use crate::machine;
use crate::observe::Notifier;
use crate::store::{StatusSwap, ThreadStore};
use crate::types::{ThreadChat, ThreadChatUpdate, ThreadUpdate, TransitionOutcome};

/// One event to apply to one chat, with the field updates that should land
/// only if the status change commits.
#[derive(Debug, Clone)]
pub struct TransitionRequest<'a> {
    pub thread_id: &'a str,
    pub chat_id: &'a str,
    pub user_id: &'a str,
    pub event: ThreadEvent,
    /// Upstream reset time, used when entering a rate-limit queue.
    pub reattempt_queue_at: Option<DateTime<Utc>>,
    pub thread_update: Option<ThreadUpdate>,
    pub chat_update: Option<ThreadChatUpdate>,
    pub mark_as_unread: bool,
}

impl<'a> TransitionRequest<'a> {
    pub fn new(thread_id: &'a str, chat_id: &'a str, user_id: &'a str, event: ThreadEvent) -> Self {
        Self {
            thread_id,
            chat_id,
            user_id,
            event,
            reattempt_queue_at: None,
            thread_update: None,
            chat_update: None,
            mark_as_unread: false,
        }
    }

    pub fn reattempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.reattempt_queue_at = Some(at);
        self
    }

    pub fn with_thread_update(mut self, update: ThreadUpdate) -> Self {
        self.thread_update = Some(update);
        self
    }

    pub fn with_chat_update(mut self, update: ThreadChatUpdate) -> Self {
        self.chat_update = Some(update);
        self
    }

    pub fn mark_as_unread(mut self) -> Self {
        self.mark_as_unread = true;
        self
    }
}

#[derive(Clone)]
pub struct TransitionCoordinator {
    store: Arc<dyn ThreadStore>,
    notifier: Arc<dyn Notifier>,
    default_reattempt_delay: chrono::Duration,
}

impl TransitionCoordinator {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        notifier: Arc<dyn Notifier>,
        default_reattempt_delay: chrono::Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            default_reattempt_delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    pub fn apply_transition(&self, request: TransitionRequest<'_>) -> Result<TransitionOutcome> {
        let TransitionRequest {
            thread_id,
            chat_id,
            user_id,
            event,
            ..
        } = request;

        let chat = self
            .store
            .get_thread_chat(thread_id, chat_id, user_id)?
            .ok_or_else(|| LifecycleError::ThreadChatNotFound {
                thread_id: thread_id.to_string(),
                chat_id: chat_id.to_string(),
            })?;

        let from = chat.status;
        let to = match machine::transition(from, event) {
            Some(to) => to,
            None => {
                debug!(
                    thread_id = %thread_id,
                    chat_id = %chat_id,
                    status = %from,
                    event = %event,
                    "Ignoring event with no transition"
                );
                return Ok(TransitionOutcome::skipped());
            }
        };

        let swap = StatusSwap {
            from,
            to,
            reattempt_queue_at: self.reattempt_queue_at(&chat, to, request.reattempt_queue_at),
        };
        if !self
            .store
            .atomic_update_status(thread_id, chat_id, user_id, swap)?
        {
            debug!(
                thread_id = %thread_id,
                chat_id = %chat_id,
                from = %from,
                event = %event,
                "Status moved underneath transition; skipping"
            );
            return Ok(TransitionOutcome::skipped());
        }

        info!(
            thread_id = %thread_id,
            chat_id = %chat_id,
            from = %from,
            to = %to,
            event = %event,
            "Thread chat transitioned"
        );

        if let Some(update) = request.thread_update.as_ref().filter(|u| !u.is_empty()) {
            self.store.update_thread(thread_id, user_id, update)?;
        }

        let mut chat_update = request.chat_update.unwrap_or_default();
        let status_changed = from != to;
        if status_changed && request.mark_as_unread {
            chat_update.unread = Some(true);
        }
        if !chat_update.is_empty() {
            self.store
                .update_thread_chat(thread_id, chat_id, user_id, &chat_update)?;
        }

        if status_changed {
            let notified = panic::catch_unwind(AssertUnwindSafe(|| {
                self.notifier
                    .thread_chat_updated(user_id, thread_id, chat_id, to)
            }));
            if let Err(payload) = notified {
                warn!(
                    chat_id = %chat_id,
                    panic = %panic_message(payload.as_ref()),
                    "Notifier panicked; transition already committed"
                );
            }
        }

        Ok(TransitionOutcome::applied(to))
    }

    /// Direct field update, gated on the same identity as transitions.
    pub fn update_thread_chat(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
        update: &ThreadChatUpdate,
    ) -> Result<()> {
        self.store
            .update_thread_chat(thread_id, chat_id, user_id, update)
    }

    fn reattempt_queue_at(
        &self,
        chat: &ThreadChat,
        to: ThreadStatus,
        requested: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if !to.is_rate_limited() {
            if requested.is_some() {
                warn!(
                    chat_id = %chat.id,
                    status = %to,
                    "Ignoring reattempt time for non rate-limit status"
                );
            }
            return None;
        }
        requested
            .or(chat.reattempt_queue_at)
            .or_else(|| {
                let now = Utc::now();
                Some(now.checked_add_signed(self.default_reattempt_delay).unwrap_or_else(|| {
                    warn!(chat_id = %chat.id, "Default reattempt delay out of range; retrying now");
                    now
                }))
            })
    }
}
