//! Scoped execution around a thread chat.
//!
//! Guarded work never propagates a failure. An `Err` or a panic is classified,
//! persisted on the chat through a `system.error` transition, reported to the
//! observer and handed to the caller's `on_error`; the result is then `None`.
//! `on_exit` runs exactly once on every path.

use chrono::Utc;
use std::any::Any;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thread_lifecycle_protocol::ThreadEvent;
use tracing::{debug, warn};

use crate::coordinator::{TransitionCoordinator, TransitionRequest};
use crate::counter::{ActiveUserClaim, SandboxReferenceCounter};
use crate::error::{BoxError, LifecycleError, ThreadError};
use crate::observe::Observer;
use crate::sandbox::{HibernationScheduler, SandboxProvider, SandboxSession};
use crate::types::{ChatScope, ThreadChat, ThreadChatUpdate};

pub type ErrorHook<'a> = Box<dyn FnOnce(&(dyn StdError + Send + Sync + 'static)) + 'a>;
pub type ExitHook<'a> = Box<dyn FnOnce(Option<&ThreadChat>) -> Result<(), BoxError> + 'a>;
/// Returning `false` skips the work and leaves the sandbox untouched.
pub type BeforeExecHook<'a> = Box<dyn FnOnce(Option<&ThreadChat>) -> bool + 'a>;

#[derive(Default)]
pub struct ChatHooks<'a> {
    pub on_error: Option<ErrorHook<'a>>,
    pub on_exit: Option<ExitHook<'a>>,
}

impl<'a> ChatHooks<'a> {
    pub fn on_error(
        mut self,
        hook: impl FnOnce(&(dyn StdError + Send + Sync + 'static)) + 'a,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_exit(
        mut self,
        hook: impl FnOnce(Option<&ThreadChat>) -> Result<(), BoxError> + 'a,
    ) -> Self {
        self.on_exit = Some(Box::new(hook));
        self
    }
}

#[derive(Default)]
pub struct SessionHooks<'a> {
    pub on_before_exec: Option<BeforeExecHook<'a>>,
    pub on_error: Option<ErrorHook<'a>>,
    pub on_exit: Option<ExitHook<'a>>,
}

impl<'a> SessionHooks<'a> {
    pub fn on_before_exec(mut self, hook: impl FnOnce(Option<&ThreadChat>) -> bool + 'a) -> Self {
        self.on_before_exec = Some(Box::new(hook));
        self
    }

    pub fn on_error(
        mut self,
        hook: impl FnOnce(&(dyn StdError + Send + Sync + 'static)) + 'a,
    ) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn on_exit(
        mut self,
        hook: impl FnOnce(Option<&ThreadChat>) -> Result<(), BoxError> + 'a,
    ) -> Self {
        self.on_exit = Some(Box::new(hook));
        self
    }
}

/// What sandbox-scoped work gets to see.
#[derive(Debug, Clone, Copy)]
pub struct SandboxContext<'a> {
    pub chat: Option<&'a ThreadChat>,
    /// `None` when the thread has no sandbox or the provider has no session.
    pub session: Option<&'a SandboxSession>,
}

struct SandboxUsage {
    sandbox_id: String,
    session: Option<SandboxSession>,
    started: Instant,
}

#[derive(Clone)]
pub struct ResourceGuard {
    coordinator: TransitionCoordinator,
    counter: SandboxReferenceCounter,
    provider: Arc<dyn SandboxProvider>,
    observer: Arc<dyn Observer>,
    scheduler: HibernationScheduler,
}

impl ResourceGuard {
    pub fn new(
        coordinator: TransitionCoordinator,
        counter: SandboxReferenceCounter,
        provider: Arc<dyn SandboxProvider>,
        observer: Arc<dyn Observer>,
        hibernation_delay: std::time::Duration,
    ) -> Self {
        let scheduler =
            HibernationScheduler::new(counter.clone(), Arc::clone(&provider), hibernation_delay);
        Self {
            coordinator,
            counter,
            provider,
            observer,
            scheduler,
        }
    }

    pub fn coordinator(&self) -> &TransitionCoordinator {
        &self.coordinator
    }

    pub fn counter(&self) -> &SandboxReferenceCounter {
        &self.counter
    }

    pub fn with_thread_chat<T, F>(
        &self,
        scope: ChatScope<'_>,
        hooks: ChatHooks<'_>,
        work: F,
    ) -> Option<T>
    where
        F: FnOnce(Option<&ThreadChat>) -> Result<T, BoxError>,
    {
        let ChatHooks { on_error, on_exit } = hooks;
        let mut chat: Option<ThreadChat> = None;

        let result = run_guarded(|| {
            chat = self.load_chat(scope)?;
            work(chat.as_ref())
        });

        match result {
            Ok(value) => {
                run_exit_hook(on_exit, chat.as_ref());
                Some(value)
            }
            Err(err) => {
                contain("record_failure", || self.record_failure(scope, err.as_ref()));
                if let Some(on_error) = on_error {
                    contain("on_error", || on_error(err.as_ref()));
                }
                run_exit_hook(on_exit, chat.as_ref());
                None
            }
        }
    }

    /// Like [`with_thread_chat`](Self::with_thread_chat), but holds a claim
    /// on the thread's sandbox for the duration of `work`.
    pub fn with_thread_sandbox_session<T, F>(
        &self,
        scope: ChatScope<'_>,
        hooks: SessionHooks<'_>,
        work: F,
    ) -> Option<T>
    where
        F: FnOnce(SandboxContext<'_>) -> Result<T, BoxError>,
    {
        let SessionHooks {
            on_before_exec,
            on_error,
            on_exit,
        } = hooks;
        // Set once a claim is held, whether or not the provider resolves a session.
        let usage: RefCell<Option<SandboxUsage>> = RefCell::new(None);

        let exit: ExitHook<'_> = Box::new(|chat: Option<&ThreadChat>| {
            let result = match on_exit {
                Some(on_exit) => run_guarded(|| on_exit(chat)),
                None => Ok(()),
            };
            if let Some(claimed) = usage.borrow_mut().take() {
                let elapsed = claimed.started.elapsed();
                contain("sandbox_usage", || {
                    self.observer.sandbox_usage(
                        &claimed.sandbox_id,
                        scope.thread_id,
                        scope.user_id,
                        elapsed,
                    )
                });
                let session = claimed
                    .session
                    .unwrap_or_else(|| SandboxSession::unresolved(&claimed.sandbox_id));
                self.scheduler.schedule(session);
            }
            result
        });

        let hooks = ChatHooks {
            on_error,
            on_exit: Some(exit),
        };

        self.with_thread_chat(scope, hooks, |chat| {
            if let Some(before) = on_before_exec {
                if !before(chat) {
                    debug!(thread_id = %scope.thread_id, "on_before_exec declined; skipping work");
                    return Ok(None);
                }
            }

            let thread = self
                .coordinator
                .store()
                .get_thread(scope.thread_id, scope.user_id)?
                .ok_or_else(|| LifecycleError::ThreadNotFound(scope.thread_id.to_string()))?;

            let sandbox_id = match thread.sandbox_id.as_deref() {
                Some(sandbox_id) => sandbox_id,
                None => return work(SandboxContext { chat, session: None }).map(Some),
            };

            // Released when this closure returns, before on_exit runs.
            let _claim =
                ActiveUserClaim::acquire(&self.counter, sandbox_id).map_err(ThreadError::from)?;
            *usage.borrow_mut() = Some(SandboxUsage {
                sandbox_id: sandbox_id.to_string(),
                session: None,
                started: Instant::now(),
            });

            let session = match self.provider.get_sandbox_for_thread(&thread)? {
                Some(session) => session,
                None => {
                    debug!(sandbox_id = %sandbox_id, "Provider has no session for sandbox");
                    return work(SandboxContext { chat, session: None }).map(Some);
                }
            };

            if let Err(err) = self.provider.extend_sandbox_life(&session) {
                warn!(sandbox_id = %session.sandbox_id, error = %err, "Failed to extend sandbox life");
            }

            if let Some(claimed) = usage.borrow_mut().as_mut() {
                claimed.session = Some(session.clone());
            }
            work(SandboxContext {
                chat,
                session: Some(&session),
            })
            .map(Some)
        })
        .flatten()
    }

    fn load_chat(&self, scope: ChatScope<'_>) -> Result<Option<ThreadChat>, BoxError> {
        let chat_id = match scope.chat_id {
            Some(chat_id) => chat_id,
            None => return Ok(None),
        };
        let chat = self
            .coordinator
            .store()
            .get_thread_chat(scope.thread_id, chat_id, scope.user_id)?
            .ok_or_else(|| LifecycleError::ThreadChatNotFound {
                thread_id: scope.thread_id.to_string(),
                chat_id: chat_id.to_string(),
            })?;
        Ok(Some(chat))
    }

    fn record_failure(&self, scope: ChatScope<'_>, err: &(dyn StdError + Send + Sync + 'static)) {
        let (code, info) = ThreadError::classify(err);

        if let Some(chat_id) = scope.chat_id {
            let update = ThreadChatUpdate::record_error(code, &info, Utc::now());
            let request =
                TransitionRequest::new(scope.thread_id, chat_id, scope.user_id, ThreadEvent::SystemError)
                    .with_chat_update(update.clone())
                    .mark_as_unread();

            match self.coordinator.apply_transition(request) {
                Ok(outcome) if outcome.applied => {}
                Ok(_) => {
                    // Status moved underneath us; keep the error on the chat anyway.
                    warn!(
                        thread_id = %scope.thread_id,
                        chat_id = %chat_id,
                        "Error transition not applied; recording error fields only"
                    );
                    if let Err(err) = self.coordinator.update_thread_chat(
                        scope.thread_id,
                        chat_id,
                        scope.user_id,
                        &update,
                    ) {
                        warn!(chat_id = %chat_id, error = %err, "Failed to record thread error");
                    }
                }
                Err(err) => {
                    warn!(
                        thread_id = %scope.thread_id,
                        chat_id = %chat_id,
                        error = %err,
                        "Failed to persist thread error"
                    );
                }
            }
        }

        self.observer.thread_error(
            scope.thread_id,
            scope.chat_id,
            scope.user_id,
            &ThreadError::new(code, info),
        );
    }
}

fn run_guarded<T>(f: impl FnOnce() -> Result<T, BoxError>) -> Result<T, BoxError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref())).into()),
    }
}

fn run_exit_hook(on_exit: Option<ExitHook<'_>>, chat: Option<&ThreadChat>) {
    let Some(on_exit) = on_exit else {
        return;
    };
    if let Err(err) = run_guarded(|| on_exit(chat)) {
        warn!(error = %err, "on_exit hook failed");
    }
}

/// Runs an observer or hook callback, logging a panic instead of unwinding.
fn contain(callback: &'static str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            callback,
            panic = %panic_message(payload.as_ref()),
            "Callback panicked"
        );
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_errors() {
        let result: Result<(), BoxError> = run_guarded(|| panic!("boom"));
        assert_eq!(result.expect_err("should fail").to_string(), "panicked: boom");

        let result: Result<(), BoxError> = run_guarded(|| panic!("{} {}", "formatted", 1));
        assert_eq!(
            result.expect_err("should fail").to_string(),
            "panicked: formatted 1"
        );
    }

    #[test]
    fn contained_panics_do_not_unwind() {
        let mut ran = false;
        contain("test", || {
            ran = true;
            panic!("sink down");
        });
        assert!(ran);
    }

    #[test]
    fn errors_pass_through() {
        let result: Result<u8, BoxError> = run_guarded(|| Err("plain".into()));
        assert_eq!(result.expect_err("should fail").to_string(), "plain");
        assert_eq!(run_guarded(|| Ok::<_, BoxError>(7)).expect("ok"), 7);
    }
}
