//! Sandbox provisioning seam and hibernation scheduling.
//!
//! Provisioning itself lives elsewhere; this module only asks the provider for
//! an existing session and, once every consumer is gone, asks it to hibernate.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::counter::SandboxReferenceCounter;
use crate::error::{BoxError, ThreadError};
use crate::types::Thread;

/// A live handle on a thread's sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSession {
    pub sandbox_id: String,
    pub provider: String,
}

impl SandboxSession {
    /// Session for a claimed sandbox the provider never resolved. Hibernation
    /// checks only need the id.
    pub fn unresolved(sandbox_id: &str) -> Self {
        Self {
            sandbox_id: sandbox_id.to_string(),
            provider: "unresolved".to_string(),
        }
    }
}

pub trait SandboxProvider: Send + Sync {
    fn get_sandbox_for_thread(
        &self,
        thread: &Thread,
    ) -> Result<Option<SandboxSession>, ThreadError>;

    fn extend_sandbox_life(&self, session: &SandboxSession) -> Result<(), BoxError>;

    fn hibernate_sandbox(&self, session: &SandboxSession) -> Result<(), BoxError>;
}

/// Provider for hosts without provisioning: sessions are synthesized from the
/// thread's sandbox id and hibernation is a logged no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSandboxProvider;

impl SandboxProvider for NoopSandboxProvider {
    fn get_sandbox_for_thread(
        &self,
        thread: &Thread,
    ) -> Result<Option<SandboxSession>, ThreadError> {
        Ok(thread.sandbox_id.as_ref().map(|sandbox_id| SandboxSession {
            sandbox_id: sandbox_id.clone(),
            provider: "noop".to_string(),
        }))
    }

    fn extend_sandbox_life(&self, _session: &SandboxSession) -> Result<(), BoxError> {
        Ok(())
    }

    fn hibernate_sandbox(&self, session: &SandboxSession) -> Result<(), BoxError> {
        info!(sandbox_id = %session.sandbox_id, "Hibernation requested (noop provider)");
        Ok(())
    }
}

/// Hibernates `session` now if no consumer holds a claim on it. Returns
/// whether hibernation was requested.
pub fn maybe_hibernate(
    counter: &SandboxReferenceCounter,
    provider: &dyn SandboxProvider,
    session: &SandboxSession,
) -> Result<bool, BoxError> {
    if !counter.should_hibernate(&session.sandbox_id)? {
        debug!(sandbox_id = %session.sandbox_id, "Sandbox still in use; skipping hibernation");
        return Ok(false);
    }
    provider.hibernate_sandbox(session)?;
    info!(sandbox_id = %session.sandbox_id, "Sandbox hibernated");
    Ok(true)
}

/// Runs hibernation checks on detached threads after a fixed delay.
///
/// A consumer that claims the sandbox before the check runs makes the check
/// a no-op, which is the only cancellation there is.
#[derive(Clone)]
pub struct HibernationScheduler {
    counter: SandboxReferenceCounter,
    provider: Arc<dyn SandboxProvider>,
    delay: Duration,
}

impl HibernationScheduler {
    pub fn new(
        counter: SandboxReferenceCounter,
        provider: Arc<dyn SandboxProvider>,
        delay: Duration,
    ) -> Self {
        Self {
            counter,
            provider,
            delay,
        }
    }

    pub fn schedule(&self, session: SandboxSession) {
        let counter = self.counter.clone();
        let provider = Arc::clone(&self.provider);
        let delay = self.delay;
        let sandbox_id = session.sandbox_id.clone();

        let spawned = thread::Builder::new()
            .name(format!("hibernate-{}", sandbox_id))
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if let Err(err) = maybe_hibernate(&counter, provider.as_ref(), &session) {
                    warn!(
                        sandbox_id = %session.sandbox_id,
                        error = %err,
                        "Hibernation check failed"
                    );
                }
            });

        if let Err(err) = spawned {
            warn!(sandbox_id = %sandbox_id, error = %err, "Failed to schedule hibernation check");
        }
    }
}
