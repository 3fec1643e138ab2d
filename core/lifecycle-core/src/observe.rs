//! Outbound signals: error/usage observability and realtime chat updates.
//!
//! Both are fire-and-forget. Implementations must not block for long and must
//! swallow their own failures.

use std::time::Duration;
use thread_lifecycle_protocol::ThreadStatus;
use tracing::{error, info};

use crate::error::ThreadError;

pub trait Observer: Send + Sync {
    fn thread_error(
        &self,
        thread_id: &str,
        chat_id: Option<&str>,
        user_id: &str,
        error: &ThreadError,
    );

    fn sandbox_usage(&self, sandbox_id: &str, thread_id: &str, user_id: &str, duration: Duration);
}

pub trait Notifier: Send + Sync {
    fn thread_chat_updated(
        &self,
        user_id: &str,
        thread_id: &str,
        chat_id: &str,
        status: ThreadStatus,
    );
}

/// Emits observability events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn thread_error(
        &self,
        thread_id: &str,
        chat_id: Option<&str>,
        user_id: &str,
        err: &ThreadError,
    ) {
        error!(
            thread_id = %thread_id,
            chat_id = chat_id.unwrap_or("-"),
            user_id = %user_id,
            code = %err.code,
            info = %err.info,
            "Thread work failed"
        );
    }

    fn sandbox_usage(&self, sandbox_id: &str, thread_id: &str, user_id: &str, duration: Duration) {
        info!(
            sandbox_id = %sandbox_id,
            thread_id = %thread_id,
            user_id = %user_id,
            duration_ms = duration.as_millis() as u64,
            "Sandbox usage"
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn thread_chat_updated(
        &self,
        user_id: &str,
        thread_id: &str,
        chat_id: &str,
        status: ThreadStatus,
    ) {
        info!(
            user_id = %user_id,
            thread_id = %thread_id,
            chat_id = %chat_id,
            status = %status,
            "Thread chat updated"
        );
    }
}
