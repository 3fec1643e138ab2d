//! Persistent thread storage.
//!
//! The coordinator only needs a handful of identity-gated operations; the
//! important one is [`ThreadStore::atomic_update_status`], which must be a
//! single conditional write so that concurrent writers resolve to exactly one
//! winner without any explicit lock.

mod sqlite;

use chrono::{DateTime, Utc};
use thread_lifecycle_protocol::ThreadStatus;

use crate::error::Result;
use crate::types::{Thread, ThreadChat, ThreadChatUpdate, ThreadUpdate};

pub use sqlite::SqliteThreadStore;

/// A compare-and-swap on a chat's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSwap {
    pub from: ThreadStatus,
    pub to: ThreadStatus,
    /// `None` leaves the stored value untouched.
    pub reattempt_queue_at: Option<DateTime<Utc>>,
}

pub trait ThreadStore: Send + Sync {
    fn get_thread(&self, thread_id: &str, user_id: &str) -> Result<Option<Thread>>;

    fn get_thread_chat(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Option<ThreadChat>>;

    /// Applies `swap` only if the stored status still equals `swap.from`.
    /// Returns whether a row was changed.
    fn atomic_update_status(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
        swap: StatusSwap,
    ) -> Result<bool>;

    fn update_thread(&self, thread_id: &str, user_id: &str, update: &ThreadUpdate) -> Result<()>;

    fn update_thread_chat(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
        update: &ThreadChatUpdate,
    ) -> Result<()>;

    fn insert_thread(&self, thread: &Thread) -> Result<()>;

    fn insert_thread_chat(&self, chat: &ThreadChat) -> Result<()>;
}
