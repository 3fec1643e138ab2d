//! Persisted records and the update payloads applied to them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thread_lifecycle_protocol::{ChatMessage, ThreadErrorCode, ThreadStatus};

/// Identity of a thread chat. Every read and write is gated on all three ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatScope<'a> {
    pub thread_id: &'a str,
    pub chat_id: Option<&'a str>,
    pub user_id: &'a str,
}

impl<'a> ChatScope<'a> {
    pub fn new(thread_id: &'a str, chat_id: &'a str, user_id: &'a str) -> Self {
        Self {
            thread_id,
            chat_id: Some(chat_id),
            user_id,
        }
    }

    /// A scope for work that runs without an active chat.
    pub fn without_chat(thread_id: &'a str, user_id: &'a str) -> Self {
        Self {
            thread_id,
            chat_id: None,
            user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub id: String,
    pub user_id: String,
    pub name: Option<String>,
    /// Weak reference; the sandbox lifecycle is owned elsewhere.
    pub sandbox_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadChat {
    pub id: String,
    pub thread_id: String,
    pub user_id: String,
    pub status: ThreadStatus,
    pub reattempt_queue_at: Option<DateTime<Utc>>,
    pub error_message: Option<ThreadErrorCode>,
    pub error_message_info: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub unread: bool,
    pub updated_at: DateTime<Utc>,
}

/// Thread-level fields to overwrite. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadUpdate {
    pub name: Option<String>,
    pub sandbox_id: Option<Option<String>>,
}

impl ThreadUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.sandbox_id.is_none()
    }
}

/// Chat-level fields to overwrite. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadChatUpdate {
    pub error_message: Option<Option<ThreadErrorCode>>,
    pub error_message_info: Option<Option<String>>,
    pub unread: Option<bool>,
    pub append_messages: Vec<ChatMessage>,
}

impl ThreadChatUpdate {
    pub fn is_empty(&self) -> bool {
        self.error_message.is_none()
            && self.error_message_info.is_none()
            && self.unread.is_none()
            && self.append_messages.is_empty()
    }

    /// Clears both error columns, as done when a chat is retried.
    pub fn clear_error() -> Self {
        Self {
            error_message: Some(None),
            error_message_info: Some(None),
            ..Self::default()
        }
    }

    pub fn record_error(code: ThreadErrorCode, info: &str, now: DateTime<Utc>) -> Self {
        Self {
            error_message: Some(Some(code)),
            error_message_info: Some(Some(info.to_string())),
            unread: None,
            append_messages: vec![ChatMessage::Error {
                id: ulid::Ulid::new().to_string(),
                error_type: code,
                error_info: info.to_string(),
                timestamp: now,
            }],
        }
    }
}

/// Result of asking the coordinator to apply an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub applied: bool,
    pub resulting_status: Option<ThreadStatus>,
}

impl TransitionOutcome {
    pub fn skipped() -> Self {
        Self {
            applied: false,
            resulting_status: None,
        }
    }

    pub fn applied(status: ThreadStatus) -> Self {
        Self {
            applied: true,
            resulting_status: Some(status),
        }
    }
}
