//! Error types for lifecycle operations.
//! `LifecycleError` is for infrastructure failures; `ThreadError` is the domain
//! failure that gets persisted onto a thread chat.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use thread_lifecycle_protocol::ThreadErrorCode;

// ═══════════════════════════════════════════════════════════════════════════════
// Infrastructure Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can occur while talking to the stores or loading config.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    // ─────────────────────────────────────────────────────────────────────
    // Lookup Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Thread chat not found: thread={thread_id} chat={chat_id}")]
    ThreadChatNotFound { thread_id: String, chat_id: String },

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Serialization error: {context}: {source}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    // ─────────────────────────────────────────────────────────────────────
    // Resource Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to acquire sandbox {sandbox_id}: {details}")]
    ResourceAcquisitionFailed { sandbox_id: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration / I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LifecycleError {
    pub(crate) fn store(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| LifecycleError::Store { context, source }
    }

    pub(crate) fn serialization(
        context: impl Into<String>,
    ) -> impl FnOnce(serde_json::Error) -> Self {
        let context = context.into();
        move |source| LifecycleError::Serialization { context, source }
    }
}

/// Convenience type alias for Results using LifecycleError.
pub type Result<T> = std::result::Result<T, LifecycleError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// A failure with a code from the closed taxonomy, as shown to users.
#[derive(Debug)]
pub struct ThreadError {
    pub code: ThreadErrorCode,
    pub info: String,
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl ThreadError {
    pub fn new(code: ThreadErrorCode, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
            cause: None,
        }
    }

    pub fn unknown(info: impl Into<String>) -> Self {
        Self::new(ThreadErrorCode::UnknownError, info)
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Classifies an arbitrary failure. Domain errors keep their own code,
    /// everything else becomes `unknown-error` carrying the message.
    pub fn classify(err: &(dyn StdError + Send + Sync + 'static)) -> (ThreadErrorCode, String) {
        match err.downcast_ref::<ThreadError>() {
            Some(thread_err) => (thread_err.code, thread_err.info.clone()),
            None => (ThreadErrorCode::UnknownError, err.to_string()),
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.info)
    }
}

impl StdError for ThreadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<LifecycleError> for ThreadError {
    fn from(err: LifecycleError) -> Self {
        let code = match &err {
            LifecycleError::ResourceAcquisitionFailed { .. } => {
                ThreadErrorCode::SandboxResumeFailed
            }
            _ => ThreadErrorCode::UnknownError,
        };
        ThreadError::new(code, err.to_string()).with_cause(err)
    }
}

/// Error type accepted from guarded work: any error, domain or otherwise.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;
