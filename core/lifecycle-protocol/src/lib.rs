//! Shared types for thread lifecycle coordination.
//!
//! This crate is shared by the coordinator library and its clients (event
//! handlers, the operator CLI) so that status strings, event names and error
//! codes cannot drift between writers and readers of the same rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for ParseError {}

/// Persisted lifecycle status of a thread chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadStatus {
    Draft,
    Scheduled,
    Queued,
    QueuedTasksConcurrency,
    QueuedSandboxCreationRateLimit,
    QueuedAgentRateLimit,
    Booting,
    Working,
    Stopping,
    WorkingDone,
    WorkingError,
    Checkpointing,
    Complete,
    // Legacy values. Still readable, never produced by a transition.
    QueuedBlocked,
    WorkingStopped,
    Stopped,
    Error,
}

impl ThreadStatus {
    pub const ALL: [ThreadStatus; 17] = [
        ThreadStatus::Draft,
        ThreadStatus::Scheduled,
        ThreadStatus::Queued,
        ThreadStatus::QueuedTasksConcurrency,
        ThreadStatus::QueuedSandboxCreationRateLimit,
        ThreadStatus::QueuedAgentRateLimit,
        ThreadStatus::Booting,
        ThreadStatus::Working,
        ThreadStatus::Stopping,
        ThreadStatus::WorkingDone,
        ThreadStatus::WorkingError,
        ThreadStatus::Checkpointing,
        ThreadStatus::Complete,
        ThreadStatus::QueuedBlocked,
        ThreadStatus::WorkingStopped,
        ThreadStatus::Stopped,
        ThreadStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Draft => "draft",
            ThreadStatus::Scheduled => "scheduled",
            ThreadStatus::Queued => "queued",
            ThreadStatus::QueuedTasksConcurrency => "queued-tasks-concurrency",
            ThreadStatus::QueuedSandboxCreationRateLimit => "queued-sandbox-creation-rate-limit",
            ThreadStatus::QueuedAgentRateLimit => "queued-agent-rate-limit",
            ThreadStatus::Booting => "booting",
            ThreadStatus::Working => "working",
            ThreadStatus::Stopping => "stopping",
            ThreadStatus::WorkingDone => "working-done",
            ThreadStatus::WorkingError => "working-error",
            ThreadStatus::Checkpointing => "checkpointing",
            ThreadStatus::Complete => "complete",
            ThreadStatus::QueuedBlocked => "queued-blocked",
            ThreadStatus::WorkingStopped => "working-stopped",
            ThreadStatus::Stopped => "stopped",
            ThreadStatus::Error => "error",
        }
    }

    /// Statuses that carry a `reattempt_queue_at` deadline.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            ThreadStatus::QueuedSandboxCreationRateLimit | ThreadStatus::QueuedAgentRateLimit
        )
    }

    pub fn is_queued(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Queued
                | ThreadStatus::QueuedTasksConcurrency
                | ThreadStatus::QueuedSandboxCreationRateLimit
                | ThreadStatus::QueuedAgentRateLimit
                | ThreadStatus::QueuedBlocked
        )
    }

    /// An agent is (or is about to be) running against the sandbox.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Booting
                | ThreadStatus::Working
                | ThreadStatus::Stopping
                | ThreadStatus::Checkpointing
        )
    }

    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            ThreadStatus::QueuedBlocked
                | ThreadStatus::WorkingStopped
                | ThreadStatus::Stopped
                | ThreadStatus::Error
        )
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ThreadStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| ParseError {
                kind: "thread status",
                value: value.to_string(),
            })
    }
}

/// Symbolic signals that drive status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadEvent {
    #[serde(rename = "system.draft")]
    SystemDraft,
    #[serde(rename = "system.boot")]
    SystemBoot,
    #[serde(rename = "system.concurrency-limit")]
    SystemConcurrencyLimit,
    #[serde(rename = "system.sandbox-creation-rate-limit")]
    SystemSandboxCreationRateLimit,
    #[serde(rename = "system.agent-rate-limit")]
    SystemAgentRateLimit,
    #[serde(rename = "system.slash-command-done")]
    SystemSlashCommandDone,
    #[serde(rename = "system.resume")]
    SystemResume,
    #[serde(rename = "system.message")]
    SystemMessage,
    #[serde(rename = "system.checkpoint")]
    SystemCheckpoint,
    #[serde(rename = "system.checkpoint-done")]
    SystemCheckpointDone,
    #[serde(rename = "system.stop")]
    SystemStop,
    #[serde(rename = "system.error")]
    SystemError,
    #[serde(rename = "user.queue")]
    UserQueue,
    #[serde(rename = "user.schedule")]
    UserSchedule,
    #[serde(rename = "user.message")]
    UserMessage,
    #[serde(rename = "user.cancel-schedule")]
    UserCancelSchedule,
    #[serde(rename = "user.stop")]
    UserStop,
    #[serde(rename = "user.retry-checkpoint")]
    UserRetryCheckpoint,
    #[serde(rename = "assistant.message")]
    AssistantMessage,
    #[serde(rename = "assistant.message_error")]
    AssistantMessageError,
    #[serde(rename = "assistant.message_done")]
    AssistantMessageDone,
    #[serde(rename = "assistant.message_done_skip_checkpoint")]
    AssistantMessageDoneSkipCheckpoint,
    #[serde(rename = "assistant.message_stop")]
    AssistantMessageStop,
}

impl ThreadEvent {
    pub const ALL: [ThreadEvent; 23] = [
        ThreadEvent::SystemDraft,
        ThreadEvent::SystemBoot,
        ThreadEvent::SystemConcurrencyLimit,
        ThreadEvent::SystemSandboxCreationRateLimit,
        ThreadEvent::SystemAgentRateLimit,
        ThreadEvent::SystemSlashCommandDone,
        ThreadEvent::SystemResume,
        ThreadEvent::SystemMessage,
        ThreadEvent::SystemCheckpoint,
        ThreadEvent::SystemCheckpointDone,
        ThreadEvent::SystemStop,
        ThreadEvent::SystemError,
        ThreadEvent::UserQueue,
        ThreadEvent::UserSchedule,
        ThreadEvent::UserMessage,
        ThreadEvent::UserCancelSchedule,
        ThreadEvent::UserStop,
        ThreadEvent::UserRetryCheckpoint,
        ThreadEvent::AssistantMessage,
        ThreadEvent::AssistantMessageError,
        ThreadEvent::AssistantMessageDone,
        ThreadEvent::AssistantMessageDoneSkipCheckpoint,
        ThreadEvent::AssistantMessageStop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadEvent::SystemDraft => "system.draft",
            ThreadEvent::SystemBoot => "system.boot",
            ThreadEvent::SystemConcurrencyLimit => "system.concurrency-limit",
            ThreadEvent::SystemSandboxCreationRateLimit => "system.sandbox-creation-rate-limit",
            ThreadEvent::SystemAgentRateLimit => "system.agent-rate-limit",
            ThreadEvent::SystemSlashCommandDone => "system.slash-command-done",
            ThreadEvent::SystemResume => "system.resume",
            ThreadEvent::SystemMessage => "system.message",
            ThreadEvent::SystemCheckpoint => "system.checkpoint",
            ThreadEvent::SystemCheckpointDone => "system.checkpoint-done",
            ThreadEvent::SystemStop => "system.stop",
            ThreadEvent::SystemError => "system.error",
            ThreadEvent::UserQueue => "user.queue",
            ThreadEvent::UserSchedule => "user.schedule",
            ThreadEvent::UserMessage => "user.message",
            ThreadEvent::UserCancelSchedule => "user.cancel-schedule",
            ThreadEvent::UserStop => "user.stop",
            ThreadEvent::UserRetryCheckpoint => "user.retry-checkpoint",
            ThreadEvent::AssistantMessage => "assistant.message",
            ThreadEvent::AssistantMessageError => "assistant.message_error",
            ThreadEvent::AssistantMessageDone => "assistant.message_done",
            ThreadEvent::AssistantMessageDoneSkipCheckpoint => {
                "assistant.message_done_skip_checkpoint"
            }
            ThreadEvent::AssistantMessageStop => "assistant.message_stop",
        }
    }
}

impl fmt::Display for ThreadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadEvent {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ThreadEvent::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == value)
            .ok_or_else(|| ParseError {
                kind: "thread event",
                value: value.to_string(),
            })
    }
}

/// Closed taxonomy of failures persisted onto a thread chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadErrorCode {
    UnknownError,
    AgentNotResponding,
    AgentGenericError,
    MissingAmpCredentials,
    SandboxCreationFailed,
    SandboxNotFound,
    SandboxResumeFailed,
    GitCheckpointDiffFailed,
    GitCheckpointPushFailed,
    SetupScriptFailed,
    InvalidSlashCommand,
    PromptTooLong,
    RequestTimeout,
    QueueLimitExceeded,
}

impl ThreadErrorCode {
    pub const ALL: [ThreadErrorCode; 14] = [
        ThreadErrorCode::UnknownError,
        ThreadErrorCode::AgentNotResponding,
        ThreadErrorCode::AgentGenericError,
        ThreadErrorCode::MissingAmpCredentials,
        ThreadErrorCode::SandboxCreationFailed,
        ThreadErrorCode::SandboxNotFound,
        ThreadErrorCode::SandboxResumeFailed,
        ThreadErrorCode::GitCheckpointDiffFailed,
        ThreadErrorCode::GitCheckpointPushFailed,
        ThreadErrorCode::SetupScriptFailed,
        ThreadErrorCode::InvalidSlashCommand,
        ThreadErrorCode::PromptTooLong,
        ThreadErrorCode::RequestTimeout,
        ThreadErrorCode::QueueLimitExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadErrorCode::UnknownError => "unknown-error",
            ThreadErrorCode::AgentNotResponding => "agent-not-responding",
            ThreadErrorCode::AgentGenericError => "agent-generic-error",
            ThreadErrorCode::MissingAmpCredentials => "missing-amp-credentials",
            ThreadErrorCode::SandboxCreationFailed => "sandbox-creation-failed",
            ThreadErrorCode::SandboxNotFound => "sandbox-not-found",
            ThreadErrorCode::SandboxResumeFailed => "sandbox-resume-failed",
            ThreadErrorCode::GitCheckpointDiffFailed => "git-checkpoint-diff-failed",
            ThreadErrorCode::GitCheckpointPushFailed => "git-checkpoint-push-failed",
            ThreadErrorCode::SetupScriptFailed => "setup-script-failed",
            ThreadErrorCode::InvalidSlashCommand => "invalid-slash-command",
            ThreadErrorCode::PromptTooLong => "prompt-too-long",
            ThreadErrorCode::RequestTimeout => "request-timeout",
            ThreadErrorCode::QueueLimitExceeded => "queue-limit-exceeded",
        }
    }

    /// Reads a stored code; anything outside the taxonomy collapses to
    /// `unknown-error`.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(ThreadErrorCode::UnknownError)
    }
}

impl fmt::Display for ThreadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadErrorCode {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ThreadErrorCode::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == value)
            .ok_or_else(|| ParseError {
                kind: "thread error code",
                value: value.to_string(),
            })
    }
}

/// One entry of a thread chat's append-only message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatMessage {
    User {
        text: String,
        timestamp: DateTime<Utc>,
    },
    Agent {
        text: String,
        timestamp: DateTime<Utc>,
    },
    System {
        message_type: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        id: String,
        error_type: ThreadErrorCode,
        error_info: String,
        timestamp: DateTime<Utc>,
    },
}

impl ChatMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, ChatMessage::Error { .. })
    }
}
