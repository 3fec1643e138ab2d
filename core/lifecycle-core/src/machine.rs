//! Maps (status, event) pairs to the next thread status.
//!
//! The machine holds no state: any process can recompute the next status from
//! the persisted status string alone. Lookup order is the state's own table,
//! then the global fallback table, then no transition.

use thread_lifecycle_protocol::{ThreadEvent, ThreadStatus};
use thread_lifecycle_protocol::{ThreadEvent as E, ThreadStatus as S};

/// Edges handled by a specific current status.
fn state_transition(status: ThreadStatus, event: ThreadEvent) -> Option<ThreadStatus> {
    let next = match (status, event) {
        (S::Draft, E::UserQueue) => S::Queued,
        (S::Draft, E::UserSchedule) => S::Scheduled,

        (S::Scheduled, E::UserMessage) => S::Scheduled,
        (S::Scheduled, E::SystemResume) => S::Queued,
        (S::Scheduled, E::UserCancelSchedule) => S::Complete,

        (S::Queued, E::SystemDraft) => S::Draft,
        (S::Queued, E::SystemBoot) => S::Booting,
        (S::Queued, E::SystemConcurrencyLimit) => S::QueuedTasksConcurrency,
        (S::Queued, E::SystemSandboxCreationRateLimit) => S::QueuedSandboxCreationRateLimit,
        (S::Queued, E::SystemSlashCommandDone) => S::Complete,
        (S::Queued, E::UserStop) => S::Complete,
        (S::Queued, E::SystemError) => S::Complete,

        (S::QueuedTasksConcurrency, E::SystemResume) => S::Queued,
        (S::QueuedSandboxCreationRateLimit, E::SystemResume) => S::Queued,

        // While parked on an agent rate limit, in-flight system chatter is
        // accepted and ignored.
        (S::QueuedAgentRateLimit, E::SystemResume) => S::Queued,
        (S::QueuedAgentRateLimit, E::SystemMessage) => S::QueuedAgentRateLimit,
        (S::QueuedAgentRateLimit, E::SystemCheckpoint) => S::QueuedAgentRateLimit,
        (S::QueuedAgentRateLimit, E::SystemCheckpointDone) => S::QueuedAgentRateLimit,
        (S::QueuedAgentRateLimit, E::UserStop) => S::Complete,

        (S::Booting, E::UserStop) => S::Stopping,
        (S::Booting, E::AssistantMessage) => S::Working,
        (S::Booting, E::AssistantMessageError) => S::WorkingError,
        (S::Booting, E::AssistantMessageDone) => S::WorkingDone,
        (S::Booting, E::AssistantMessageDoneSkipCheckpoint) => S::Complete,
        (S::Booting, E::SystemSlashCommandDone) => S::Complete,
        (S::Booting, E::SystemAgentRateLimit) => S::QueuedAgentRateLimit,

        (S::Working, E::UserStop) => S::Stopping,
        (S::Working, E::AssistantMessage) => S::Working,
        (S::Working, E::AssistantMessageError) => S::WorkingError,
        (S::Working, E::AssistantMessageDone) => S::WorkingDone,
        (S::Working, E::AssistantMessageDoneSkipCheckpoint) => S::Complete,
        (S::Working, E::AssistantMessageStop) => S::Complete,
        (S::Working, E::SystemAgentRateLimit) => S::QueuedAgentRateLimit,

        (S::Stopping, E::UserMessage) => S::Working,
        (S::Stopping, E::AssistantMessageStop) => S::Complete,
        (S::Stopping, E::SystemStop) => S::Complete,
        (S::Stopping, E::SystemError) => S::Complete,

        (S::WorkingDone | S::WorkingError, E::UserMessage) => S::Working,
        (S::WorkingDone | S::WorkingError, E::SystemCheckpoint) => S::Checkpointing,

        (S::Checkpointing, E::SystemMessage) => S::Working,
        (S::Checkpointing, E::SystemCheckpointDone) => S::Complete,
        (S::Checkpointing, E::SystemError) => S::Complete,

        (S::Complete, E::UserMessage) => S::Queued,
        (S::Complete, E::SystemMessage) => S::Queued,
        (S::Complete, E::UserRetryCheckpoint) => S::WorkingDone,

        _ => return None,
    };
    Some(next)
}

/// Edges that apply from any status lacking its own handler for the event.
fn global_transition(event: ThreadEvent) -> Option<ThreadStatus> {
    match event {
        E::UserStop => Some(S::Complete),
        // Any error completes the chat, including from statuses whose own
        // table never mentions errors.
        E::SystemError => Some(S::Complete),
        _ => None,
    }
}

/// Returns the next status, or `None` when the event is ignored in `status`.
pub fn transition(status: ThreadStatus, event: ThreadEvent) -> Option<ThreadStatus> {
    state_transition(status, event).or_else(|| global_transition(event))
}

pub fn can_transition(status: ThreadStatus, event: ThreadEvent) -> bool {
    transition(status, event).is_some()
}
