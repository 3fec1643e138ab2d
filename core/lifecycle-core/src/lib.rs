//! # thread-lifecycle
//!
//! Lifecycle coordination for agent threads whose work runs in shared remote
//! sandboxes.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Callers on many threads share
//!   one [`ResourceGuard`] and its `Arc`'d collaborators.
//! - **Lock-free transitions**: Status changes are a compare-and-swap on the
//!   stored status. Losing a race is `applied: false`, never an error.
//! - **Failures become state**: Guarded work never propagates an error; it is
//!   persisted on the chat and the chat moves to `complete`.
//! - **Counted sandboxes**: A sandbox is hibernated only when no run, open chat
//!   or terminal still references it.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use thread_lifecycle::{ChatScope, ChatHooks, ResourceGuard};
//!
//! let reply = guard.with_thread_chat(
//!     ChatScope::new("thread-1", "chat-1", "user-1"),
//!     ChatHooks::default(),
//!     |chat| Ok(chat.map(|c| c.status)),
//! );
//! ```

pub mod config;
pub mod coordinator;
pub mod counter;
pub mod error;
pub mod guard;
pub mod machine;
pub mod observe;
pub mod sandbox;
pub mod store;
pub mod types;

pub use config::{load_config, LifecycleConfig};
pub use coordinator::{TransitionCoordinator, TransitionRequest};
pub use counter::{
    ActiveUserClaim, CounterStore, CounterTtls, MemoryCounterStore, SandboxPresence,
    SandboxReferenceCounter, SqliteCounterStore,
};
pub use error::{BoxError, LifecycleError, Result, ThreadError};
pub use guard::{ChatHooks, ResourceGuard, SandboxContext, SessionHooks};
pub use machine::{can_transition, transition};
pub use observe::{Notifier, Observer, TracingNotifier, TracingObserver};
pub use sandbox::{HibernationScheduler, NoopSandboxProvider, SandboxProvider, SandboxSession};
pub use store::{SqliteThreadStore, StatusSwap, ThreadStore};
pub use types::*;

pub use thread_lifecycle_protocol::{ChatMessage, ThreadErrorCode, ThreadEvent, ThreadStatus};
