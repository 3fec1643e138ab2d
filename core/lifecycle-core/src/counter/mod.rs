//! Sandbox presence tracking.
//!
//! A sandbox stays awake while any of three consumer classes needs it: a
//! guarded run (the `active_users` counter), an open chat tab (the
//! `active_thread_chats` set) or an open terminal (the `terminal_active`
//! flag). Every signal carries a TTL, so a consumer that dies without
//! releasing its claim cannot pin the sandbox open forever.
//!
//! # Store seam
//!
//! [`CounterStore`] exposes only atomic primitives. Each one mutates a key and
//! refreshes its TTL in a single indivisible step; there is no read, compute,
//! write sequence anywhere in this module.

mod memory;
mod sqlite;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::error::{LifecycleError, Result};

pub use memory::MemoryCounterStore;
pub use sqlite::SqliteCounterStore;

pub trait CounterStore: Send + Sync {
    /// Increments an integer key and sets its TTL, returning the new value.
    fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Decrements an integer key without going below zero. The existing TTL
    /// is kept; a missing key stays missing.
    fn decr(&self, key: &str) -> Result<i64>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Sets a key, with a TTL when given.
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    fn del(&self, key: &str) -> Result<()>;

    /// Adds a member to a set and refreshes the set's TTL.
    fn sadd_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> Result<()>;

    /// Removes a member without touching the set's TTL.
    fn srem(&self, key: &str, member: &str) -> Result<()>;

    fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterTtls {
    pub active_users: Duration,
    pub active_thread_chats: Duration,
}

impl Default for CounterTtls {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for CounterTtls {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            active_users: Duration::from_secs(config.active_users_ttl_secs),
            active_thread_chats: Duration::from_secs(config.active_thread_chats_ttl_secs),
        }
    }
}

/// All presence signals for one sandbox, read at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxPresence {
    pub sandbox_id: String,
    pub active_users: i64,
    pub active_thread_chats: Vec<String>,
    pub terminal_active: bool,
    pub should_hibernate: bool,
}

fn active_users_key(sandbox_id: &str) -> String {
    format!("sandbox:{}:active-users", sandbox_id)
}

fn active_thread_chats_key(sandbox_id: &str) -> String {
    format!("sandbox:{}:active-thread-chats", sandbox_id)
}

fn terminal_active_key(sandbox_id: &str) -> String {
    format!("sandbox:{}:terminal-active", sandbox_id)
}

#[derive(Clone)]
pub struct SandboxReferenceCounter {
    store: Arc<dyn CounterStore>,
    ttls: CounterTtls,
}

impl SandboxReferenceCounter {
    pub fn new(store: Arc<dyn CounterStore>, ttls: CounterTtls) -> Self {
        Self { store, ttls }
    }

    /// Claims a slot. Callers must not proceed on error: they do not hold a
    /// slot.
    pub fn increment_active_users(&self, sandbox_id: &str) -> Result<i64> {
        let count = self
            .store
            .incr_with_ttl(&active_users_key(sandbox_id), self.ttls.active_users)
            .map_err(|err| LifecycleError::ResourceAcquisitionFailed {
                sandbox_id: sandbox_id.to_string(),
                details: err.to_string(),
            })?;
        debug!(sandbox_id = %sandbox_id, active_users = count, "Sandbox user claimed");
        Ok(count)
    }

    /// Releases a slot. Failures are logged; a lost release is bounded by the
    /// counter TTL.
    pub fn decrement_active_users(&self, sandbox_id: &str) {
        match self.store.decr(&active_users_key(sandbox_id)) {
            Ok(count) => {
                debug!(sandbox_id = %sandbox_id, active_users = count, "Sandbox user released");
            }
            Err(err) => {
                warn!(
                    sandbox_id = %sandbox_id,
                    error = %err,
                    "Failed to release sandbox user"
                );
            }
        }
    }

    pub fn get_active_users(&self, sandbox_id: &str) -> Result<i64> {
        let key = active_users_key(sandbox_id);
        let raw = match self.store.get(&key)? {
            Some(raw) => raw,
            None => return Ok(0),
        };
        match raw.trim().parse::<i64>() {
            Ok(count) if count >= 0 => Ok(count),
            _ => {
                warn!(
                    sandbox_id = %sandbox_id,
                    value = %raw,
                    "Corrupt active user count; resetting"
                );
                self.store.del(&key)?;
                Ok(0)
            }
        }
    }

    pub fn set_active_thread_chat(
        &self,
        sandbox_id: &str,
        thread_chat_id: &str,
        active: bool,
    ) -> Result<()> {
        let key = active_thread_chats_key(sandbox_id);
        if active {
            self.store
                .sadd_with_ttl(&key, thread_chat_id, self.ttls.active_thread_chats)
        } else {
            self.store.srem(&key, thread_chat_id)
        }
    }

    pub fn get_active_thread_chats(&self, sandbox_id: &str) -> Result<Vec<String>> {
        let mut members = self.store.smembers(&active_thread_chats_key(sandbox_id))?;
        members.sort();
        Ok(members)
    }

    /// Marks the terminal open for `ttl`. The caller renews while it stays open.
    pub fn set_terminal_active(&self, sandbox_id: &str, ttl: Duration) -> Result<()> {
        self.store
            .set_with_ttl(&terminal_active_key(sandbox_id), "1", Some(ttl))
    }

    pub fn clear_terminal_active(&self, sandbox_id: &str) -> Result<()> {
        self.store.del(&terminal_active_key(sandbox_id))
    }

    pub fn is_terminal_active(&self, sandbox_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&terminal_active_key(sandbox_id))?
            .map(|value| !value.is_empty() && value != "0")
            .unwrap_or(false))
    }

    pub fn should_hibernate(&self, sandbox_id: &str) -> Result<bool> {
        Ok(self.get_active_users(sandbox_id)? <= 0
            && self.get_active_thread_chats(sandbox_id)?.is_empty()
            && !self.is_terminal_active(sandbox_id)?)
    }

    pub fn snapshot(&self, sandbox_id: &str) -> Result<SandboxPresence> {
        let active_users = self.get_active_users(sandbox_id)?;
        let active_thread_chats = self.get_active_thread_chats(sandbox_id)?;
        let terminal_active = self.is_terminal_active(sandbox_id)?;
        Ok(SandboxPresence {
            sandbox_id: sandbox_id.to_string(),
            should_hibernate: active_users <= 0
                && active_thread_chats.is_empty()
                && !terminal_active,
            active_users,
            active_thread_chats,
            terminal_active,
        })
    }
}

/// Releases an active-user slot when dropped, on every exit path.
pub struct ActiveUserClaim<'a> {
    counter: &'a SandboxReferenceCounter,
    sandbox_id: String,
}

impl<'a> ActiveUserClaim<'a> {
    pub fn acquire(counter: &'a SandboxReferenceCounter, sandbox_id: &str) -> Result<Self> {
        counter.increment_active_users(sandbox_id)?;
        Ok(Self {
            counter,
            sandbox_id: sandbox_id.to_string(),
        })
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }
}

impl Drop for ActiveUserClaim<'_> {
    fn drop(&mut self) {
        self.counter.decrement_active_users(&self.sandbox_id);
    }
}
