//! In-process counter store. One mutex serializes every primitive, which makes
//! each of them atomic; expiry is applied lazily on access.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::CounterStore;
use crate::error::{LifecycleError, Result};

#[derive(Debug)]
enum Value {
    Text(String),
    Members(BTreeSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // Each primitive leaves the map consistent, so a poisoned lock is safe
        // to reuse.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).map(|entry| entry.is_expired(now)).unwrap_or(false) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn parse_count(key: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Text(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| LifecycleError::CorruptRecord(format!("{} is not an integer", key))),
        Value::Members(_) => Err(LifecycleError::CorruptRecord(format!(
            "{} holds a set, not a counter",
            key
        ))),
    }
}

/// `None` (never expires) when the TTL runs past what `Instant` can hold.
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

impl CounterStore for MemoryCounterStore {
    fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut entries = self.lock();
        let current = match live(&mut entries, key) {
            Some(entry) => parse_count(key, &entry.value)?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| LifecycleError::CorruptRecord(format!("{} overflowed", key)))?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(next.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(next)
    }

    fn decr(&self, key: &str) -> Result<i64> {
        let mut entries = self.lock();
        let entry = match live(&mut entries, key) {
            Some(entry) => entry,
            None => return Ok(0),
        };
        let next = (parse_count(key, &entry.value)? - 1).max(0);
        entry.value = Value::Text(next.to_string());
        Ok(next)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock();
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(LifecycleError::CorruptRecord(format!(
                "{} holds a set, not a value",
                key
            ))),
            None => Ok(None),
        }
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.and_then(deadline),
            },
        );
        Ok(())
    }

    fn del(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn sadd_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.lock();
        let expires_at = deadline(ttl);
        match live(&mut entries, key) {
            Some(entry) => match &mut entry.value {
                Value::Members(members) => {
                    members.insert(member.to_string());
                    entry.expires_at = expires_at;
                }
                Value::Text(_) => {
                    return Err(LifecycleError::CorruptRecord(format!(
                        "{} holds a value, not a set",
                        key
                    )))
                }
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Members(BTreeSet::from([member.to_string()])),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut entries = self.lock();
        let now_empty = match live(&mut entries, key) {
            Some(Entry {
                value: Value::Members(members),
                ..
            }) => {
                members.remove(member);
                members.is_empty()
            }
            _ => false,
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut entries = self.lock();
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Members(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(LifecycleError::CorruptRecord(format!(
                "{} holds a value, not a set",
                key
            ))),
            None => Ok(Vec::new()),
        }
    }
}
