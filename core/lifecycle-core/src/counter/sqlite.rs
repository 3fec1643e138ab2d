//! Counter store shared between processes through one SQLite file.
//!
//! Each primitive is a single IMMEDIATE transaction, so the mutation and its
//! TTL refresh commit together and concurrent processes serialize on the
//! database write lock. Expired keys are purged inside the same transaction
//! before the key is read.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use std::path::PathBuf;
use std::time::Duration;

use super::CounterStore;
use crate::error::{LifecycleError, Result};

const KIND_VALUE: &str = "value";
const KIND_SET: &str = "set";

pub struct SqliteCounterStore {
    path: PathBuf,
}

impl SqliteCounterStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS counter_entries (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT,
                expires_at INTEGER
             );
             CREATE TABLE IF NOT EXISTS counter_members (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
             );
             COMMIT;",
        )
        .map_err(LifecycleError::store("Failed to initialize counter schema"))
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| LifecycleError::Io {
                context: "Failed to create counter store dir".to_string(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(LifecycleError::store("Failed to open counter db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(LifecycleError::store("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(LifecycleError::store("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(LifecycleError::store("Failed to set busy_timeout"))?;

        Ok(conn)
    }

    /// Runs `op` against `key` inside one write transaction, after dropping
    /// the key if it has expired.
    fn atomically<T>(
        &self,
        key: &str,
        op: impl FnOnce(&Transaction<'_>, i64) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.open()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(LifecycleError::store("Failed to begin counter transaction"))?;
        let now_ms = Utc::now().timestamp_millis();
        purge_expired(&tx, key, now_ms)?;
        let result = op(&tx, now_ms)?;
        tx.commit()
            .map_err(LifecycleError::store("Failed to commit counter transaction"))?;
        Ok(result)
    }
}

fn purge_expired(tx: &Transaction<'_>, key: &str, now_ms: i64) -> Result<()> {
    let expired = tx
        .query_row(
            "SELECT 1 FROM counter_entries \
             WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now_ms],
            |_| Ok(()),
        )
        .optional()
        .map_err(LifecycleError::store("Failed to check counter expiry"))?
        .is_some();
    if expired {
        delete_key(tx, key)?;
    }
    Ok(())
}

fn delete_key(tx: &Transaction<'_>, key: &str) -> Result<()> {
    tx.execute("DELETE FROM counter_members WHERE key = ?1", params![key])
        .map_err(LifecycleError::store("Failed to delete counter members"))?;
    tx.execute("DELETE FROM counter_entries WHERE key = ?1", params![key])
        .map_err(LifecycleError::store("Failed to delete counter entry"))?;
    Ok(())
}

fn read_entry(tx: &Transaction<'_>, key: &str) -> Result<Option<(String, Option<String>)>> {
    tx.query_row(
        "SELECT kind, value FROM counter_entries WHERE key = ?1",
        params![key],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
    )
    .optional()
    .map_err(LifecycleError::store("Failed to read counter entry"))
}

fn read_count(tx: &Transaction<'_>, key: &str) -> Result<Option<i64>> {
    match read_entry(tx, key)? {
        None => Ok(None),
        Some((kind, value)) if kind == KIND_VALUE => value
            .as_deref()
            .unwrap_or_default()
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| LifecycleError::CorruptRecord(format!("{} is not an integer", key))),
        Some(_) => Err(LifecycleError::CorruptRecord(format!(
            "{} holds a set, not a counter",
            key
        ))),
    }
}

fn expiry_ms(now_ms: i64, ttl: Duration) -> i64 {
    now_ms.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64)
}

impl CounterStore for SqliteCounterStore {
    fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.atomically(key, |tx, now_ms| {
            let next = read_count(tx, key)?
                .unwrap_or(0)
                .checked_add(1)
                .ok_or_else(|| LifecycleError::CorruptRecord(format!("{} overflowed", key)))?;
            tx.execute(
                "INSERT INTO counter_entries (key, kind, value, expires_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(key) DO UPDATE SET \
                    value = excluded.value, \
                    expires_at = excluded.expires_at",
                params![key, KIND_VALUE, next.to_string(), expiry_ms(now_ms, ttl)],
            )
            .map_err(LifecycleError::store("Failed to increment counter"))?;
            Ok(next)
        })
    }

    fn decr(&self, key: &str) -> Result<i64> {
        self.atomically(key, |tx, _| {
            let current = match read_count(tx, key)? {
                Some(current) => current,
                None => return Ok(0),
            };
            let next = (current - 1).max(0);
            tx.execute(
                "UPDATE counter_entries SET value = ?1 WHERE key = ?2",
                params![next.to_string(), key],
            )
            .map_err(LifecycleError::store("Failed to decrement counter"))?;
            Ok(next)
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.atomically(key, |tx, _| match read_entry(tx, key)? {
            None => Ok(None),
            Some((kind, value)) if kind == KIND_VALUE => Ok(value),
            Some(_) => Err(LifecycleError::CorruptRecord(format!(
                "{} holds a set, not a value",
                key
            ))),
        })
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.atomically(key, |tx, now_ms| {
            delete_key(tx, key)?;
            tx.execute(
                "INSERT INTO counter_entries (key, kind, value, expires_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    key,
                    KIND_VALUE,
                    value,
                    ttl.map(|ttl| expiry_ms(now_ms, ttl))
                ],
            )
            .map_err(LifecycleError::store("Failed to set counter value"))?;
            Ok(())
        })
    }

    fn del(&self, key: &str) -> Result<()> {
        self.atomically(key, |tx, _| delete_key(tx, key))
    }

    fn sadd_with_ttl(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        self.atomically(key, |tx, now_ms| {
            if let Some((kind, _)) = read_entry(tx, key)? {
                if kind != KIND_SET {
                    return Err(LifecycleError::CorruptRecord(format!(
                        "{} holds a value, not a set",
                        key
                    )));
                }
            }
            tx.execute(
                "INSERT INTO counter_entries (key, kind, value, expires_at) \
                 VALUES (?1, ?2, NULL, ?3) \
                 ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
                params![key, KIND_SET, expiry_ms(now_ms, ttl)],
            )
            .map_err(LifecycleError::store("Failed to refresh set ttl"))?;
            tx.execute(
                "INSERT OR IGNORE INTO counter_members (key, member) VALUES (?1, ?2)",
                params![key, member],
            )
            .map_err(LifecycleError::store("Failed to add set member"))?;
            Ok(())
        })
    }

    fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.atomically(key, |tx, _| {
            tx.execute(
                "DELETE FROM counter_members WHERE key = ?1 AND member = ?2",
                params![key, member],
            )
            .map_err(LifecycleError::store("Failed to remove set member"))?;
            let remaining: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM counter_members WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .map_err(LifecycleError::store("Failed to count set members"))?;
            if remaining == 0 {
                tx.execute(
                    "DELETE FROM counter_entries WHERE key = ?1 AND kind = ?2",
                    params![key, KIND_SET],
                )
                .map_err(LifecycleError::store("Failed to drop empty set"))?;
            }
            Ok(())
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.atomically(key, |tx, _| {
            let mut stmt = tx
                .prepare("SELECT member FROM counter_members WHERE key = ?1 ORDER BY member")
                .map_err(LifecycleError::store("Failed to prepare members query"))?;
            let rows = stmt
                .query_map(params![key], |row| row.get::<_, String>(0))
                .map_err(LifecycleError::store("Failed to read set members"))?;

            let mut members = Vec::new();
            for row in rows {
                members.push(row.map_err(LifecycleError::store("Failed to decode set member"))?);
            }
            Ok(members)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CounterTtls, SandboxReferenceCounter};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn store() -> (tempfile::TempDir, SqliteCounterStore) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store =
            SqliteCounterStore::new(temp_dir.path().join("counters.db")).expect("store init");
        (temp_dir, store)
    }

    #[test]
    fn incr_and_decr_round_through_the_file() {
        let (_dir, store) = store();
        assert_eq!(store.incr_with_ttl("k", Duration::from_secs(60)).expect("incr"), 1);
        assert_eq!(store.incr_with_ttl("k", Duration::from_secs(60)).expect("incr"), 2);
        assert_eq!(store.decr("k").expect("decr"), 1);
        assert_eq!(store.get("k").expect("get").as_deref(), Some("1"));
    }

    #[test]
    fn expired_keys_read_as_missing() {
        let (_dir, store) = store();
        store
            .set_with_ttl("flag", "1", Some(Duration::from_millis(30)))
            .expect("set");
        assert_eq!(store.get("flag").expect("get").as_deref(), Some("1"));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get("flag").expect("get"), None);
    }

    #[test]
    fn sets_track_members() {
        let (_dir, store) = store();
        store
            .sadd_with_ttl("s", "c1", Duration::from_secs(60))
            .expect("sadd");
        store
            .sadd_with_ttl("s", "c2", Duration::from_secs(60))
            .expect("sadd");
        store.srem("s", "c1").expect("srem");
        assert_eq!(store.smembers("s").expect("members"), vec!["c2".to_string()]);
    }

    #[test]
    fn counter_and_set_kinds_do_not_mix() {
        let (_dir, store) = store();
        store
            .sadd_with_ttl("s", "c1", Duration::from_secs(60))
            .expect("sadd");
        assert!(store.incr_with_ttl("s", Duration::from_secs(60)).is_err());
        assert!(store.get("s").is_err());
    }

    #[test]
    fn incr_refuses_to_overflow() {
        let (_dir, store) = store();
        store
            .set_with_ttl("k", &i64::MAX.to_string(), None)
            .expect("set");
        assert!(matches!(
            store.incr_with_ttl("k", Duration::from_secs(60)),
            Err(LifecycleError::CorruptRecord(_))
        ));
        assert_eq!(store.get("k").expect("get"), Some(i64::MAX.to_string()));
    }

    #[test]
    fn concurrent_connections_never_lose_increments() {
        let (dir, _store) = store();
        let path = dir.path().join("counters.db");
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store: Arc<dyn CounterStore> =
                        Arc::new(SqliteCounterStore::new(path).expect("store init"));
                    let counter = SandboxReferenceCounter::new(store, CounterTtls::default());
                    barrier.wait();
                    counter.increment_active_users("sbx-1").expect("increment");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("increment thread");
        }

        let store: Arc<dyn CounterStore> =
            Arc::new(SqliteCounterStore::new(path).expect("store init"));
        let counter = SandboxReferenceCounter::new(store, CounterTtls::default());
        assert_eq!(counter.get_active_users("sbx-1").expect("read"), 3);
        for _ in 0..3 {
            counter.decrement_active_users("sbx-1");
        }
        assert_eq!(counter.get_active_users("sbx-1").expect("read"), 0);
    }
}
