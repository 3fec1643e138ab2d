//! SQLite persistence for threads and thread chats.
//!
//! Every call opens its own connection, so any number of processes can share
//! the database file. Status changes go through a single conditional UPDATE;
//! field updates run inside an IMMEDIATE transaction so appends to the message
//! log never lose a concurrent writer's entries.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use thread_lifecycle_protocol::{ChatMessage, ThreadErrorCode, ThreadStatus};

use super::{StatusSwap, ThreadStore};
use crate::error::{LifecycleError, Result};
use crate::types::{Thread, ThreadChat, ThreadChatUpdate, ThreadUpdate};

pub struct SqliteThreadStore {
    path: PathBuf,
}

impl SqliteThreadStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS threads (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    name TEXT,
                    sandbox_id TEXT,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS thread_chats (
                    id TEXT PRIMARY KEY,
                    thread_id TEXT NOT NULL REFERENCES threads(id),
                    user_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    reattempt_queue_at TEXT,
                    error_message TEXT,
                    error_message_info TEXT,
                    messages TEXT NOT NULL DEFAULT '[]',
                    unread INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS thread_chats_thread_idx
                    ON thread_chats (thread_id, user_id);
                 COMMIT;",
            )
            .map_err(LifecycleError::store("Failed to initialize schema"))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| LifecycleError::Io {
                context: "Failed to create thread store dir".to_string(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(LifecycleError::store("Failed to open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(LifecycleError::store("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(LifecycleError::store("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(LifecycleError::store("Failed to set busy_timeout"))?;

        Ok(conn)
    }
}

impl ThreadStore for SqliteThreadStore {
    fn get_thread(&self, thread_id: &str, user_id: &str) -> Result<Option<Thread>> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, name, sandbox_id, updated_at \
                     FROM threads WHERE id = ?1 AND user_id = ?2",
                    params![thread_id, user_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(LifecycleError::store("Failed to query thread"))?;

            row.map(|(id, user_id, name, sandbox_id, updated_at)| {
                Ok(Thread {
                    id,
                    user_id,
                    name,
                    sandbox_id,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            })
            .transpose()
        })
    }

    fn get_thread_chat(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Option<ThreadChat>> {
        self.with_connection(|conn| load_chat(conn, thread_id, chat_id, user_id))
    }

    fn atomic_update_status(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
        swap: StatusSwap,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let reattempt_queue_at = swap.reattempt_queue_at.map(|value| value.to_rfc3339());
        self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE thread_chats SET \
                        status = ?1, \
                        reattempt_queue_at = COALESCE(?2, reattempt_queue_at), \
                        updated_at = ?3 \
                     WHERE id = ?4 AND thread_id = ?5 AND user_id = ?6 AND status = ?7",
                    params![
                        swap.to.as_str(),
                        reattempt_queue_at,
                        now,
                        chat_id,
                        thread_id,
                        user_id,
                        swap.from.as_str()
                    ],
                )
                .map_err(LifecycleError::store("Failed to update thread chat status"))?;
            Ok(changed > 0)
        })
    }

    fn update_thread(&self, thread_id: &str, user_id: &str, update: &ThreadUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(LifecycleError::store("Failed to begin thread update"))?;

            let current = tx
                .query_row(
                    "SELECT name, sandbox_id FROM threads WHERE id = ?1 AND user_id = ?2",
                    params![thread_id, user_id],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                        ))
                    },
                )
                .optional()
                .map_err(LifecycleError::store("Failed to read thread for update"))?;
            let (name, sandbox_id) =
                current.ok_or_else(|| LifecycleError::ThreadNotFound(thread_id.to_string()))?;

            let name = update.name.clone().or(name);
            let sandbox_id = match &update.sandbox_id {
                Some(value) => value.clone(),
                None => sandbox_id,
            };

            tx.execute(
                "UPDATE threads SET name = ?1, sandbox_id = ?2, updated_at = ?3 \
                 WHERE id = ?4 AND user_id = ?5",
                params![name, sandbox_id, Utc::now().to_rfc3339(), thread_id, user_id],
            )
            .map_err(LifecycleError::store("Failed to update thread"))?;
            tx.commit()
                .map_err(LifecycleError::store("Failed to commit thread update"))
        })
    }

    fn update_thread_chat(
        &self,
        thread_id: &str,
        chat_id: &str,
        user_id: &str,
        update: &ThreadChatUpdate,
    ) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(LifecycleError::store("Failed to begin thread chat update"))?;

            let mut chat = load_chat(&tx, thread_id, chat_id, user_id)?.ok_or_else(|| {
                LifecycleError::ThreadChatNotFound {
                    thread_id: thread_id.to_string(),
                    chat_id: chat_id.to_string(),
                }
            })?;

            if let Some(error_message) = update.error_message {
                chat.error_message = error_message;
            }
            if let Some(info) = &update.error_message_info {
                chat.error_message_info = info.clone();
            }
            if let Some(unread) = update.unread {
                chat.unread = unread;
            }
            chat.messages.extend(update.append_messages.iter().cloned());

            let messages = serde_json::to_string(&chat.messages)
                .map_err(LifecycleError::serialization("Failed to serialize messages"))?;

            tx.execute(
                "UPDATE thread_chats SET \
                    error_message = ?1, \
                    error_message_info = ?2, \
                    unread = ?3, \
                    messages = ?4, \
                    updated_at = ?5 \
                 WHERE id = ?6 AND thread_id = ?7 AND user_id = ?8",
                params![
                    chat.error_message.map(|code| code.as_str()),
                    chat.error_message_info,
                    chat.unread,
                    messages,
                    Utc::now().to_rfc3339(),
                    chat_id,
                    thread_id,
                    user_id
                ],
            )
            .map_err(LifecycleError::store("Failed to update thread chat"))?;
            tx.commit()
                .map_err(LifecycleError::store("Failed to commit thread chat update"))
        })
    }

    fn insert_thread(&self, thread: &Thread) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO threads (id, user_id, name, sandbox_id, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    thread.id,
                    thread.user_id,
                    thread.name,
                    thread.sandbox_id,
                    thread.updated_at.to_rfc3339()
                ],
            )
            .map_err(LifecycleError::store("Failed to insert thread"))?;
            Ok(())
        })
    }

    fn insert_thread_chat(&self, chat: &ThreadChat) -> Result<()> {
        let messages = serde_json::to_string(&chat.messages)
            .map_err(LifecycleError::serialization("Failed to serialize messages"))?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO thread_chats \
                    (id, thread_id, user_id, status, reattempt_queue_at, error_message, \
                     error_message_info, messages, unread, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    chat.id,
                    chat.thread_id,
                    chat.user_id,
                    chat.status.as_str(),
                    chat.reattempt_queue_at.map(|value| value.to_rfc3339()),
                    chat.error_message.map(|code| code.as_str()),
                    chat.error_message_info,
                    messages,
                    chat.unread,
                    chat.updated_at.to_rfc3339()
                ],
            )
            .map_err(LifecycleError::store("Failed to insert thread chat"))?;
            Ok(())
        })
    }
}

struct ChatRow {
    id: String,
    thread_id: String,
    user_id: String,
    status: String,
    reattempt_queue_at: Option<String>,
    error_message: Option<String>,
    error_message_info: Option<String>,
    messages: String,
    unread: bool,
    updated_at: String,
}

fn load_chat(
    conn: &Connection,
    thread_id: &str,
    chat_id: &str,
    user_id: &str,
) -> Result<Option<ThreadChat>> {
    let row = conn
        .query_row(
            "SELECT id, thread_id, user_id, status, reattempt_queue_at, error_message, \
                    error_message_info, messages, unread, updated_at \
             FROM thread_chats WHERE id = ?1 AND thread_id = ?2 AND user_id = ?3",
            params![chat_id, thread_id, user_id],
            |row| {
                Ok(ChatRow {
                    id: row.get(0)?,
                    thread_id: row.get(1)?,
                    user_id: row.get(2)?,
                    status: row.get(3)?,
                    reattempt_queue_at: row.get(4)?,
                    error_message: row.get(5)?,
                    error_message_info: row.get(6)?,
                    messages: row.get(7)?,
                    unread: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            },
        )
        .optional()
        .map_err(LifecycleError::store("Failed to query thread chat"))?;

    row.map(chat_from_row).transpose()
}

fn chat_from_row(row: ChatRow) -> Result<ThreadChat> {
    let status = row.status.parse::<ThreadStatus>().map_err(|err| {
        LifecycleError::CorruptRecord(format!("thread chat {}: {}", row.id, err))
    })?;
    let messages: Vec<ChatMessage> = serde_json::from_str(&row.messages)
        .map_err(LifecycleError::serialization("Failed to parse messages"))?;

    Ok(ThreadChat {
        id: row.id,
        thread_id: row.thread_id,
        user_id: row.user_id,
        status,
        reattempt_queue_at: row
            .reattempt_queue_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        error_message: row.error_message.as_deref().map(ThreadErrorCode::from_stored),
        error_message_info: row.error_message_info,
        messages,
        unread: row.unread,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| LifecycleError::CorruptRecord(format!("bad timestamp {}: {}", value, err)))
}
