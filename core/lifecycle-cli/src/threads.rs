//! Thread and chat subcommands.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thread_lifecycle::{
    ChatScope, SessionHooks, Thread, ThreadChat, ThreadChatUpdate, ThreadError,
    ThreadErrorCode, ThreadEvent, ThreadStatus, ThreadStore, TransitionRequest,
};

use crate::runtime::Runtime;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| format!("Failed to serialize output: {}", err))?;
    println!("{}", json);
    Ok(())
}

pub fn create_thread(
    runtime: &Runtime,
    user_id: &str,
    name: Option<String>,
    sandbox_id: Option<String>,
    id: Option<String>,
) -> Result<(), String> {
    let thread = Thread {
        id: id.unwrap_or_else(|| ulid::Ulid::new().to_string()),
        user_id: user_id.to_string(),
        name,
        sandbox_id,
        updated_at: Utc::now(),
    };
    runtime
        .store
        .insert_thread(&thread)
        .map_err(|err| format!("Failed to create thread: {}", err))?;
    tracing::info!(thread_id = %thread.id, user_id = %user_id, "Created thread");
    print_json(&thread)
}

pub fn create_chat(
    runtime: &Runtime,
    thread_id: &str,
    user_id: &str,
    status: ThreadStatus,
    id: Option<String>,
) -> Result<(), String> {
    runtime
        .store
        .get_thread(thread_id, user_id)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("Thread not found: {}", thread_id))?;

    let chat = ThreadChat {
        id: id.unwrap_or_else(|| ulid::Ulid::new().to_string()),
        thread_id: thread_id.to_string(),
        user_id: user_id.to_string(),
        status,
        reattempt_queue_at: None,
        error_message: None,
        error_message_info: None,
        messages: Vec::new(),
        unread: false,
        updated_at: Utc::now(),
    };
    runtime
        .store
        .insert_thread_chat(&chat)
        .map_err(|err| format!("Failed to create chat: {}", err))?;
    tracing::info!(thread_id = %thread_id, chat_id = %chat.id, status = %status, "Created chat");
    print_json(&chat)
}

pub struct EventArgs<'a> {
    pub thread_id: &'a str,
    pub chat_id: &'a str,
    pub user_id: &'a str,
    pub event: ThreadEvent,
    pub reattempt_at: Option<DateTime<Utc>>,
    pub mark_unread: bool,
    pub clear_error: bool,
}

pub fn apply_event(runtime: &Runtime, args: EventArgs<'_>) -> Result<(), String> {
    let mut request =
        TransitionRequest::new(args.thread_id, args.chat_id, args.user_id, args.event);
    if let Some(at) = args.reattempt_at {
        request = request.reattempt_at(at);
    }
    if args.clear_error {
        request = request.with_chat_update(ThreadChatUpdate::clear_error());
    }
    if args.mark_unread {
        request = request.mark_as_unread();
    }

    let outcome = runtime
        .guard
        .coordinator()
        .apply_transition(request)
        .map_err(|err| err.to_string())?;
    print_json(&outcome)
}

pub fn show(runtime: &Runtime, thread_id: &str, chat_id: &str, user_id: &str) -> Result<(), String> {
    let chat = runtime
        .store
        .get_thread_chat(thread_id, chat_id, user_id)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("Chat not found: {}/{}", thread_id, chat_id))?;
    print_json(&chat)
}

#[derive(Debug, Serialize)]
struct RunReport {
    completed: bool,
    sandbox_id: Option<String>,
    status: Option<ThreadStatus>,
}

/// Runs a guarded unit of work against a chat's sandbox. `fail` makes the
/// work fail with the given code and message, as an agent error would.
pub fn run(
    runtime: &Runtime,
    scope: ChatScope<'_>,
    fail: Option<(ThreadErrorCode, String)>,
) -> Result<(), String> {
    let sandbox = runtime
        .guard
        .with_thread_sandbox_session(scope, SessionHooks::default(), |ctx| {
            if let Some((code, info)) = fail {
                return Err(ThreadError::new(code, info).into());
            }
            Ok(ctx.session.map(|session| session.sandbox_id.clone()))
        });

    let status = match scope.chat_id {
        Some(chat_id) => runtime
            .store
            .get_thread_chat(scope.thread_id, chat_id, scope.user_id)
            .map_err(|err| err.to_string())?
            .map(|chat| chat.status),
        None => None,
    };

    print_json(&RunReport {
        completed: sandbox.is_some(),
        sandbox_id: sandbox.flatten(),
        status,
    })
}

pub fn mark_read(runtime: &Runtime, thread_id: &str, chat_id: &str, user_id: &str) -> Result<(), String> {
    let update = ThreadChatUpdate {
        unread: Some(false),
        ..ThreadChatUpdate::default()
    };
    runtime
        .guard
        .coordinator()
        .update_thread_chat(thread_id, chat_id, user_id, &update)
        .map_err(|err| format!("Failed to mark chat read: {}", err))
}
