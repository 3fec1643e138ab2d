//! Sandbox presence subcommands.

use std::time::Duration;

use serde::Serialize;
use thread_lifecycle::sandbox::maybe_hibernate;
use thread_lifecycle::SandboxSession;

use crate::runtime::Runtime;
use crate::threads::print_json;

pub fn status(runtime: &Runtime, sandbox_id: &str) -> Result<(), String> {
    let presence = runtime
        .counter
        .snapshot(sandbox_id)
        .map_err(|err| format!("Failed to read sandbox presence: {}", err))?;
    print_json(&presence)
}

pub fn set_chat(
    runtime: &Runtime,
    sandbox_id: &str,
    chat_id: &str,
    active: bool,
) -> Result<(), String> {
    runtime
        .counter
        .set_active_thread_chat(sandbox_id, chat_id, active)
        .map_err(|err| format!("Failed to update active chats: {}", err))?;
    status(runtime, sandbox_id)
}

pub fn set_terminal(
    runtime: &Runtime,
    sandbox_id: &str,
    ttl_secs: Option<u64>,
) -> Result<(), String> {
    let result = match ttl_secs {
        Some(secs) => runtime
            .counter
            .set_terminal_active(sandbox_id, Duration::from_secs(secs)),
        None => runtime.counter.clear_terminal_active(sandbox_id),
    };
    result.map_err(|err| format!("Failed to update terminal flag: {}", err))?;
    status(runtime, sandbox_id)
}

#[derive(Debug, Serialize)]
struct HibernateReport<'a> {
    sandbox_id: &'a str,
    hibernated: bool,
}

/// Runs the hibernation check synchronously, as the scheduler would after its
/// delay.
pub fn hibernate(runtime: &Runtime, sandbox_id: &str) -> Result<(), String> {
    let session = SandboxSession {
        sandbox_id: sandbox_id.to_string(),
        provider: "cli".to_string(),
    };
    let hibernated = maybe_hibernate(&runtime.counter, runtime.provider.as_ref(), &session)
        .map_err(|err| format!("Hibernation check failed: {}", err))?;
    print_json(&HibernateReport {
        sandbox_id,
        hibernated,
    })
}
