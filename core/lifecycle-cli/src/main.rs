//! thread-lifecycle: operator CLI for thread lifecycle coordination.
//!
//! Drives the same stores the services use, so an operator can inspect a
//! chat, feed it an event by hand, or check whether a sandbox may sleep.
//!
//! ## Subcommands
//!
//! - `thread create`, `chat create`: seed records
//! - `event`: apply one lifecycle event and print the outcome
//! - `show`, `read`: inspect a chat or clear its unread flag
//! - `run`: run guarded work against a chat's sandbox
//! - `sandbox`: presence signals and an on-demand hibernation check

mod logging;
mod runtime;
mod sandbox;
mod threads;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thread_lifecycle::{ChatScope, ThreadErrorCode, ThreadEvent, ThreadStatus};

use crate::runtime::Runtime;

#[derive(Parser)]
#[command(name = "thread-lifecycle")]
#[command(about = "Thread lifecycle coordinator")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.thread-lifecycle/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Thread records
    Thread {
        #[command(subcommand)]
        command: ThreadCommands,
    },

    /// Thread chat records
    Chat {
        #[command(subcommand)]
        command: ChatCommands,
    },

    /// Apply an event to a chat (e.g. system.boot, user.stop)
    Event {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        chat: String,
        #[arg(long)]
        user: String,

        #[arg(value_name = "EVENT")]
        event: ThreadEvent,

        /// Upstream rate-limit reset time (RFC 3339)
        #[arg(long, value_name = "TIME")]
        reattempt_at: Option<DateTime<Utc>>,

        /// Mark the chat unread if its status changes
        #[arg(long)]
        mark_unread: bool,

        /// Clear stored error fields along with the transition
        #[arg(long)]
        clear_error: bool,
    },

    /// Print a chat as JSON
    Show {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        chat: String,
        #[arg(long)]
        user: String,
    },

    /// Clear a chat's unread flag
    Read {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        chat: String,
        #[arg(long)]
        user: String,
    },

    /// Run guarded work against the chat's sandbox
    Run {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        chat: Option<String>,
        #[arg(long)]
        user: String,

        /// Make the work fail with this message
        #[arg(long, value_name = "MESSAGE")]
        fail: Option<String>,

        /// Error code used with --fail
        #[arg(long, default_value = "unknown-error")]
        code: ThreadErrorCode,
    },

    /// Sandbox presence signals
    Sandbox {
        #[command(subcommand)]
        command: SandboxCommands,
    },
}

#[derive(Subcommand)]
enum ThreadCommands {
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        sandbox: Option<String>,
        /// Explicit id (defaults to a new ULID)
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChatCommands {
    Create {
        #[arg(long)]
        thread: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "draft")]
        status: ThreadStatus,
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Subcommand)]
enum SandboxCommands {
    /// Print presence signals and the hibernation verdict
    Status {
        #[arg(value_name = "SANDBOX")]
        sandbox: String,
    },

    /// Mark a chat tab open or closed on the sandbox
    Chat {
        #[arg(value_name = "SANDBOX")]
        sandbox: String,
        #[arg(value_name = "CHAT")]
        chat: String,
        #[arg(long)]
        closed: bool,
    },

    /// Set the terminal flag for a TTL, or clear it
    Terminal {
        #[arg(value_name = "SANDBOX")]
        sandbox: String,
        #[arg(long, value_name = "SECS", conflicts_with = "clear")]
        ttl_secs: Option<u64>,
        #[arg(long)]
        clear: bool,
    },

    /// Hibernate now if nothing references the sandbox
    Hibernate {
        #[arg(value_name = "SANDBOX")]
        sandbox: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match runtime::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            let _logging_guard = logging::init(None);
            tracing::error!(error = %err, "thread-lifecycle failed");
            std::process::exit(1);
        }
    };
    let _logging_guard = logging::init(runtime::data_dir(&config).as_deref());

    if let Err(err) = Runtime::open(&config).and_then(|runtime| dispatch(&runtime, cli.command)) {
        tracing::error!(error = %err, "thread-lifecycle failed");
        std::process::exit(1);
    }
}

fn dispatch(runtime: &Runtime, command: Commands) -> Result<(), String> {
    match command {
        Commands::Thread {
            command:
                ThreadCommands::Create {
                    user,
                    name,
                    sandbox,
                    id,
                },
        } => threads::create_thread(runtime, &user, name, sandbox, id),
        Commands::Chat {
            command:
                ChatCommands::Create {
                    thread,
                    user,
                    status,
                    id,
                },
        } => threads::create_chat(runtime, &thread, &user, status, id),
        Commands::Event {
            thread,
            chat,
            user,
            event,
            reattempt_at,
            mark_unread,
            clear_error,
        } => threads::apply_event(
            runtime,
            threads::EventArgs {
                thread_id: &thread,
                chat_id: &chat,
                user_id: &user,
                event,
                reattempt_at,
                mark_unread,
                clear_error,
            },
        ),
        Commands::Show { thread, chat, user } => threads::show(runtime, &thread, &chat, &user),
        Commands::Read { thread, chat, user } => {
            threads::mark_read(runtime, &thread, &chat, &user)
        }
        Commands::Run {
            thread,
            chat,
            user,
            fail,
            code,
        } => {
            let scope = match chat.as_deref() {
                Some(chat) => ChatScope::new(&thread, chat, &user),
                None => ChatScope::without_chat(&thread, &user),
            };
            threads::run(runtime, scope, fail.map(|info| (code, info)))
        }
        Commands::Sandbox { command } => match command {
            SandboxCommands::Status { sandbox } => sandbox::status(runtime, &sandbox),
            SandboxCommands::Chat {
                sandbox,
                chat,
                closed,
            } => sandbox::set_chat(runtime, &sandbox, &chat, !closed),
            SandboxCommands::Terminal {
                sandbox,
                ttl_secs,
                clear,
            } => {
                if !clear && ttl_secs.is_none() {
                    return Err("Pass --ttl-secs or --clear".to_string());
                }
                sandbox::set_terminal(runtime, &sandbox, ttl_secs)
            }
            SandboxCommands::Hibernate { sandbox } => sandbox::hibernate(runtime, &sandbox),
        },
    }
}
