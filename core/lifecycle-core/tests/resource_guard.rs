mod common;

use std::cell::{Cell, RefCell};

use common::{
    Harness, RecordedError, RecordingNotifier, RecordingObserver, RecordingProvider, CHAT_ID,
    SANDBOX_ID, THREAD_ID, USER_ID,
};
use thread_lifecycle::{
    BoxError, ChatHooks, ChatMessage, ChatScope, SessionHooks, ThreadError, ThreadErrorCode,
    ThreadStatus,
};

fn scope() -> ChatScope<'static> {
    ChatScope::new(THREAD_ID, CHAT_ID, USER_ID)
}

#[test]
fn plain_failure_is_persisted_and_hooks_run_once() {
    let harness = Harness::new(ThreadStatus::Working, None);
    let errors = RefCell::new(Vec::new());
    let exits = Cell::new(0);

    let result: Option<()> = harness.guard.with_thread_chat(
        scope(),
        ChatHooks::default()
            .on_error(|err| errors.borrow_mut().push(err.to_string()))
            .on_exit(|chat| {
                assert!(chat.is_some());
                exits.set(exits.get() + 1);
                Ok(())
            }),
        |_chat| Err("TEST ERROR".into()),
    );

    assert_eq!(result, None);
    assert_eq!(*errors.borrow(), vec!["TEST ERROR".to_string()]);
    assert_eq!(exits.get(), 1);

    let chat = harness.chat();
    assert_eq!(chat.status, ThreadStatus::Complete);
    assert_eq!(chat.error_message, Some(ThreadErrorCode::UnknownError));
    assert_eq!(chat.error_message_info.as_deref(), Some("TEST ERROR"));
    assert!(chat.unread);
    match chat.messages.last() {
        Some(ChatMessage::Error {
            error_type,
            error_info,
            ..
        }) => {
            assert_eq!(*error_type, ThreadErrorCode::UnknownError);
            assert_eq!(error_info, "TEST ERROR");
        }
        other => panic!("expected error record, got {:?}", other),
    }

    assert_eq!(
        *harness.observer.errors.lock().unwrap(),
        vec![RecordedError {
            chat_id: Some(CHAT_ID.to_string()),
            code: ThreadErrorCode::UnknownError,
            info: "TEST ERROR".to_string(),
        }]
    );
    assert_eq!(
        *harness.notifier.updates.lock().unwrap(),
        vec![ThreadStatus::Complete]
    );
}

#[test]
fn domain_error_keeps_its_code() {
    let harness = Harness::new(ThreadStatus::Booting, None);

    let result: Option<()> = harness.guard.with_thread_chat(scope(), ChatHooks::default(), |_| {
        Err(ThreadError::new(ThreadErrorCode::AgentGenericError, "ERROR MESSAGE").into())
    });

    assert_eq!(result, None);
    let chat = harness.chat();
    assert_eq!(chat.status, ThreadStatus::Complete);
    assert_eq!(chat.error_message, Some(ThreadErrorCode::AgentGenericError));
    assert_eq!(chat.error_message_info.as_deref(), Some("ERROR MESSAGE"));
}

#[test]
fn success_returns_value_and_leaves_chat_alone() {
    let harness = Harness::new(ThreadStatus::Working, None);
    let errors = Cell::new(0);
    let exits = Cell::new(0);

    let result = harness.guard.with_thread_chat(
        scope(),
        ChatHooks::default()
            .on_error(|_| errors.set(errors.get() + 1))
            .on_exit(|_| {
                exits.set(exits.get() + 1);
                Ok(())
            }),
        |chat| Ok(chat.map(|chat| chat.status)),
    );

    assert_eq!(result, Some(Some(ThreadStatus::Working)));
    assert_eq!(errors.get(), 0);
    assert_eq!(exits.get(), 1);
    assert_eq!(harness.chat().status, ThreadStatus::Working);
    assert!(harness.observer.errors.lock().unwrap().is_empty());
}

#[test]
fn panicking_work_is_treated_as_failure() {
    let harness = Harness::new(ThreadStatus::Working, None);

    let result: Option<()> =
        harness
            .guard
            .with_thread_chat(scope(), ChatHooks::default(), |_| panic!("agent crashed"));

    assert_eq!(result, None);
    let chat = harness.chat();
    assert_eq!(chat.status, ThreadStatus::Complete);
    assert_eq!(chat.error_message, Some(ThreadErrorCode::UnknownError));
    assert_eq!(
        chat.error_message_info.as_deref(),
        Some("panicked: agent crashed")
    );
}

#[test]
fn failing_or_panicking_on_exit_does_not_change_result() {
    let harness = Harness::new(ThreadStatus::Working, None);

    let failed_exit = harness.guard.with_thread_chat(
        scope(),
        ChatHooks::default().on_exit(|_| Err::<(), BoxError>("cleanup failed".into())),
        |_| Ok(1),
    );
    assert_eq!(failed_exit, Some(1));

    let panicked_exit = harness.guard.with_thread_chat(
        scope(),
        ChatHooks::default().on_exit(|_| panic!("cleanup exploded")),
        |_| Ok(2),
    );
    assert_eq!(panicked_exit, Some(2));
    assert_eq!(harness.chat().status, ThreadStatus::Working);
}

#[test]
fn missing_chat_is_reported_without_chat_update() {
    let harness = Harness::new(ThreadStatus::Working, None);
    let ran = Cell::new(false);

    let result: Option<()> = harness.guard.with_thread_chat(
        ChatScope::new(THREAD_ID, "chat-404", USER_ID),
        ChatHooks::default(),
        |_| {
            ran.set(true);
            Ok(())
        },
    );

    assert_eq!(result, None);
    assert!(!ran.get());
    assert_eq!(harness.observer.errors.lock().unwrap().len(), 1);
    assert_eq!(harness.chat().status, ThreadStatus::Working);
}

#[test]
fn work_without_chat_reports_to_observer_only() {
    let harness = Harness::new(ThreadStatus::Working, None);

    let result: Option<()> = harness.guard.with_thread_chat(
        ChatScope::without_chat(THREAD_ID, USER_ID),
        ChatHooks::default(),
        |chat| {
            assert!(chat.is_none());
            Err("no chat here".into())
        },
    );

    assert_eq!(result, None);
    let errors = harness.observer.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].chat_id, None);
    assert_eq!(harness.chat().status, ThreadStatus::Working);
}

#[test]
fn sandbox_session_claims_and_releases_sandbox() {
    let harness = Harness::new(ThreadStatus::Working, Some(SANDBOX_ID));
    let exits = Cell::new(0);

    let seen = harness.guard.with_thread_sandbox_session(
        scope(),
        SessionHooks::default().on_exit(|_| {
            exits.set(exits.get() + 1);
            Ok(())
        }),
        |ctx| {
            let active = harness.counter.get_active_users(SANDBOX_ID)?;
            let session = ctx.session.map(|session| session.sandbox_id.clone());
            Ok((active, session))
        },
    );

    assert_eq!(seen, Some((1, Some(SANDBOX_ID.to_string()))));
    assert_eq!(exits.get(), 1);
    assert_eq!(
        harness.counter.get_active_users(SANDBOX_ID).expect("count"),
        0
    );
    assert_eq!(*harness.provider.extended.lock().unwrap(), 1);
    assert_eq!(
        *harness.observer.usage.lock().unwrap(),
        vec![SANDBOX_ID.to_string()]
    );
    assert!(harness.wait_for_hibernation(SANDBOX_ID));
}

#[test]
fn open_chat_tab_keeps_sandbox_awake() {
    let harness = Harness::new(ThreadStatus::Working, Some(SANDBOX_ID));
    harness
        .counter
        .set_active_thread_chat(SANDBOX_ID, CHAT_ID, true)
        .expect("mark chat open");

    let result = harness
        .guard
        .with_thread_sandbox_session(scope(), SessionHooks::default(), |_| Ok(()));
    assert_eq!(result, Some(()));

    std::thread::sleep(std::time::Duration::from_millis(100));
    assert!(harness.provider.hibernated.lock().unwrap().is_empty());
}

#[test]
fn declined_before_exec_skips_work_and_sandbox() {
    let harness = Harness::new(ThreadStatus::Working, Some(SANDBOX_ID));
    let ran = Cell::new(false);
    let exits = Cell::new(0);

    let result = harness.guard.with_thread_sandbox_session(
        scope(),
        SessionHooks::default()
            .on_before_exec(|chat| chat.map(|c| c.status) != Some(ThreadStatus::Working))
            .on_exit(|_| {
                exits.set(exits.get() + 1);
                Ok(())
            }),
        |_| {
            ran.set(true);
            Ok(())
        },
    );

    assert_eq!(result, None);
    assert!(!ran.get());
    assert_eq!(exits.get(), 1);
    assert_eq!(*harness.provider.resolved.lock().unwrap(), 0);
    assert!(harness.observer.usage.lock().unwrap().is_empty());
    assert_eq!(harness.chat().status, ThreadStatus::Working);
}

#[test]
fn thread_without_sandbox_runs_without_session() {
    let harness = Harness::new(ThreadStatus::Working, None);

    let had_session = harness
        .guard
        .with_thread_sandbox_session(scope(), SessionHooks::default(), |ctx| {
            Ok(ctx.session.is_some())
        });

    assert_eq!(had_session, Some(false));
    assert_eq!(*harness.provider.resolved.lock().unwrap(), 0);
    assert!(harness.observer.usage.lock().unwrap().is_empty());
}

#[test]
fn failing_sandbox_work_still_cleans_up() {
    let harness = Harness::with_provider(
        ThreadStatus::Working,
        Some(SANDBOX_ID),
        RecordingProvider {
            fail_extend: true,
            ..RecordingProvider::default()
        },
    );
    let errors = Cell::new(0);

    let result: Option<()> = harness.guard.with_thread_sandbox_session(
        scope(),
        SessionHooks::default()
            .on_error(|_| errors.set(errors.get() + 1))
            .on_exit(|_| panic!("exit hook exploded")),
        |ctx| {
            assert!(ctx.session.is_some());
            Err(ThreadError::new(ThreadErrorCode::GitCheckpointPushFailed, "push rejected").into())
        },
    );

    assert_eq!(result, None);
    assert_eq!(errors.get(), 1);
    let chat = harness.chat();
    assert_eq!(chat.status, ThreadStatus::Complete);
    assert_eq!(
        chat.error_message,
        Some(ThreadErrorCode::GitCheckpointPushFailed)
    );
    assert_eq!(
        harness.counter.get_active_users(SANDBOX_ID).expect("count"),
        0
    );
    assert_eq!(
        *harness.observer.usage.lock().unwrap(),
        vec![SANDBOX_ID.to_string()]
    );
    assert!(harness.wait_for_hibernation(SANDBOX_ID));
}

#[test]
fn failed_session_resolution_still_reports_usage_and_schedules_hibernation() {
    let harness = Harness::with_provider(
        ThreadStatus::Working,
        Some(SANDBOX_ID),
        RecordingProvider {
            fail_resolve: true,
            ..RecordingProvider::default()
        },
    );
    let ran = Cell::new(false);
    let exits = Cell::new(0);

    let result = harness.guard.with_thread_sandbox_session(
        scope(),
        SessionHooks::default().on_exit(|_| {
            exits.set(exits.get() + 1);
            Ok(())
        }),
        |_| {
            ran.set(true);
            Ok(())
        },
    );

    assert_eq!(result, None);
    assert!(!ran.get());
    assert_eq!(exits.get(), 1);
    let chat = harness.chat();
    assert_eq!(chat.status, ThreadStatus::Complete);
    assert_eq!(chat.error_message, Some(ThreadErrorCode::SandboxResumeFailed));
    assert_eq!(
        harness.counter.get_active_users(SANDBOX_ID).expect("count"),
        0
    );
    assert_eq!(
        *harness.observer.usage.lock().unwrap(),
        vec![SANDBOX_ID.to_string()]
    );
    assert!(harness.wait_for_hibernation(SANDBOX_ID));
}

#[test]
fn missing_provider_session_still_schedules_hibernation() {
    let harness = Harness::with_provider(
        ThreadStatus::Working,
        Some(SANDBOX_ID),
        RecordingProvider {
            no_session: true,
            ..RecordingProvider::default()
        },
    );

    let had_session = harness
        .guard
        .with_thread_sandbox_session(scope(), SessionHooks::default(), |ctx| {
            Ok(ctx.session.is_some())
        });

    assert_eq!(had_session, Some(false));
    assert_eq!(*harness.provider.extended.lock().unwrap(), 0);
    assert_eq!(
        *harness.observer.usage.lock().unwrap(),
        vec![SANDBOX_ID.to_string()]
    );
    assert!(harness.wait_for_hibernation(SANDBOX_ID));
}

#[test]
fn panicking_observer_does_not_skip_cleanup() {
    let harness = Harness::with_sinks(
        ThreadStatus::Working,
        Some(SANDBOX_ID),
        RecordingProvider::default(),
        RecordingObserver {
            panic_on_error: true,
            ..RecordingObserver::default()
        },
        RecordingNotifier::default(),
    );
    let errors = Cell::new(0);
    let exits = Cell::new(0);

    let result: Option<()> = harness.guard.with_thread_sandbox_session(
        scope(),
        SessionHooks::default()
            .on_error(|_| errors.set(errors.get() + 1))
            .on_exit(|_| {
                exits.set(exits.get() + 1);
                Ok(())
            }),
        |_| Err("agent crashed".into()),
    );

    assert_eq!(result, None);
    assert_eq!(errors.get(), 1);
    assert_eq!(exits.get(), 1);
    assert_eq!(harness.chat().status, ThreadStatus::Complete);
    assert_eq!(
        harness.counter.get_active_users(SANDBOX_ID).expect("count"),
        0
    );
    assert!(harness.wait_for_hibernation(SANDBOX_ID));
}

#[test]
fn panicking_notifier_does_not_skip_cleanup() {
    let harness = Harness::with_sinks(
        ThreadStatus::Working,
        None,
        RecordingProvider::default(),
        RecordingObserver::default(),
        RecordingNotifier {
            panic_on_update: true,
            ..RecordingNotifier::default()
        },
    );
    let exits = Cell::new(0);

    let result: Option<()> = harness.guard.with_thread_chat(
        scope(),
        ChatHooks::default().on_exit(|_| {
            exits.set(exits.get() + 1);
            Ok(())
        }),
        |_| Err("agent crashed".into()),
    );

    assert_eq!(result, None);
    assert_eq!(exits.get(), 1);
    assert_eq!(harness.chat().status, ThreadStatus::Complete);
    assert_eq!(harness.observer.errors.lock().unwrap().len(), 1);
}
