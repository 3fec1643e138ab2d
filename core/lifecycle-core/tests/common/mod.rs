#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use thread_lifecycle::{
    BoxError, CounterTtls, MemoryCounterStore, Notifier, Observer, ResourceGuard,
    SandboxProvider, SandboxReferenceCounter, SandboxSession, SqliteThreadStore, Thread,
    ThreadChat, ThreadError, ThreadErrorCode, ThreadStatus, ThreadStore, TransitionCoordinator,
};

pub const THREAD_ID: &str = "thread-1";
pub const CHAT_ID: &str = "chat-1";
pub const USER_ID: &str = "user-1";
pub const SANDBOX_ID: &str = "sbx-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    pub chat_id: Option<String>,
    pub code: ThreadErrorCode,
    pub info: String,
}

#[derive(Default)]
pub struct RecordingObserver {
    pub errors: Mutex<Vec<RecordedError>>,
    pub usage: Mutex<Vec<String>>,
    pub panic_on_error: bool,
}

impl Observer for RecordingObserver {
    fn thread_error(
        &self,
        _thread_id: &str,
        chat_id: Option<&str>,
        _user_id: &str,
        error: &ThreadError,
    ) {
        if self.panic_on_error {
            panic!("error sink unavailable");
        }
        self.errors.lock().unwrap().push(RecordedError {
            chat_id: chat_id.map(str::to_string),
            code: error.code,
            info: error.info.clone(),
        });
    }

    fn sandbox_usage(&self, sandbox_id: &str, _thread_id: &str, _user_id: &str, _d: Duration) {
        self.usage.lock().unwrap().push(sandbox_id.to_string());
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub updates: Mutex<Vec<ThreadStatus>>,
    pub panic_on_update: bool,
}

impl Notifier for RecordingNotifier {
    fn thread_chat_updated(
        &self,
        _user_id: &str,
        _thread_id: &str,
        _chat_id: &str,
        status: ThreadStatus,
    ) {
        if self.panic_on_update {
            panic!("push channel closed");
        }
        self.updates.lock().unwrap().push(status);
    }
}

#[derive(Default)]
pub struct RecordingProvider {
    pub resolved: Mutex<usize>,
    pub extended: Mutex<usize>,
    pub hibernated: Mutex<Vec<String>>,
    pub fail_extend: bool,
    pub fail_resolve: bool,
    pub no_session: bool,
}

impl SandboxProvider for RecordingProvider {
    fn get_sandbox_for_thread(
        &self,
        thread: &Thread,
    ) -> Result<Option<SandboxSession>, ThreadError> {
        *self.resolved.lock().unwrap() += 1;
        if self.fail_resolve {
            return Err(ThreadError::new(
                ThreadErrorCode::SandboxResumeFailed,
                "sandbox did not come back",
            ));
        }
        if self.no_session {
            return Ok(None);
        }
        Ok(thread.sandbox_id.as_ref().map(|sandbox_id| SandboxSession {
            sandbox_id: sandbox_id.clone(),
            provider: "recording".to_string(),
        }))
    }

    fn extend_sandbox_life(&self, _session: &SandboxSession) -> Result<(), BoxError> {
        *self.extended.lock().unwrap() += 1;
        if self.fail_extend {
            return Err("extend refused".into());
        }
        Ok(())
    }

    fn hibernate_sandbox(&self, session: &SandboxSession) -> Result<(), BoxError> {
        self.hibernated
            .lock()
            .unwrap()
            .push(session.sandbox_id.clone());
        Ok(())
    }
}

pub struct Harness {
    _dir: tempfile::TempDir,
    pub store: Arc<SqliteThreadStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub observer: Arc<RecordingObserver>,
    pub provider: Arc<RecordingProvider>,
    pub counter: SandboxReferenceCounter,
    pub guard: ResourceGuard,
}

impl Harness {
    pub fn new(status: ThreadStatus, sandbox_id: Option<&str>) -> Self {
        Self::with_provider(status, sandbox_id, RecordingProvider::default())
    }

    pub fn with_provider(
        status: ThreadStatus,
        sandbox_id: Option<&str>,
        provider: RecordingProvider,
    ) -> Self {
        Self::with_sinks(
            status,
            sandbox_id,
            provider,
            RecordingObserver::default(),
            RecordingNotifier::default(),
        )
    }

    pub fn with_sinks(
        status: ThreadStatus,
        sandbox_id: Option<&str>,
        provider: RecordingProvider,
        observer: RecordingObserver,
        notifier: RecordingNotifier,
    ) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store =
            Arc::new(SqliteThreadStore::new(dir.path().join("threads.db")).expect("store init"));
        seed(store.as_ref(), status, sandbox_id);

        let notifier = Arc::new(notifier);
        let observer = Arc::new(observer);
        let provider = Arc::new(provider);
        let counter = SandboxReferenceCounter::new(
            Arc::new(MemoryCounterStore::new()),
            CounterTtls::default(),
        );
        let coordinator = TransitionCoordinator::new(
            Arc::clone(&store) as Arc<dyn ThreadStore>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            chrono::Duration::hours(1),
        );
        let guard = ResourceGuard::new(
            coordinator,
            counter.clone(),
            Arc::clone(&provider) as Arc<dyn SandboxProvider>,
            Arc::clone(&observer) as Arc<dyn Observer>,
            Duration::ZERO,
        );

        Self {
            _dir: dir,
            store,
            notifier,
            observer,
            provider,
            counter,
            guard,
        }
    }

    pub fn chat(&self) -> ThreadChat {
        self.store
            .get_thread_chat(THREAD_ID, CHAT_ID, USER_ID)
            .expect("fetch chat")
            .expect("chat exists")
    }

    /// Polls until the provider has hibernated `sandbox_id` or the deadline passes.
    pub fn wait_for_hibernation(&self, sandbox_id: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self
                .provider
                .hibernated
                .lock()
                .unwrap()
                .iter()
                .any(|id| id == sandbox_id)
            {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

pub fn seed(store: &dyn ThreadStore, status: ThreadStatus, sandbox_id: Option<&str>) {
    let now = Utc::now();
    store
        .insert_thread(&Thread {
            id: THREAD_ID.to_string(),
            user_id: USER_ID.to_string(),
            name: Some("Fix the flaky test".to_string()),
            sandbox_id: sandbox_id.map(str::to_string),
            updated_at: now,
        })
        .expect("insert thread");
    store
        .insert_thread_chat(&ThreadChat {
            id: CHAT_ID.to_string(),
            thread_id: THREAD_ID.to_string(),
            user_id: USER_ID.to_string(),
            status,
            reattempt_queue_at: None,
            error_message: None,
            error_message_info: None,
            messages: Vec::new(),
            unread: false,
            updated_at: now,
        })
        .expect("insert chat");
}
