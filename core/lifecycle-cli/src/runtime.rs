//! Wires the library's stores and collaborators from a loaded config.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thread_lifecycle::{
    load_config, CounterStore, CounterTtls, LifecycleConfig, NoopSandboxProvider, Notifier,
    Observer, ResourceGuard, SandboxProvider, SandboxReferenceCounter, SqliteCounterStore,
    SqliteThreadStore, ThreadStore, TracingNotifier, TracingObserver, TransitionCoordinator,
};

pub struct Runtime {
    pub store: Arc<SqliteThreadStore>,
    pub counter: SandboxReferenceCounter,
    pub provider: Arc<dyn SandboxProvider>,
    pub guard: ResourceGuard,
}

pub fn load(config_path: Option<&Path>) -> Result<LifecycleConfig, String> {
    load_config(config_path).map_err(|err| format!("Failed to load config: {}", err))
}

pub fn data_dir(config: &LifecycleConfig) -> Option<PathBuf> {
    config.data_dir().ok()
}

impl Runtime {
    pub fn open(config: &LifecycleConfig) -> Result<Self, String> {
        let thread_db = config.thread_db_path().map_err(|err| err.to_string())?;
        let counter_db = config.counter_db_path().map_err(|err| err.to_string())?;

        let store = Arc::new(
            SqliteThreadStore::new(thread_db)
                .map_err(|err| format!("Failed to open thread store: {}", err))?,
        );
        let counter_store: Arc<dyn CounterStore> = Arc::new(
            SqliteCounterStore::new(counter_db)
                .map_err(|err| format!("Failed to open counter store: {}", err))?,
        );
        let counter = SandboxReferenceCounter::new(counter_store, CounterTtls::from(&config.sandbox));
        let provider: Arc<dyn SandboxProvider> = Arc::new(NoopSandboxProvider);

        let coordinator = TransitionCoordinator::new(
            Arc::clone(&store) as Arc<dyn ThreadStore>,
            Arc::new(TracingNotifier) as Arc<dyn Notifier>,
            config.default_reattempt_delay(),
        );
        let guard = ResourceGuard::new(
            coordinator,
            counter.clone(),
            Arc::clone(&provider),
            Arc::new(TracingObserver) as Arc<dyn Observer>,
            config.hibernation_delay(),
        );

        Ok(Self {
            store,
            counter,
            provider,
            guard,
        })
    }
}
