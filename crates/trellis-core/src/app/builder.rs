//! EngineBuilder: wiring of registry, store, clock and config into a Scheduler.
//!
//! Fail-fast: `expect_kinds` declares analyzer kinds the deployment relies
//! on, and `build` refuses to produce a scheduler if any of them is missing.

use std::sync::Arc;

use crate::analyzer::{Analyzer, AnalyzerRegistry, RegistryError};
use crate::impls::InMemoryStore;
use crate::ports::{Clock, IdGenerator, Store, SystemClock, UlidGenerator};
use crate::scheduler::{ConfigError, Scheduler, SchedulerConfig};

/// # Example
/// ```ignore
/// let scheduler = EngineBuilder::new()
///     .register(SecurityAnalyzer::new())?
///     .expect_kinds(&["security"])
///     .with_config(config)
///     .build()?;
/// ```
pub struct EngineBuilder {
    registry: AnalyzerRegistry,
    expected_kinds: Option<Vec<String>>,
    config: SchedulerConfig,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing analyzer kinds: {0:?}. These kinds were expected but not registered.")]
    MissingKinds(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: AnalyzerRegistry::new(),
            expected_kinds: None,
            config: SchedulerConfig::default(),
            store: None,
            clock: None,
            ids: None,
        }
    }

    pub fn register<A: Analyzer + 'static>(self, analyzer: A) -> Result<Self, RegistryError> {
        self.register_arc(Arc::new(analyzer))
    }

    pub fn register_arc(mut self, analyzer: Arc<dyn Analyzer>) -> Result<Self, RegistryError> {
        self.registry.register(analyzer)?;
        Ok(self)
    }

    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a fresh `InMemoryStore`.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a `UlidGenerator` over the configured clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Check expectations and build the scheduler. Needs a tokio runtime.
    pub fn build(self) -> Result<Scheduler, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|k| !self.registry.contains(k))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingKinds(missing));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));

        let scheduler = Scheduler::new(
            self.config,
            store,
            Arc::new(self.registry),
            clock,
            ids,
        )?;
        Ok(scheduler)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
