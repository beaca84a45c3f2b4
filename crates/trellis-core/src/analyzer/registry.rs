//! Registry of analyzers (kind -> capability).
//!
//! Built during initialization (mutable), then shared read-only behind an
//! `Arc` for the lifetime of the scheduler. No locks, no global state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::Analyzer;
use crate::domain::JobSpec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("analyzer for kind '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("analyzer kind must not be empty")]
    EmptyKind,
}

/// A requested kind that cannot run for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub kind: String,

    /// Listed in the job's `optional_kinds`.
    pub optional: bool,

    pub reason: String,
}

#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an analyzer under its own `kind()`. Duplicates are refused.
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) -> Result<(), RegistryError> {
        let kind = analyzer.kind().to_string();
        if kind.is_empty() {
            return Err(RegistryError::EmptyKind);
        }
        if self.analyzers.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.analyzers.insert(kind, analyzer);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Analyzer>> {
        self.analyzers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.analyzers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.analyzers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// Every requested kind of `spec` that has no analyzer or whose analyzer
    /// reports itself unavailable, in the spec's kind order.
    pub async fn check_required(&self, spec: &JobSpec) -> Vec<MissingDependency> {
        let mut missing = Vec::new();
        for kind in &spec.analysis_kinds {
            let reason = match self.analyzers.get(kind) {
                None => Some(format!("no analyzer registered for kind '{kind}'")),
                Some(analyzer) => analyzer.check_available().await.err(),
            };
            if let Some(reason) = reason {
                missing.push(MissingDependency {
                    kind: kind.clone(),
                    optional: spec.is_optional(kind),
                    reason,
                });
            }
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::analyzer::{AnalyzerContext, AnalyzerError};
    use crate::domain::Outcome;

    struct Stub {
        kind: &'static str,
        available: bool,
    }

    #[async_trait]
    impl Analyzer for Stub {
        fn kind(&self) -> &str {
            self.kind
        }

        async fn check_available(&self) -> Result<(), String> {
            if self.available {
                Ok(())
            } else {
                Err(format!("{} binary not found", self.kind))
            }
        }

        async fn execute(&self, _ctx: AnalyzerContext) -> Result<Outcome, AnalyzerError> {
            Ok(Outcome::completed(serde_json::json!({})))
        }
    }

    fn stub(kind: &'static str, available: bool) -> Arc<dyn Analyzer> {
        Arc::new(Stub { kind, available })
    }

    #[test]
    fn duplicate_kind_is_refused() {
        let mut registry = AnalyzerRegistry::new();
        registry.register(stub("security", true)).unwrap();
        assert_eq!(
            registry.register(stub("security", true)),
            Err(RegistryError::AlreadyRegistered("security".into()))
        );
        assert_eq!(registry.register(stub("", true)), Err(RegistryError::EmptyKind));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registered_kinds_are_sorted() {
        let mut registry = AnalyzerRegistry::new();
        registry.register(stub("performance", true)).unwrap();
        registry.register(stub("api", true)).unwrap();
        assert_eq!(registry.registered_kinds(), vec!["api", "performance"]);
        assert!(registry.get("api").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[tokio::test]
    async fn check_required_reports_missing_and_unavailable() {
        let mut registry = AnalyzerRegistry::new();
        registry.register(stub("security", true)).unwrap();
        registry.register(stub("performance", false)).unwrap();

        let spec = JobSpec::new(["t"], &[1], ["security", "performance", "api"])
            .with_optional_kind("api");
        let missing = registry.check_required(&spec).await;

        assert_eq!(missing.len(), 2);
        assert_eq!(missing[0].kind, "performance");
        assert!(!missing[0].optional);
        assert_eq!(missing[0].reason, "performance binary not found");
        assert_eq!(missing[1].kind, "api");
        assert!(missing[1].optional);
    }
}
