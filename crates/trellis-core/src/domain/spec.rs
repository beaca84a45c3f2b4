//! Input spec for a job: the (target x sub-target x kind) matrix.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// What a caller submits. Expanded into one task per matrix cell.
///
/// `targets` and `analysis_kinds` are treated as ordered sets: duplicates are
/// rejected by `validate` so the expansion order stays unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub targets: Vec<String>,

    /// Sub-target numbers for each target. Every target needs an entry.
    pub sub_targets: BTreeMap<String, Vec<u32>>,

    pub analysis_kinds: Vec<String>,

    /// Options handed verbatim to the analyzer of each kind.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,

    /// Kinds whose absence skips their tasks instead of failing the job.
    #[serde(default)]
    pub optional_kinds: Vec<String>,

    /// Job-level default for the per-task timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
}

/// One cell of the expanded matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCell {
    pub target: String,
    pub sub_target: u32,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("job spec has no targets")]
    NoTargets,

    #[error("job spec has no analysis kinds")]
    NoAnalysisKinds,

    #[error("duplicate target '{0}'")]
    DuplicateTarget(String),

    #[error("duplicate analysis kind '{0}'")]
    DuplicateKind(String),

    #[error("target '{0}' has no sub-targets")]
    MissingSubTargets(String),

    #[error("target '{target}' lists sub-target {sub_target} more than once")]
    DuplicateSubTarget { target: String, sub_target: u32 },

    #[error("sub-targets given for unknown target '{0}'")]
    UnknownTarget(String),

    #[error("optional kind '{0}' is not one of the requested kinds")]
    UnknownOptionalKind(String),

    #[error("options given for unknown kind '{0}'")]
    UnknownOptionsKind(String),

    #[error("task timeout must be greater than zero")]
    ZeroTimeout,
}

impl JobSpec {
    /// Convenience constructor: every target gets the same sub-target list.
    pub fn new(
        targets: impl IntoIterator<Item = impl Into<String>>,
        sub_targets: &[u32],
        kinds: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        let sub_targets = targets
            .iter()
            .map(|t| (t.clone(), sub_targets.to_vec()))
            .collect();
        Self {
            targets,
            sub_targets,
            analysis_kinds: kinds.into_iter().map(Into::into).collect(),
            options: BTreeMap::new(),
            optional_kinds: Vec::new(),
            task_timeout_secs: None,
        }
    }

    pub fn with_options(mut self, kind: impl Into<String>, options: serde_json::Value) -> Self {
        self.options.insert(kind.into(), options);
        self
    }

    pub fn with_optional_kind(mut self, kind: impl Into<String>) -> Self {
        self.optional_kinds.push(kind.into());
        self
    }

    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.task_timeout_secs = Some(secs);
        self
    }

    pub fn is_optional(&self, kind: &str) -> bool {
        self.optional_kinds.iter().any(|k| k == kind)
    }

    /// Options for a kind, or an empty object.
    pub fn options_for(&self, kind: &str) -> serde_json::Value {
        self.options
            .get(kind)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.targets.is_empty() {
            return Err(ValidationError::NoTargets);
        }
        if self.analysis_kinds.is_empty() {
            return Err(ValidationError::NoAnalysisKinds);
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.as_str()) {
                return Err(ValidationError::DuplicateTarget(target.clone()));
            }
            let subs = self
                .sub_targets
                .get(target)
                .filter(|subs| !subs.is_empty())
                .ok_or_else(|| ValidationError::MissingSubTargets(target.clone()))?;
            let mut seen_subs = HashSet::new();
            for &sub_target in subs {
                if !seen_subs.insert(sub_target) {
                    return Err(ValidationError::DuplicateSubTarget {
                        target: target.clone(),
                        sub_target,
                    });
                }
            }
        }
        if let Some(unknown) = self.sub_targets.keys().find(|t| !seen.contains(t.as_str())) {
            return Err(ValidationError::UnknownTarget(unknown.clone()));
        }

        let mut kinds = HashSet::new();
        for kind in &self.analysis_kinds {
            if !kinds.insert(kind.as_str()) {
                return Err(ValidationError::DuplicateKind(kind.clone()));
            }
        }
        if let Some(kind) = self.optional_kinds.iter().find(|k| !kinds.contains(k.as_str())) {
            return Err(ValidationError::UnknownOptionalKind(kind.clone()));
        }
        if let Some(kind) = self.options.keys().find(|k| !kinds.contains(k.as_str())) {
            return Err(ValidationError::UnknownOptionsKind(kind.clone()));
        }
        if self.task_timeout_secs == Some(0) {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(())
    }

    /// Expand into cells: targets outer, sub-targets middle, kinds inner.
    ///
    /// Call `validate` first; targets without sub-targets expand to nothing.
    pub fn expand(&self) -> Vec<TaskCell> {
        let mut cells = Vec::new();
        for target in &self.targets {
            let Some(subs) = self.sub_targets.get(target) else {
                continue;
            };
            for &sub_target in subs {
                for kind in &self.analysis_kinds {
                    cells.push(TaskCell {
                        target: target.clone(),
                        sub_target,
                        kind: kind.clone(),
                    });
                }
            }
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn expansion_order_is_target_sub_target_kind() {
        let mut spec = JobSpec::new(["t1", "t2"], &[1], ["sast", "perf"]);
        spec.sub_targets.insert("t1".into(), vec![1, 2]);

        let cells: Vec<(String, u32, String)> = spec
            .expand()
            .into_iter()
            .map(|c| (c.target, c.sub_target, c.kind))
            .collect();

        assert_eq!(
            cells,
            vec![
                ("t1".into(), 1, "sast".into()),
                ("t1".into(), 1, "perf".into()),
                ("t1".into(), 2, "sast".into()),
                ("t1".into(), 2, "perf".into()),
                ("t2".into(), 1, "sast".into()),
                ("t2".into(), 1, "perf".into()),
            ]
        );
    }

    #[test]
    fn valid_spec_passes() {
        let spec = JobSpec::new(["t1", "t2"], &[1], ["k1"])
            .with_optional_kind("k1")
            .with_options("k1", serde_json::json!({"depth": 2}));
        assert_eq!(spec.validate(), Ok(()));
        assert_eq!(spec.options_for("k1")["depth"], 2);
        assert_eq!(spec.options_for("k2"), serde_json::json!({}));
    }

    #[rstest]
    #[case::no_targets(JobSpec::new(Vec::<String>::new(), &[1], ["k"]), ValidationError::NoTargets)]
    #[case::no_kinds(JobSpec::new(["t"], &[1], Vec::<String>::new()), ValidationError::NoAnalysisKinds)]
    #[case::duplicate_target(JobSpec::new(["t", "t"], &[1], ["k"]), ValidationError::DuplicateTarget("t".into()))]
    #[case::duplicate_kind(JobSpec::new(["t"], &[1], ["k", "k"]), ValidationError::DuplicateKind("k".into()))]
    #[case::empty_sub_targets(JobSpec::new(["t"], &[], ["k"]), ValidationError::MissingSubTargets("t".into()))]
    #[case::duplicate_sub_target(JobSpec::new(["t"], &[3, 3], ["k"]), ValidationError::DuplicateSubTarget { target: "t".into(), sub_target: 3 })]
    #[case::unknown_optional(JobSpec::new(["t"], &[1], ["k"]).with_optional_kind("x"), ValidationError::UnknownOptionalKind("x".into()))]
    #[case::unknown_options(JobSpec::new(["t"], &[1], ["k"]).with_options("x", serde_json::json!({})), ValidationError::UnknownOptionsKind("x".into()))]
    #[case::zero_timeout(JobSpec::new(["t"], &[1], ["k"]).with_task_timeout_secs(0), ValidationError::ZeroTimeout)]
    fn invalid_specs_are_rejected(#[case] spec: JobSpec, #[case] expected: ValidationError) {
        assert_eq!(spec.validate(), Err(expected));
    }

    #[test]
    fn sub_targets_for_unlisted_target_are_rejected() {
        let mut spec = JobSpec::new(["t"], &[1], ["k"]);
        spec.sub_targets.insert("ghost".into(), vec![1]);
        assert_eq!(
            spec.validate(),
            Err(ValidationError::UnknownTarget("ghost".into()))
        );
    }

    #[test]
    fn job_spec_without_optional_fields_deserializes() {
        let json = r#"
        {
          "targets": ["app"],
          "sub_targets": { "app": [1, 2] },
          "analysis_kinds": ["security"]
        }"#;
        let spec: JobSpec = serde_json::from_str(json).expect("deserialize");
        assert!(spec.options.is_empty());
        assert!(spec.optional_kinds.is_empty());
        assert_eq!(spec.task_timeout_secs, None);
        assert_eq!(spec.expand().len(), 2);
    }
}
