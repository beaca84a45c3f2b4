//! Outcome model: what an analyzer hands back to the runner.
//!
//! This module does not assume anything about how analyzers work. It only
//! defines the shape of a result that the scheduler can record, aggregate
//! and explain later. The `details` payload stays opaque to the scheduler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::ErrorCategory;

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// One normalized issue reported by an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub title: String,
}

impl Finding {
    pub fn new(severity: Severity, title: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
        }
    }
}

/// Count of findings per severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingCounts {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl FindingCounts {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            counts.add(finding.severity, 1);
        }
        counts
    }

    pub fn add(&mut self, severity: Severity, n: usize) {
        if n == 0 {
            return;
        }
        self.total += n;
        *self.by_severity.entry(severity).or_default() += n;
    }

    pub fn merge(&mut self, other: &FindingCounts) {
        for (&severity, &n) in &other.by_severity {
            self.add(severity, n);
        }
    }
}

/// Payload of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Analyzer-specific output. Never interpreted by the scheduler.
    #[serde(default)]
    pub details: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

impl AnalysisReport {
    pub fn new(details: serde_json::Value) -> Self {
        Self {
            details,
            findings: Vec::new(),
        }
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn finding_counts(&self) -> FindingCounts {
        FindingCounts::from_findings(&self.findings)
    }
}

/// What `Analyzer::execute` returns when it gets to decide the outcome itself.
///
/// Errors raised by the analyzer (`Err(AnalyzerError)`) are classified by the
/// runner and end up as `Failed` too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed(AnalysisReport),

    Failed {
        category: ErrorCategory,
        message: String,
    },

    /// The analyzer decided the cell does not apply (e.g. nothing to scan).
    Skipped { reason: String },

    /// The analyzer observed its cancellation token and stopped early.
    Cancelled,
}

impl Outcome {
    pub fn completed(details: serde_json::Value) -> Self {
        Outcome::Completed(AnalysisReport::new(details))
    }

    pub fn failed(category: ErrorCategory, message: impl Into<String>) -> Self {
        Outcome::Failed {
            category,
            message: message.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }
}
