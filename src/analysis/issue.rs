//! Normalized issue and test-result types.

use serde::{Deserialize, Serialize};

/// Severity of a normalized lint issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

impl IssueSeverity {
    /// Ordering rank for sorting, errors first.
    pub fn rank(&self) -> u8 {
        match self {
            IssueSeverity::Error => 0,
            IssueSeverity::Warning => 1,
            IssueSeverity::Info => 2,
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueSeverity::Error => write!(f, "error"),
            IssueSeverity::Warning => write!(f, "warning"),
            IssueSeverity::Info => write!(f, "info"),
        }
    }
}

/// One lint finding, normalized across tools. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Path as reported by the tool.
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    pub severity: IssueSeverity,
    /// Tool-specific rule identifier (`E0602`, `no-unused-vars`, ...).
    pub code: String,
    pub message: String,
    /// Which tool produced the issue.
    pub source: String,
}

impl Issue {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        severity: IssueSeverity,
        code: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            column: 0,
            severity,
            code: code.into(),
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = column;
        self
    }
}

/// Overall verdict of the merged test runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    #[default]
    Unknown,
}

/// One failing test, normalized across runners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    /// Runner-reported test identifier.
    pub test: String,
    /// Short failure reason when the runner provides one.
    #[serde(default)]
    pub reason: String,
}

/// Aggregated test counts from one or more runner invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub status: TestStatus,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failures: Vec<TestFailure>,
}

impl TestSummary {
    /// Fold another summary into this one, adding counts and
    /// concatenating failures. Status is recomputed from the merged
    /// counts: if neither run surfaced any tests the merged status
    /// stays `Unknown`, it does not become a pass.
    pub fn merge(&mut self, other: TestSummary) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.failures.extend(other.failures);
        self.status = if self.failed > 0 {
            TestStatus::Failed
        } else if self.total > 0 {
            TestStatus::Passed
        } else {
            TestStatus::Unknown
        };
    }

    /// Passing means at least one test ran and none failed.
    pub fn is_passing(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

/// The Normalizer's complete output for one work unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub issues: Vec<Issue>,
    pub test_summary: TestSummary,
}

impl AnalysisReport {
    pub fn total_issues(&self) -> usize {
        self.issues.len()
    }

    /// Error-severity issues, the ones that gate merges.
    pub fn critical_issues(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .count()
    }

    /// Distinct files with at least one issue.
    pub fn files_with_issues(&self) -> usize {
        let mut files: Vec<&str> = self.issues.iter().map(|i| i.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files.len()
    }
}
