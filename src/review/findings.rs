//! Review finding types shared by the backend clients and the aggregator.

use serde::{Deserialize, Serialize};

/// Severity of a review finding, as judged by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    High,
    Medium,
    Low,
}

impl FindingSeverity {
    /// Ordering rank; high severity sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            FindingSeverity::High => 0,
            FindingSeverity::Medium => 1,
            FindingSeverity::Low => 2,
        }
    }
}

impl std::fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingSeverity::High => write!(f, "high"),
            FindingSeverity::Medium => write!(f, "medium"),
            FindingSeverity::Low => write!(f, "low"),
        }
    }
}

/// One issue exactly as a backend reported it, before deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    pub file: String,
    #[serde(default)]
    pub line: u32,
    pub severity: FindingSeverity,
    pub message: String,
}

impl RawFinding {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        severity: FindingSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            severity,
            message: message.into(),
        }
    }
}

/// One deduplicated finding in the aggregated review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub file: String,
    pub line: u32,
    pub severity: FindingSeverity,
    pub message: String,
    /// Backend that first reported this finding.
    pub backend: String,
    /// How many raw backend findings pointed at this (file, line).
    pub agreement_count: u32,
}

impl ReviewFinding {
    /// Promote a raw finding into the aggregated form.
    pub fn from_raw(raw: &RawFinding, backend: impl Into<String>) -> Self {
        Self {
            file: raw.file.clone(),
            line: raw.line,
            severity: raw.severity,
            message: raw.message.clone(),
            backend: backend.into(),
            agreement_count: 1,
        }
    }
}

/// The parsed response of a single backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReview {
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<RawFinding>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Backend's self-reported confidence in [0.0, 1.0].
    #[serde(default)]
    pub confidence: f64,
}

impl BackendReview {
    /// A degraded review for output that wasn't parseable as JSON:
    /// the raw text's head becomes the summary, with neutral confidence.
    pub fn degraded(raw: &str) -> Self {
        let summary: String = raw.chars().take(200).collect();
        Self {
            summary,
            issues: Vec::new(),
            suggestions: Vec::new(),
            confidence: 0.5,
        }
    }
}

/// The merged result of all backend reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    /// Joined summaries of the first responding backends.
    pub summary: String,
    /// Deduplicated findings, ranked by severity then agreement.
    pub findings: Vec<ReviewFinding>,
    /// Union of backend suggestions, deduplicated and capped.
    pub suggestions: Vec<String>,
    /// Mean confidence across responding backends; 0.0 when none responded.
    pub confidence: f64,
    /// How many backends responded out of those configured.
    pub backends_responded: usize,
    pub backends_total: usize,
}

impl ReviewResult {
    /// The no-backends-responded result. Not an error: the pipeline
    /// still reports, just with nothing to say.
    pub fn degraded(backends_total: usize) -> Self {
        Self {
            summary: "no backends responded".to_string(),
            findings: Vec::new(),
            suggestions: Vec::new(),
            confidence: 0.0,
            backends_responded: 0,
            backends_total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends_responded == 0
    }

    pub fn high_severity_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == FindingSeverity::High)
            .count()
    }

    /// Findings of one severity, in rank order.
    pub fn findings_of(&self, severity: FindingSeverity) -> Vec<&ReviewFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect()
    }
}
