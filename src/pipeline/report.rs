//! Review report formatting and the outbound sink boundary.
//!
//! The formatter produces the markdown review comment; the sink decides
//! where it goes. Sinks must tolerate redelivery, since the executor's
//! retries make every outbound effect at-least-once.

use crate::analysis::AnalysisReport;
use crate::context::ChangeRequestContext;
use crate::refactor::Patch;
use crate::review::{FindingSeverity, ReviewResult};
use crate::sandbox::ValidationSet;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Per-severity caps on findings shown in the comment.
const MAX_SHOWN: [(FindingSeverity, usize); 3] = [
    (FindingSeverity::High, 5),
    (FindingSeverity::Medium, 5),
    (FindingSeverity::Low, 3),
];

/// Outbound boundary for finished reviews.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Publish the review comment on the change request.
    async fn post_review_comment(&self, context: &ChangeRequestContext, comment: &str)
        -> Result<()>;

    /// Submit validated corrective patches, returning a submission
    /// identifier when the platform assigns one.
    async fn submit_corrective_patches(
        &self,
        context: &ChangeRequestContext,
        patches: &[Patch],
    ) -> Result<Option<String>>;
}

/// Sink that writes the report and patch set to files, used by the CLI.
pub struct JsonReportSink {
    output_dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn post_review_comment(
        &self,
        context: &ChangeRequestContext,
        comment: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join("review_comment.md");
        std::fs::write(&path, comment)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(change_request = %context.slug(), path = %path.display(), "Wrote review comment");
        Ok(())
    }

    async fn submit_corrective_patches(
        &self,
        context: &ChangeRequestContext,
        patches: &[Patch],
    ) -> Result<Option<String>> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let path = self.output_dir.join("corrective_patches.json");
        let json = serde_json::to_string_pretty(patches)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(change_request = %context.slug(), path = %path.display(), patches = patches.len(), "Wrote corrective patch set");
        Ok(Some(path.display().to_string()))
    }
}

fn confidence_badge(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "🟢 high"
    } else if confidence >= 0.5 {
        "🟡 moderate"
    } else {
        "🔴 low"
    }
}

/// Format the markdown review comment.
pub fn format_review_comment(
    context: &ChangeRequestContext,
    review: &ReviewResult,
    validation: Option<&ValidationSet>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "## Automated review — {} ({})\n\n",
        context.title,
        context.slug()
    ));
    out.push_str(&format!(
        "**Confidence:** {} ({:.2}) — {}/{} backends responded\n\n",
        confidence_badge(review.confidence),
        review.confidence,
        review.backends_responded,
        review.backends_total
    ));

    if !review.summary.is_empty() {
        out.push_str(&format!("{}\n\n", review.summary));
    }

    for (severity, cap) in MAX_SHOWN {
        let findings = review.findings_of(severity);
        if findings.is_empty() {
            continue;
        }
        let heading = match severity {
            FindingSeverity::High => "High severity",
            FindingSeverity::Medium => "Medium severity",
            FindingSeverity::Low => "Low severity",
        };
        out.push_str(&format!("### {heading}\n\n"));
        for finding in findings.iter().take(cap) {
            let agreement = if finding.agreement_count > 1 {
                format!(" (×{} backends)", finding.agreement_count)
            } else {
                String::new()
            };
            out.push_str(&format!(
                "- `{}:{}` — {}{}\n",
                finding.file, finding.line, finding.message, agreement
            ));
        }
        if findings.len() > cap {
            out.push_str(&format!("- _{} more not shown_\n", findings.len() - cap));
        }
        out.push('\n');
    }

    if !review.suggestions.is_empty() {
        out.push_str("### Suggestions\n\n");
        for suggestion in &review.suggestions {
            out.push_str(&format!("- {suggestion}\n"));
        }
        out.push('\n');
    }

    if let Some(validation) = validation {
        out.push_str("### Automated fix testing\n\n");
        out.push_str(&format!(
            "{} of {} generated patches passed validation.\n\n",
            validation.passed, validation.total
        ));
        for result in &validation.results {
            let verdict = if result.passed() {
                "✅ passed".to_string()
            } else if let Some(error) = &result.error {
                format!("⚠️ validation errored: {error}")
            } else if !result.linter_passed {
                "❌ lint failed".to_string()
            } else {
                "❌ tests failed".to_string()
            };
            out.push_str(&format!("- `{}` — {}\n", result.file, verdict));
        }
        out.push('\n');
    }

    out
}

/// Fallback comment for runs where the backend review never produced a
/// result. Whatever the analysis stage found still goes out.
pub fn format_partial_review_comment(
    context: &ChangeRequestContext,
    analysis: Option<&AnalysisReport>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "## Automated review — {} ({})\n\n",
        context.title,
        context.slug()
    ));
    out.push_str("Review partially completed due to errors; no backend review is available.\n\n");
    if let Some(analysis) = analysis {
        out.push_str(&format!(
            "Static analysis found {} issues ({} critical) across {} files.\n",
            analysis.total_issues(),
            analysis.critical_issues(),
            analysis.files_with_issues()
        ));
        let tests = &analysis.test_summary;
        if tests.total > 0 {
            out.push_str(&format!(
                "Tests: {} passed, {} failed, {} skipped.\n",
                tests.passed, tests.failed, tests.skipped
            ));
        }
    }
    out
}
