//! Parallel backend fan-out and review merging.
//!
//! All configured backends are queried concurrently; any that fail or
//! time out are dropped and the rest are merged. Findings pointing at
//! the same (file, line) collapse into one entry whose agreement count
//! records how many raw findings named that location. Merge order is
//! backend configuration order, never arrival order, so the aggregated
//! result is deterministic for a given set of responses.

use crate::analysis::AnalysisReport;
use crate::config::{PipelineConfig, VanguardConfig};
use crate::context::ChangeRequestContext;
use crate::review::backend::{CommandBackend, ReviewBackend};
use crate::review::findings::{BackendReview, ReviewFinding, ReviewResult};
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Fan-out coordinator over the configured backends.
pub struct ReviewAggregator {
    backends: Vec<Box<dyn ReviewBackend>>,
    timeout: Duration,
    limits: PipelineConfig,
}

impl ReviewAggregator {
    pub fn new(config: &VanguardConfig) -> Self {
        let timeout = config.review.backend_timeout();
        let backends = config
            .backends
            .iter()
            .cloned()
            .map(|spec| Box::new(CommandBackend::new(spec, timeout)) as Box<dyn ReviewBackend>)
            .collect();
        Self {
            backends,
            timeout,
            limits: config.pipeline.clone(),
        }
    }

    /// Build an aggregator over arbitrary backends, used by tests and
    /// by callers that bring their own protocol implementation.
    pub fn with_backends(
        backends: Vec<Box<dyn ReviewBackend>>,
        timeout: Duration,
        limits: PipelineConfig,
    ) -> Self {
        Self {
            backends,
            timeout,
            limits,
        }
    }

    /// Query every backend concurrently and merge whatever responds.
    pub async fn review(
        &self,
        context: &ChangeRequestContext,
        analysis: &AnalysisReport,
    ) -> ReviewResult {
        let total = self.backends.len();
        info!(
            change_request = %context.slug(),
            backends = total,
            "Dispatching parallel backend reviews"
        );

        let prompt = build_review_prompt(context, analysis);
        let calls = self
            .backends
            .iter()
            .map(|backend| tokio::time::timeout(self.timeout, backend.review(&prompt)));
        let results = join_all(calls).await;

        let mut reviews = Vec::new();
        for (backend, result) in self.backends.iter().zip(results) {
            match result {
                Ok(Ok(review)) => reviews.push((backend.name().to_string(), review)),
                Ok(Err(e)) => {
                    warn!(backend = %backend.name(), error = %e, "Backend review failed, excluding from aggregation");
                }
                Err(_) => {
                    warn!(backend = %backend.name(), timeout = ?self.timeout, "Backend review timed out, excluding from aggregation");
                }
            }
        }

        self.merge(reviews, total)
    }

    /// Merge parsed backend reviews into one ranked result.
    fn merge(
        &self,
        reviews: Vec<(String, BackendReview)>,
        backends_total: usize,
    ) -> ReviewResult {
        if reviews.is_empty() {
            return ReviewResult::degraded(backends_total);
        }
        let backends_responded = reviews.len();

        let confidence =
            reviews.iter().map(|(_, r)| r.confidence).sum::<f64>() / backends_responded as f64;

        let summary = reviews
            .iter()
            .take(2)
            .map(|(_, r)| r.summary.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" | ");

        // Collapse findings by location, counting every raw finding that
        // named the same (file, line). The first-seen finding supplies
        // the kept message, severity, and backend attribution.
        let mut order: Vec<(String, u32)> = Vec::new();
        let mut by_location: HashMap<(String, u32), ReviewFinding> = HashMap::new();
        for (backend, review) in &reviews {
            for raw in &review.issues {
                let key = (raw.file.clone(), raw.line);
                match by_location.get_mut(&key) {
                    Some(existing) => existing.agreement_count += 1,
                    None => {
                        order.push(key.clone());
                        by_location.insert(key, ReviewFinding::from_raw(raw, backend));
                    }
                }
            }
        }

        let mut findings: Vec<ReviewFinding> = order
            .into_iter()
            .filter_map(|key| by_location.remove(&key))
            .collect();
        findings.sort_by_key(|f| (f.severity.rank(), std::cmp::Reverse(f.agreement_count)));
        findings.truncate(self.limits.max_findings);

        let mut suggestions: Vec<String> = Vec::new();
        'outer: for (_, review) in &reviews {
            for suggestion in &review.suggestions {
                if !suggestions.contains(suggestion) {
                    suggestions.push(suggestion.clone());
                }
                if suggestions.len() >= self.limits.max_suggestions {
                    break 'outer;
                }
            }
        }

        ReviewResult {
            summary,
            findings,
            suggestions,
            confidence,
            backends_responded,
            backends_total,
        }
    }
}

/// Compose the review prompt: change metadata, per-file diffs, and the
/// head of the static-analysis issue list.
fn build_review_prompt(context: &ChangeRequestContext, analysis: &AnalysisReport) -> String {
    let mut prompt = String::new();
    prompt.push_str("Review the following change set for correctness, security, and style.\n");
    prompt.push_str("Respond with a JSON object of the form:\n");
    prompt.push_str(
        r#"{"summary": "...", "issues": [{"file": "...", "line": 1, "severity": "high|medium|low", "message": "..."}], "suggestions": ["..."], "confidence": 0.0}"#,
    );
    prompt.push_str("\n\n");
    prompt.push_str(&format!(
        "# {} — {}\n\nAuthor: {}\n\n{}\n\n",
        context.slug(),
        context.title,
        context.author,
        context.description
    ));

    for file in &context.files {
        prompt.push_str(&format!(
            "## {} (+{} -{})\n",
            file.path, file.additions, file.deletions
        ));
        if let Some(diff) = &file.diff {
            prompt.push_str(&format!("```diff\n{diff}\n```\n\n"));
        } else if let Some(content) = &file.content {
            prompt.push_str(&format!("```\n{content}\n```\n\n"));
        }
    }

    if !analysis.issues.is_empty() {
        prompt.push_str("## Static analysis\n");
        for issue in analysis.issues.iter().take(10) {
            prompt.push_str(&format!(
                "- {}:{} [{}] {}: {}\n",
                issue.file, issue.line, issue.severity, issue.code, issue.message
            ));
        }
        prompt.push('\n');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Issue, IssueSeverity};
    use crate::context::{ChangedFile, FileStatus};
    use crate::errors::BackendError;
    use crate::review::findings::{FindingSeverity, RawFinding};
    use async_trait::async_trait;

    struct FixedBackend {
        name: String,
        review: BackendReview,
    }

    #[async_trait]
    impl ReviewBackend for FixedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn review(&self, _prompt: &str) -> Result<BackendReview, BackendError> {
            Ok(self.review.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ReviewBackend for FailingBackend {
        fn name(&self) -> &str {
            "broken"
        }

        async fn review(&self, _prompt: &str) -> Result<BackendReview, BackendError> {
            Err(BackendError::EmptyOutput {
                backend: "broken".to_string(),
            })
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl ReviewBackend for HangingBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn review(&self, _prompt: &str) -> Result<BackendReview, BackendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(BackendReview::degraded("never"))
        }
    }

    fn fixed(
        name: &str,
        confidence: f64,
        issues: Vec<RawFinding>,
        suggestions: Vec<&str>,
    ) -> Box<dyn ReviewBackend> {
        Box::new(FixedBackend {
            name: name.to_string(),
            review: BackendReview {
                summary: format!("{name} summary"),
                issues,
                suggestions: suggestions.into_iter().map(String::from).collect(),
                confidence,
            },
        })
    }

    fn aggregator(backends: Vec<Box<dyn ReviewBackend>>) -> ReviewAggregator {
        ReviewAggregator::with_backends(
            backends,
            Duration::from_millis(200),
            PipelineConfig::default(),
        )
    }

    fn context() -> ChangeRequestContext {
        ChangeRequestContext::new("acme", "webapp", 1).with_title("Fix auth")
    }

    #[tokio::test]
    async fn test_review_no_backends() {
        let result = aggregator(vec![]).review(&context(), &AnalysisReport::default()).await;
        assert!(result.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.summary, "no backends responded");
    }

    #[tokio::test]
    async fn test_review_confidence_mean_and_summary_join() {
        let result = aggregator(vec![
            fixed("a", 0.8, vec![], vec![]),
            fixed("b", 0.4, vec![], vec![]),
            fixed("c", 0.6, vec![], vec![]),
        ])
        .review(&context(), &AnalysisReport::default())
        .await;
        assert!((result.confidence - 0.6).abs() < 1e-9);
        assert_eq!(result.backends_responded, 3);
        // Only the first two summaries are joined.
        assert_eq!(result.summary, "a summary | b summary");
    }

    #[tokio::test]
    async fn test_review_failed_backend_excluded() {
        let result = aggregator(vec![
            fixed("ok", 0.9, vec![], vec![]),
            Box::new(FailingBackend),
        ])
        .review(&context(), &AnalysisReport::default())
        .await;
        assert_eq!(result.backends_responded, 1);
        assert_eq!(result.backends_total, 2);
        assert_eq!(result.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_review_timed_out_backend_excluded() {
        let result = aggregator(vec![
            fixed("ok", 0.9, vec![], vec![]),
            Box::new(HangingBackend),
        ])
        .review(&context(), &AnalysisReport::default())
        .await;
        assert_eq!(result.backends_responded, 1);
    }

    #[tokio::test]
    async fn test_review_dedup_by_location() {
        let result = aggregator(vec![
            fixed(
                "a",
                0.9,
                vec![
                    RawFinding::new("x.py", 10, FindingSeverity::Medium, "from a"),
                    RawFinding::new("y.py", 5, FindingSeverity::Low, "only a"),
                ],
                vec![],
            ),
            fixed(
                "b",
                0.9,
                vec![RawFinding::new("x.py", 10, FindingSeverity::High, "from b")],
                vec![],
            ),
        ])
        .review(&context(), &AnalysisReport::default())
        .await;

        assert_eq!(result.findings.len(), 2);
        let dup = result.findings.iter().find(|f| f.file == "x.py").unwrap();
        // First-seen wins the kept content and attribution.
        assert_eq!(dup.message, "from a");
        assert_eq!(dup.severity, FindingSeverity::Medium);
        assert_eq!(dup.backend, "a");
        assert_eq!(dup.agreement_count, 2);
        let solo = result.findings.iter().find(|f| f.file == "y.py").unwrap();
        assert_eq!(solo.agreement_count, 1);
    }

    #[tokio::test]
    async fn test_review_ranking_severity_then_agreement() {
        let result = aggregator(vec![
            fixed(
                "a",
                0.9,
                vec![
                    RawFinding::new("low.py", 1, FindingSeverity::Low, "low"),
                    RawFinding::new("med1.py", 1, FindingSeverity::Medium, "m1"),
                    RawFinding::new("med2.py", 1, FindingSeverity::Medium, "m2"),
                    RawFinding::new("high.py", 1, FindingSeverity::High, "h"),
                ],
                vec![],
            ),
            fixed(
                "b",
                0.9,
                vec![RawFinding::new(
                    "med2.py",
                    1,
                    FindingSeverity::Medium,
                    "m2 again",
                )],
                vec![],
            ),
        ])
        .review(&context(), &AnalysisReport::default())
        .await;

        let files: Vec<&str> = result.findings.iter().map(|f| f.file.as_str()).collect();
        // High first, then the more-agreed medium, then the rest.
        assert_eq!(files, vec!["high.py", "med2.py", "med1.py", "low.py"]);
    }

    #[tokio::test]
    async fn test_review_ranking_stable_for_equal_keys() {
        // Same severity, same agreement: ranking must keep the order
        // the findings were reported in.
        let result = aggregator(vec![fixed(
            "a",
            0.9,
            vec![
                RawFinding::new("first.py", 1, FindingSeverity::Medium, "m1"),
                RawFinding::new("second.py", 2, FindingSeverity::Medium, "m2"),
                RawFinding::new("third.py", 3, FindingSeverity::Medium, "m3"),
            ],
            vec![],
        )])
        .review(&context(), &AnalysisReport::default())
        .await;

        let files: Vec<&str> = result.findings.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["first.py", "second.py", "third.py"]);
    }

    #[tokio::test]
    async fn test_review_truncates_findings() {
        let issues: Vec<RawFinding> = (0..30)
            .map(|i| RawFinding::new(format!("f{i}.py"), i, FindingSeverity::Low, "x"))
            .collect();
        let result = aggregator(vec![fixed("a", 0.5, issues, vec![])])
            .review(&context(), &AnalysisReport::default())
            .await;
        assert_eq!(result.findings.len(), 20);
    }

    #[tokio::test]
    async fn test_review_suggestions_dedup_and_cap() {
        let result = aggregator(vec![
            fixed("a", 0.5, vec![], vec!["s1", "s2", "s3"]),
            fixed("b", 0.5, vec![], vec!["s2", "s4", "s5", "s6", "s7"]),
        ])
        .review(&context(), &AnalysisReport::default())
        .await;
        assert_eq!(result.suggestions, vec!["s1", "s2", "s3", "s4", "s5"]);
    }

    #[test]
    fn test_prompt_includes_metadata_diffs_and_issues() {
        let context = ChangeRequestContext::new("acme", "webapp", 3)
            .with_title("Harden session handling")
            .with_author("jdoe")
            .with_description("Rotates tokens on login")
            .with_file(
                ChangedFile::new("auth.py", FileStatus::Modified)
                    .with_counts(4, 1)
                    .with_diff("@@ -1 +1 @@\n-old\n+new"),
            );
        let analysis = AnalysisReport {
            issues: (0..15)
                .map(|i| {
                    Issue::new(
                        "auth.py",
                        i,
                        IssueSeverity::Warning,
                        "W0611",
                        "Unused import",
                        "pylint",
                    )
                })
                .collect(),
            test_summary: Default::default(),
        };
        let prompt = build_review_prompt(&context, &analysis);
        assert!(prompt.contains("acme/webapp#3"));
        assert!(prompt.contains("Harden session handling"));
        assert!(prompt.contains("Author: jdoe"));
        assert!(prompt.contains("```diff"));
        assert!(prompt.contains("+new"));
        // Only the first ten issues are included.
        assert!(prompt.contains("auth.py:9"));
        assert!(!prompt.contains("auth.py:10 "));
        assert_eq!(prompt.matches("- auth.py:").count(), 10);
    }
}
