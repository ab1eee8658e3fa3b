//! Retrying task executor around the pipeline.
//!
//! One work unit per dispatch. Retryable failures back off
//! exponentially (`backoff_base * 2^retry_count`) up to the configured
//! retry budget; exhaustion or a hard time limit dead-letters the unit
//! back to the caller.

use crate::config::TaskConfig;
use crate::context::WorkUnit;
use crate::errors::TaskError;
use crate::pipeline::{Orchestrator, PipelineRun};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle of one dispatched work unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Execution record the executor owns for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub status: TaskStatus,
    pub retry_count: u32,
}

impl TaskAttempt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
    }

    pub fn fail(&mut self) {
        self.status = TaskStatus::Failed;
    }
}

/// Delay before retry number `retry_count + 1`: `base * 2^retry_count`.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count))
}

/// Runs work units through the orchestrator with retry and time limits.
pub struct TaskExecutor {
    config: TaskConfig,
    orchestrator: Orchestrator,
}

impl TaskExecutor {
    pub fn new(config: TaskConfig, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Run one work unit to completion or exhaustion.
    pub async fn dispatch(
        &self,
        work_unit: WorkUnit,
        repo_root: Option<PathBuf>,
    ) -> Result<PipelineRun, TaskError> {
        let slug = work_unit.context.slug();
        let mut attempt = TaskAttempt::new();

        loop {
            attempt.start();
            match self.run_attempt(&work_unit, &repo_root).await {
                Ok(run) => {
                    attempt.complete();
                    info!(change_request = %slug, retries = attempt.retry_count, "Work unit completed");
                    return Ok(run);
                }
                Err(e) if e.is_retryable() && attempt.retry_count < self.config.max_retries => {
                    let delay = backoff_delay(self.config.backoff_base(), attempt.retry_count);
                    warn!(
                        change_request = %slug,
                        error = %e,
                        retry = attempt.retry_count + 1,
                        max_retries = self.config.max_retries,
                        delay = ?delay,
                        "Attempt failed, scheduling retry"
                    );
                    attempt.retry_count += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e @ TaskError::HardTimeLimit { .. }) => {
                    attempt.fail();
                    warn!(change_request = %slug, error = %e, "Hard time limit hit, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    attempt.fail();
                    let attempts = attempt.retry_count + 1;
                    warn!(change_request = %slug, attempts, error = %e, "Retries exhausted, dead-lettering");
                    return Err(TaskError::Exhausted {
                        attempts,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn run_attempt(
        &self,
        work_unit: &WorkUnit,
        repo_root: &Option<PathBuf>,
    ) -> Result<PipelineRun, TaskError> {
        let soft = self.config.soft_time_limit();
        let hard = self.config.hard_time_limit();
        let execution = self
            .orchestrator
            .execute(work_unit.clone(), repo_root.clone());

        // The soft limit aborts the attempt retryably; the hard limit,
        // normally set above it, is the terminal backstop.
        match tokio::time::timeout(hard, tokio::time::timeout(soft, execution)).await {
            Ok(Ok(Ok(run))) => Ok(run),
            Ok(Ok(Err(stage_error))) => Err(TaskError::Run(stage_error)),
            Ok(Err(_)) => Err(TaskError::SoftTimeLimit { limit: soft }),
            Err(_) => Err(TaskError::HardTimeLimit { limit: hard }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ChangeRequestContext, ChangedFile, FileStatus};
    use crate::errors::StageError;
    use crate::pipeline::{ReportSink, Stage, StageContext, StageKind};
    use crate::refactor::Patch;
    use crate::review::ReviewResult;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // ===== backoff =====

    #[test]
    fn test_backoff_doubles_from_base() {
        let base = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(240));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        let delay = backoff_delay(Duration::from_secs(60), 64);
        assert!(delay >= Duration::from_secs(60));
    }

    // ===== attempt lifecycle =====

    #[test]
    fn test_attempt_lifecycle() {
        let mut attempt = TaskAttempt::new();
        assert_eq!(attempt.status, TaskStatus::Pending);
        attempt.start();
        assert_eq!(attempt.status, TaskStatus::InProgress);
        attempt.complete();
        assert_eq!(attempt.status, TaskStatus::Completed);
        attempt.fail();
        assert_eq!(attempt.status, TaskStatus::Failed);
    }

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    // ===== dispatch =====

    struct NoopStage(StageKind);

    #[async_trait]
    impl Stage for NoopStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn run(&self, _cx: &mut StageContext) -> Result<(), StageError> {
            Ok(())
        }
    }

    /// Review stage that fails the first `failures` attempts, then
    /// produces an empty review.
    struct FlakyReview {
        failures: u32,
        calls: Arc<AtomicU32>,
        hang: bool,
    }

    #[async_trait]
    impl Stage for FlakyReview {
        fn kind(&self) -> StageKind {
            StageKind::Review
        }

        async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if call < self.failures {
                return Err(StageError::fatal("review", "transient backend outage"));
            }
            cx.review = Some(ReviewResult::degraded(0));
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl ReportSink for NullSink {
        async fn post_review_comment(
            &self,
            _context: &ChangeRequestContext,
            _comment: &str,
        ) -> AnyResult<()> {
            Ok(())
        }

        async fn submit_corrective_patches(
            &self,
            _context: &ChangeRequestContext,
            _patches: &[Patch],
        ) -> AnyResult<Option<String>> {
            Ok(None)
        }
    }

    fn executor_with(review: FlakyReview, config: TaskConfig) -> TaskExecutor {
        let orchestrator = Orchestrator::with_stages(
            NoopAnalysis::boxed(),
            Box::new(review),
            Box::new(NoopStage(StageKind::Refactor)),
            Box::new(NoopStage(StageKind::Validate)),
            ReportStageStub::boxed(),
        );
        TaskExecutor::new(config, orchestrator)
    }

    struct NoopAnalysis;

    impl NoopAnalysis {
        fn boxed() -> Box<dyn Stage> {
            Box::new(NoopAnalysis)
        }
    }

    #[async_trait]
    impl Stage for NoopAnalysis {
        fn kind(&self) -> StageKind {
            StageKind::Analysis
        }

        async fn run(&self, _cx: &mut StageContext) -> Result<(), StageError> {
            Ok(())
        }
    }

    struct ReportStageStub;

    impl ReportStageStub {
        fn boxed() -> Box<dyn Stage> {
            Box::new(ReportStageStub)
        }
    }

    #[async_trait]
    impl Stage for ReportStageStub {
        fn kind(&self) -> StageKind {
            StageKind::Report
        }

        async fn run(&self, _cx: &mut StageContext) -> Result<(), StageError> {
            Ok(())
        }
    }

    fn fast_config() -> TaskConfig {
        TaskConfig {
            max_retries: 3,
            backoff_base_secs: 0,
            soft_time_limit_secs: 5,
            hard_time_limit_secs: 10,
        }
    }

    fn work_unit() -> WorkUnit {
        WorkUnit::new(
            ChangeRequestContext::new("acme", "webapp", 9)
                .with_file(ChangedFile::new("a.txt", FileStatus::Modified)),
        )
    }

    #[tokio::test]
    async fn test_dispatch_succeeds_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = executor_with(
            FlakyReview {
                failures: 0,
                calls: calls.clone(),
                hang: false,
            },
            fast_config(),
        );

        let run = executor.dispatch(work_unit(), None).await.unwrap();
        assert!(run.summary.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = executor_with(
            FlakyReview {
                failures: 2,
                calls: calls.clone(),
                hang: false,
            },
            fast_config(),
        );

        let run = executor.dispatch(work_unit(), None).await.unwrap();
        assert!(run.summary.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dispatch_exhausts_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = executor_with(
            FlakyReview {
                failures: u32::MAX,
                calls: calls.clone(),
                hang: false,
            },
            fast_config(),
        );

        let err = executor.dispatch(work_unit(), None).await.unwrap_err();
        match err {
            TaskError::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 4); // initial attempt + 3 retries
                assert!(last_error.contains("transient backend outage"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_dispatch_soft_limit_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = TaskConfig {
            max_retries: 1,
            backoff_base_secs: 0,
            soft_time_limit_secs: 0,
            hard_time_limit_secs: 3600,
        };
        let executor = executor_with(
            FlakyReview {
                failures: 0,
                calls: calls.clone(),
                hang: true,
            },
            config,
        );

        let err = executor.dispatch(work_unit(), None).await.unwrap_err();
        // The soft limit is retryable; exhaustion reports it as the
        // last error.
        assert!(matches!(err, TaskError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_dispatch_hard_limit_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        // Soft above hard so the hard backstop fires first.
        let config = TaskConfig {
            max_retries: 3,
            backoff_base_secs: 0,
            soft_time_limit_secs: 3600,
            hard_time_limit_secs: 0,
        };
        let executor = executor_with(
            FlakyReview {
                failures: 0,
                calls: calls.clone(),
                hang: true,
            },
            config,
        );

        let err = executor.dispatch(work_unit(), None).await.unwrap_err();
        assert!(matches!(err, TaskError::HardTimeLimit { .. }));
        // No retries after a hard limit.
        assert!(calls.load(Ordering::SeqCst) <= 1);
    }
}
