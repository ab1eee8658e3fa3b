//! Stage sequencing with partial-failure handling.
//!
//! Every stage implements the same seam and reads/writes the shared
//! [`StageContext`]; the orchestrator owns the transition rules:
//!
//! - Analysis → Review, unless the input itself is unusable (aborts
//!   with nothing else running, report included).
//! - Review → Refactor only when findings exist and a mutable working
//!   tree is configured; otherwise straight to Report.
//! - A Review failure still gets a best-effort Report before the run
//!   aborts.
//! - Refactor → Validate only when at least one patch was generated.
//! - Validate → Report always, even when validation itself failed.
//!
//! A run succeeds iff the Review stage succeeded; nothing later changes
//! that.

use crate::analysis::Normalizer;
use crate::config::VanguardConfig;
use crate::context::WorkUnit;
use crate::errors::StageError;
use crate::pipeline::report::{format_partial_review_comment, format_review_comment, ReportSink};
use crate::pipeline::run::{PipelineRun, RunStatus, RunSummary, StageKind, StageOutcome};
use crate::refactor::{CommandFixer, Patch, PatchGenerator};
use crate::review::{ReviewAggregator, ReviewResult};
use crate::sandbox::{Sandbox, ValidationSet};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state the stages accumulate over one run.
pub struct StageContext {
    pub work_unit: WorkUnit,
    /// Present when the caller provided a live working tree for the
    /// sandbox; absent means review-only.
    pub repo_root: Option<PathBuf>,
    pub analysis: Option<crate::analysis::AnalysisReport>,
    pub review: Option<ReviewResult>,
    pub patches: Vec<Patch>,
    pub validation: Option<ValidationSet>,
    pub corrective_submission_created: bool,
    pub corrective_submission_id: Option<String>,
}

impl StageContext {
    pub fn new(work_unit: WorkUnit, repo_root: Option<PathBuf>) -> Self {
        Self {
            work_unit,
            repo_root,
            analysis: None,
            review: None,
            patches: Vec::new(),
            validation: None,
            corrective_submission_created: false,
            corrective_submission_id: None,
        }
    }
}

/// Uniform seam every pipeline stage implements.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError>;
}

struct AnalysisStage;

#[async_trait]
impl Stage for AnalysisStage {
    fn kind(&self) -> StageKind {
        StageKind::Analysis
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        if cx.work_unit.context.files.is_empty() {
            return Err(StageError::fatal(
                "analysis",
                "change request contains no files",
            ));
        }
        cx.analysis = Some(Normalizer::normalize(
            &cx.work_unit.linter_outputs,
            &cx.work_unit.test_outputs,
        ));
        Ok(())
    }
}

struct ReviewStage {
    aggregator: ReviewAggregator,
}

#[async_trait]
impl Stage for ReviewStage {
    fn kind(&self) -> StageKind {
        StageKind::Review
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        let analysis = cx.analysis.clone().unwrap_or_default();
        cx.review = Some(
            self.aggregator
                .review(&cx.work_unit.context, &analysis)
                .await,
        );
        Ok(())
    }
}

struct RefactorStage {
    generator: Option<PatchGenerator>,
}

#[async_trait]
impl Stage for RefactorStage {
    fn kind(&self) -> StageKind {
        StageKind::Refactor
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        let Some(generator) = &self.generator else {
            debug!("No fix backend configured, skipping patch generation");
            return Ok(());
        };
        let Some(review) = &cx.review else {
            return Err(StageError::recoverable("refactor", "no review available"));
        };
        cx.patches = generator.generate(&cx.work_unit.context, review).await;
        Ok(())
    }
}

struct ValidateStage {
    sandbox: Sandbox,
}

#[async_trait]
impl Stage for ValidateStage {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        let Some(repo_root) = cx.repo_root.clone() else {
            return Err(StageError::recoverable(
                "validate",
                "no mutable working tree configured",
            ));
        };
        let staged = self.sandbox.stage(&repo_root)?;
        cx.validation = Some(self.sandbox.validate(staged.root(), &cx.patches).await?);
        Ok(())
    }
}

struct ReportStage {
    sink: Arc<dyn ReportSink>,
}

#[async_trait]
impl Stage for ReportStage {
    fn kind(&self) -> StageKind {
        StageKind::Report
    }

    async fn run(&self, cx: &mut StageContext) -> Result<(), StageError> {
        // No review means the run broke before one was produced; the
        // partial comment still carries the analysis results.
        let comment = match &cx.review {
            Some(review) => {
                format_review_comment(&cx.work_unit.context, review, cx.validation.as_ref())
            }
            None => format_partial_review_comment(&cx.work_unit.context, cx.analysis.as_ref()),
        };
        self.sink
            .post_review_comment(&cx.work_unit.context, &comment)
            .await?;

        // Corrective patches go out only when the entire validated set
        // passed; a partial pass submits nothing.
        if let Some(validation) = &cx.validation {
            if validation.all_tests_passed && !cx.patches.is_empty() {
                let id = self
                    .sink
                    .submit_corrective_patches(&cx.work_unit.context, &cx.patches)
                    .await?;
                cx.corrective_submission_created = true;
                cx.corrective_submission_id = id;
            }
        }
        Ok(())
    }
}

/// Runs the fixed stage sequence for one work unit.
pub struct Orchestrator {
    analysis: Box<dyn Stage>,
    review: Box<dyn Stage>,
    refactor: Box<dyn Stage>,
    validate: Box<dyn Stage>,
    report: Box<dyn Stage>,
}

impl Orchestrator {
    pub fn new(config: &VanguardConfig, sink: Arc<dyn ReportSink>) -> Self {
        // The first configured backend doubles as the fix generator.
        let generator = config.backends.first().map(|spec| {
            PatchGenerator::new(Box::new(CommandFixer::new(
                spec.clone(),
                config.review.backend_timeout(),
            )))
        });

        Self {
            analysis: Box::new(AnalysisStage),
            review: Box::new(ReviewStage {
                aggregator: ReviewAggregator::new(config),
            }),
            refactor: Box::new(RefactorStage { generator }),
            validate: Box::new(ValidateStage {
                sandbox: Sandbox::new(config.sandbox.clone()),
            }),
            report: Box::new(ReportStage { sink }),
        }
    }

    /// Assemble an orchestrator from explicit stages. Stages must be
    /// supplied in pipeline order.
    pub fn with_stages(
        analysis: Box<dyn Stage>,
        review: Box<dyn Stage>,
        refactor: Box<dyn Stage>,
        validate: Box<dyn Stage>,
        report: Box<dyn Stage>,
    ) -> Self {
        Self {
            analysis,
            review,
            refactor,
            validate,
            report,
        }
    }

    /// Execute one work unit through the pipeline. An `Err` means the
    /// run aborted and is eligible for retry by the executor.
    pub async fn execute(
        &self,
        work_unit: WorkUnit,
        repo_root: Option<PathBuf>,
    ) -> Result<PipelineRun, StageError> {
        let slug = work_unit.context.slug();
        info!(change_request = %slug, "Starting pipeline run");
        let mut run = PipelineRun::new(&slug);
        let mut cx = StageContext::new(work_unit, repo_root);

        // Unusable input aborts outright; not even the report runs.
        if let Err(e) = self.analysis.run(&mut cx).await {
            run.record(StageKind::Analysis, StageOutcome::Failed(e.to_string()));
            return Err(e);
        }
        run.record(StageKind::Analysis, StageOutcome::Completed);

        // A failed review still gets whatever report we can produce.
        if let Err(e) = self.review.run(&mut cx).await {
            warn!(change_request = %slug, error = %e, "Review stage failed, producing best-effort report");
            run.record(StageKind::Review, StageOutcome::Failed(e.to_string()));
            if let Err(report_err) = self.report.run(&mut cx).await {
                warn!(change_request = %slug, error = %report_err, "Best-effort report also failed");
            }
            return Err(e);
        }
        run.record(StageKind::Review, StageOutcome::Completed);

        let has_findings = cx
            .review
            .as_ref()
            .is_some_and(|r| !r.findings.is_empty());
        if has_findings && cx.repo_root.is_some() {
            match self.refactor.run(&mut cx).await {
                Ok(()) => {
                    run.record(StageKind::Refactor, StageOutcome::Completed);
                    if cx.patches.is_empty() {
                        run.record(StageKind::Validate, StageOutcome::Skipped);
                    } else {
                        match self.validate.run(&mut cx).await {
                            Ok(()) => {
                                run.record(StageKind::Validate, StageOutcome::Completed);
                            }
                            Err(e) => {
                                // Validation trouble never blocks the report.
                                warn!(change_request = %slug, error = %e, "Validation failed");
                                run.record(
                                    StageKind::Validate,
                                    StageOutcome::Failed(e.to_string()),
                                );
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(change_request = %slug, error = %e, "Patch generation failed");
                    run.record(StageKind::Refactor, StageOutcome::Failed(e.to_string()));
                    run.record(StageKind::Validate, StageOutcome::Skipped);
                }
            }
        } else {
            run.record(StageKind::Refactor, StageOutcome::Skipped);
            run.record(StageKind::Validate, StageOutcome::Skipped);
        }

        if let Err(e) = self.report.run(&mut cx).await {
            run.record(StageKind::Report, StageOutcome::Failed(e.to_string()));
            return Err(e);
        }
        run.record(StageKind::Report, StageOutcome::Completed);

        run.finish(RunStatus::Done);
        run.summary = RunSummary {
            // Success is decided by the review; later stages only add
            // detail.
            success: true,
            issues_found: cx.review.as_ref().map_or(0, |r| r.findings.len()),
            patches_generated: cx.patches.len(),
            patches_validated: cx.validation.as_ref().map_or(0, |v| v.passed),
            corrective_submission_created: cx.corrective_submission_created,
            corrective_submission_id: cx.corrective_submission_id.clone(),
        };
        info!(
            change_request = %slug,
            issues = run.summary.issues_found,
            patches = run.summary.patches_generated,
            "Pipeline run complete"
        );
        Ok(run)
    }
}
