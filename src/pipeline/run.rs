//! Per-run pipeline state: which stages ran, how they ended, and the
//! summary handed back to the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Analysis,
    Review,
    Refactor,
    Validate,
    Report,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageKind::Analysis => "analysis",
            StageKind::Review => "review",
            StageKind::Refactor => "refactor",
            StageKind::Validate => "validate",
            StageKind::Report => "report",
        };
        write!(f, "{name}")
    }
}

/// How one stage ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Completed,
    /// The transition rules routed around this stage.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub kind: StageKind,
    pub outcome: StageOutcome,
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Done,
    Aborted,
}

/// Counters reported to the caller at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// True iff the Review stage succeeded. Later stages never change
    /// this.
    pub success: bool,
    pub issues_found: usize,
    pub patches_generated: usize,
    pub patches_validated: usize,
    pub corrective_submission_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrective_submission_id: Option<String>,
}

/// One pipeline invocation's record, owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    /// `owner/repo#number` of the change request.
    pub change_request: String,
    pub stages: Vec<StageRecord>,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn new(change_request: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            change_request: change_request.into(),
            stages: Vec::new(),
            status: RunStatus::Aborted,
            summary: RunSummary::default(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, kind: StageKind, outcome: StageOutcome) {
        self.stages.push(StageRecord { kind, outcome });
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn outcome_of(&self, kind: StageKind) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|record| record.kind == kind)
            .map(|record| &record.outcome)
    }
}
