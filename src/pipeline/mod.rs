//! The multi-stage review pipeline: fixed stage sequencing with
//! partial-failure handling, and reporting at the end of every run that
//! gets far enough to have something to say.

mod orchestrator;
mod report;
mod run;

pub use orchestrator::{Orchestrator, Stage, StageContext};
pub use report::{
    format_partial_review_comment, format_review_comment, JsonReportSink, ReportSink,
};
pub use run::{PipelineRun, RunStatus, RunSummary, StageKind, StageOutcome, StageRecord};
