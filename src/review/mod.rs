//! Multi-backend review: fan-out to reasoning backends, parse each
//! response, and merge everything into one ranked review.

mod aggregator;
mod backend;
mod findings;

pub(crate) use backend::run_backend_command;

pub use aggregator::ReviewAggregator;
pub use backend::{extract_json, CommandBackend, ReviewBackend};
pub use findings::{
    BackendReview, FindingSeverity, RawFinding, ReviewFinding, ReviewResult,
};
