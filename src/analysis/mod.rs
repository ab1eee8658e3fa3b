//! Normalization of raw tool output into a uniform issue model.
//!
//! Linters and test runners each speak their own format; everything
//! downstream (review prompts, reporting, the sandbox gate) consumes
//! the normalized [`Issue`] and [`TestSummary`] shapes produced here.

mod issue;
mod normalizer;

pub use issue::{
    AnalysisReport, Issue, IssueSeverity, TestFailure, TestStatus, TestSummary,
};
pub use normalizer::Normalizer;
