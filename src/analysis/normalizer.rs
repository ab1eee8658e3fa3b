//! Parsers that turn raw linter and test-runner output into the
//! normalized issue model.
//!
//! Each parser is tolerant: lines or entries it cannot interpret are
//! skipped rather than failing the parse, since tool output often
//! interleaves banners and progress noise with the records we want. An
//! entirely unparsable tool output contributes nothing and logs a
//! warning; it never fails the analysis.

use crate::analysis::issue::{
    AnalysisReport, Issue, IssueSeverity, TestFailure, TestSummary,
};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// `path:line:col: CODE: message` as emitted by pylint's default reporter.
static PYLINT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]+):(\d+):(\d+): ([A-Z]\d+): (.+)$").expect("pylint regex must compile")
});

/// pytest's trailing summary line, e.g. `3 passed, 1 failed, 2 skipped`.
static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) passed(?:, (\d+) failed)?(?:, (\d+) skipped)?")
        .expect("pytest summary regex must compile")
});

/// pytest short-summary failure lines: `FAILED test_mod.py::test_x - reason`.
static PYTEST_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FAILED (.+?) - (.+)").expect("pytest failed regex must compile"));

#[derive(Debug, Deserialize)]
struct EslintFile {
    #[serde(rename = "filePath")]
    file_path: String,
    messages: Vec<EslintMessage>,
}

#[derive(Debug, Deserialize)]
struct EslintMessage {
    line: Option<u32>,
    column: Option<u32>,
    severity: u8,
    #[serde(rename = "ruleId")]
    rule_id: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JestReport {
    #[serde(rename = "numTotalTests")]
    num_total_tests: u32,
    #[serde(rename = "numPassedTests")]
    num_passed_tests: u32,
    #[serde(rename = "numFailedTests")]
    num_failed_tests: u32,
    #[serde(rename = "numPendingTests", default)]
    num_pending_tests: u32,
    #[serde(rename = "testResults", default)]
    test_results: Vec<JestSuite>,
}

#[derive(Debug, Deserialize)]
struct JestSuite {
    #[serde(rename = "assertionResults", default)]
    assertion_results: Vec<JestAssertion>,
}

#[derive(Debug, Deserialize)]
struct JestAssertion {
    status: String,
    #[serde(rename = "fullName", default)]
    full_name: String,
    #[serde(rename = "failureMessages", default)]
    failure_messages: Vec<String>,
}

/// Stateless normalizer over raw tool outputs. Deterministic, no I/O.
pub struct Normalizer;

impl Normalizer {
    /// Normalize the raw outputs of all tools into one report. Outputs
    /// are keyed by tool name; unknown tools are skipped with a warning.
    pub fn normalize(
        linter_outputs: &BTreeMap<String, String>,
        test_outputs: &BTreeMap<String, String>,
    ) -> AnalysisReport {
        let mut report = AnalysisReport::default();

        for (tool, raw) in linter_outputs {
            match tool.as_str() {
                "pylint" => report.issues.extend(Self::parse_pylint(raw)),
                "eslint" => report.issues.extend(Self::parse_eslint(raw)),
                other => warn!(tool = other, "Unsupported linter output, skipping"),
            }
        }

        for (tool, raw) in test_outputs {
            let summary = match tool.as_str() {
                "pytest" => Self::parse_pytest(raw),
                "jest" => Self::parse_jest(raw),
                other => {
                    warn!(tool = other, "Unsupported test-runner output, skipping");
                    continue;
                }
            };
            report.test_summary.merge(summary);
        }

        debug!(
            issues = report.total_issues(),
            critical = report.critical_issues(),
            tests = report.test_summary.total,
            "Normalized tool outputs"
        );
        report
    }

    fn parse_pylint(raw: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        for line in raw.lines() {
            let Some(caps) = PYLINT_LINE.captures(line.trim_end()) else {
                continue;
            };
            let (Ok(line_no), Ok(column)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>())
            else {
                continue;
            };
            let code = &caps[4];
            let severity = match code.chars().next() {
                Some('E') | Some('F') => IssueSeverity::Error,
                Some('W') => IssueSeverity::Warning,
                _ => IssueSeverity::Info,
            };
            issues.push(
                Issue::new(&caps[1], line_no, severity, code, &caps[5], "pylint")
                    .with_column(column),
            );
        }
        issues
    }

    fn parse_eslint(raw: &str) -> Vec<Issue> {
        let files: Vec<EslintFile> = match serde_json::from_str(raw) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "ESLint output was not valid JSON, skipping");
                return Vec::new();
            }
        };

        let mut issues = Vec::new();
        for file in files {
            for msg in file.messages {
                let severity = match msg.severity {
                    2 => IssueSeverity::Error,
                    1 => IssueSeverity::Warning,
                    _ => IssueSeverity::Info,
                };
                issues.push(
                    Issue::new(
                        &file.file_path,
                        msg.line.unwrap_or(0),
                        severity,
                        msg.rule_id.unwrap_or_default(),
                        msg.message,
                        "eslint",
                    )
                    .with_column(msg.column.unwrap_or(0)),
                );
            }
        }
        issues
    }

    fn parse_pytest(raw: &str) -> TestSummary {
        let mut summary = TestSummary::default();

        if let Some(caps) = PYTEST_SUMMARY.captures(raw) {
            let passed = caps[1].parse::<u32>().unwrap_or(0);
            let failed = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            let skipped = caps
                .get(3)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0);
            summary.passed = passed;
            summary.failed = failed;
            summary.skipped = skipped;
            summary.total = passed + failed + skipped;
        } else {
            warn!("No pytest summary line found in output");
        }

        for caps in PYTEST_FAILED.captures_iter(raw) {
            summary.failures.push(TestFailure {
                test: caps[1].trim().to_string(),
                reason: caps[2].trim().to_string(),
            });
        }

        // merge() onto a fresh default recomputes status from counts.
        let mut normalized = TestSummary::default();
        normalized.merge(summary);
        normalized
    }

    fn parse_jest(raw: &str) -> TestSummary {
        let report: JestReport = match serde_json::from_str(raw) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Jest output was not valid JSON, skipping");
                return TestSummary::default();
            }
        };

        let mut summary = TestSummary {
            total: report.num_total_tests,
            passed: report.num_passed_tests,
            failed: report.num_failed_tests,
            skipped: report.num_pending_tests,
            ..Default::default()
        };

        for suite in report.test_results {
            for assertion in suite.assertion_results {
                if assertion.status == "failed" {
                    summary.failures.push(TestFailure {
                        test: assertion.full_name,
                        reason: assertion
                            .failure_messages
                            .first()
                            .cloned()
                            .unwrap_or_default(),
                    });
                }
            }
        }

        let mut normalized = TestSummary::default();
        normalized.merge(summary);
        normalized
    }
}
