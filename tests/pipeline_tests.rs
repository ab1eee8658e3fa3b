//! End-to-end pipeline runs with shell-script backends in a tempdir.

use std::sync::Arc;

use vanguard::config::{BackendSpec, VanguardConfig};
use vanguard::context::{ChangeRequestContext, ChangedFile, FileStatus, WorkUnit};
use vanguard::pipeline::{JsonReportSink, Orchestrator};
use vanguard::task::TaskExecutor;

/// A backend that swallows its prompt and prints a canned response.
fn echo_backend(name: &str, response: &str) -> BackendSpec {
    BackendSpec {
        name: name.to_string(),
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            format!("cat >/dev/null; printf '%s' '{response}'"),
        ],
    }
}

fn config_with_backends(backends: Vec<BackendSpec>) -> VanguardConfig {
    VanguardConfig {
        backends,
        ..Default::default()
    }
}

fn work_unit_with_file(path: &str, content: &str) -> WorkUnit {
    WorkUnit::new(
        ChangeRequestContext::new("acme", "webapp", 7)
            .with_title("Tidy imports")
            .with_author("jdoe")
            .with_file(
                ChangedFile::new(path, FileStatus::Modified)
                    .with_counts(1, 1)
                    .with_content(content),
            ),
    )
    .with_linter_output("pylint", format!("{path}:1:0: W0611: Unused import os"))
    .with_test_output("pytest", "4 passed in 0.2s")
}

#[tokio::test]
async fn full_run_reviews_fixes_and_reports() {
    let review_json = r#"{"summary": "one cleanup needed", "issues": [{"file": "notes.txt", "line": 1, "severity": "medium", "message": "Unused import os"}], "suggestions": ["add a changelog entry"], "confidence": 0.9}"#;
    // Second backend agrees on the same location.
    let agree_json = r#"{"summary": "same cleanup", "issues": [{"file": "notes.txt", "line": 1, "severity": "medium", "message": "drop the import"}], "confidence": 0.7}"#;

    let config = config_with_backends(vec![
        echo_backend("primary", review_json),
        echo_backend("secondary", agree_json),
    ]);

    let repo = tempfile::tempdir().unwrap();
    std::fs::write(repo.path().join("notes.txt"), "import os\nx = 1\n").unwrap();

    let out = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonReportSink::new(out.path()));
    let orchestrator = Orchestrator::new(&config, sink);

    let run = orchestrator
        .execute(
            work_unit_with_file("notes.txt", "import os\nx = 1\n"),
            Some(repo.path().to_path_buf()),
        )
        .await
        .unwrap();

    assert!(run.summary.success);
    assert_eq!(run.summary.issues_found, 1);
    // The fixable finding produced a patch; .txt has no lint or test
    // tooling, so validation passes trivially and the set is submitted.
    assert_eq!(run.summary.patches_generated, 1);
    assert_eq!(run.summary.patches_validated, 1);
    assert!(run.summary.corrective_submission_created);

    let comment = std::fs::read_to_string(out.path().join("review_comment.md")).unwrap();
    assert!(comment.contains("acme/webapp#7"));
    assert!(comment.contains("Unused import os"));
    assert!(comment.contains("(×2 backends)"));
    assert!(comment.contains("add a changelog entry"));
    assert!(comment.contains("1 of 1 generated patches passed validation."));
    assert!(out.path().join("corrective_patches.json").exists());

    // The repository itself was never touched.
    assert_eq!(
        std::fs::read_to_string(repo.path().join("notes.txt")).unwrap(),
        "import os\nx = 1\n"
    );
}

#[tokio::test]
async fn unreachable_backends_degrade_without_failing() {
    let config = config_with_backends(vec![BackendSpec {
        name: "ghost".to_string(),
        command: "definitely-not-a-real-command-xyz".to_string(),
        args: vec![],
    }]);

    let out = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonReportSink::new(out.path()));
    let orchestrator = Orchestrator::new(&config, sink);

    let run = orchestrator
        .execute(work_unit_with_file("notes.txt", "x = 1\n"), None)
        .await
        .unwrap();

    // Review degraded to zero responses; the run still succeeds and
    // reports.
    assert!(run.summary.success);
    assert_eq!(run.summary.issues_found, 0);
    assert_eq!(run.summary.patches_generated, 0);
    let comment = std::fs::read_to_string(out.path().join("review_comment.md")).unwrap();
    assert!(comment.contains("no backends responded"));
    assert!(comment.contains("0/1 backends responded"));
}

#[tokio::test]
async fn review_only_run_skips_sandbox() {
    let review_json = r#"{"summary": "needs work", "issues": [{"file": "notes.txt", "line": 2, "severity": "high", "message": "Unused import os"}], "confidence": 0.8}"#;
    let config = config_with_backends(vec![echo_backend("primary", review_json)]);

    let out = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonReportSink::new(out.path()));
    let orchestrator = Orchestrator::new(&config, sink);

    // No repo root: findings exist but nothing may be patched.
    let run = orchestrator
        .execute(work_unit_with_file("notes.txt", "x = 1\nimport os\n"), None)
        .await
        .unwrap();

    assert!(run.summary.success);
    assert_eq!(run.summary.issues_found, 1);
    assert_eq!(run.summary.patches_generated, 0);
    assert!(!run.summary.corrective_submission_created);
    assert!(!out.path().join("corrective_patches.json").exists());
}

#[tokio::test]
async fn executor_runs_unit_end_to_end() {
    let review_json = r#"{"summary": "fine", "issues": [], "confidence": 0.95}"#;
    let config = config_with_backends(vec![echo_backend("primary", review_json)]);

    let out = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonReportSink::new(out.path()));
    let orchestrator = Orchestrator::new(&config, sink);
    let executor = TaskExecutor::new(config.task.clone(), orchestrator);

    let run = executor
        .dispatch(work_unit_with_file("notes.txt", "x = 1\n"), None)
        .await
        .unwrap();

    assert!(run.summary.success);
    assert!(out.path().join("review_comment.md").exists());
}

#[tokio::test]
async fn empty_change_set_is_a_unit_failure() {
    let config = config_with_backends(vec![]);
    let out = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonReportSink::new(out.path()));
    let orchestrator = Orchestrator::new(&config, sink);
    let executor = TaskExecutor::new(
        vanguard::config::TaskConfig {
            max_retries: 0,
            backoff_base_secs: 0,
            ..Default::default()
        },
        orchestrator,
    );

    let unit = WorkUnit::new(ChangeRequestContext::new("acme", "webapp", 8));
    let err = executor.dispatch(unit, None).await.unwrap_err();
    assert!(err.to_string().contains("no files"));
    assert!(!out.path().join("review_comment.md").exists());
}
