//! Isolated validation of proposed patches.
//!
//! The sandbox never touches the caller's working tree: validation runs
//! against a staged copy, and even within that copy every patch is
//! applied, checked, and then restored before the next one. The restore
//! happens on every path, including check failures; only a failure of
//! the restore itself aborts validation.

use crate::config::SandboxConfig;
use crate::context::{language_of, Language};
use crate::errors::SandboxError;
use crate::refactor::Patch;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of validating one patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub file: String,
    pub tests_passed: bool,
    pub linter_passed: bool,
    /// Combined tool output, truncated upstream of reporting.
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    fn errored(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            tests_passed: false,
            linter_passed: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.tests_passed && self.linter_passed
    }
}

/// Results for a whole patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSet {
    pub results: Vec<ValidationResult>,
    pub all_tests_passed: bool,
    pub passed: usize,
    pub total: usize,
}

impl ValidationSet {
    pub fn new(results: Vec<ValidationResult>) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.passed()).count();
        let all_tests_passed = results.iter().all(|r| r.passed());
        Self {
            results,
            all_tests_passed,
            passed,
            total,
        }
    }
}

/// A private copy of the working tree, dropped with its tempdir.
pub struct StagedTree {
    dir: TempDir,
}

impl StagedTree {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Snapshot of one file's state before a patch was applied.
struct FileSnapshot {
    path: PathBuf,
    /// `None` when the file did not exist before the patch.
    original: Option<Vec<u8>>,
}

impl FileSnapshot {
    fn capture(path: &Path) -> std::io::Result<Self> {
        let original = match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }

    /// Put the file back exactly as captured, removing it when it did
    /// not previously exist.
    fn restore(self) -> std::io::Result<()> {
        match self.original {
            Some(bytes) => std::fs::write(&self.path, bytes),
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            },
        }
    }
}

/// Patch validation sandbox.
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Copy the working tree into a fresh tempdir, excluding VCS and
    /// artifact directories. The staged tree is exclusive to one
    /// validation run.
    pub fn stage(&self, repo_root: &Path) -> Result<StagedTree, SandboxError> {
        let dir = TempDir::new().map_err(|source| SandboxError::StageFailed {
            path: repo_root.to_path_buf(),
            source,
        })?;

        let ignored = |name: &str| self.config.ignore.iter().any(|i| i == name);
        let walker = WalkDir::new(repo_root).into_iter().filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(ignored))
        });

        let mut copied = 0usize;
        for entry in walker {
            let entry = entry.map_err(|e| SandboxError::StageFailed {
                path: repo_root.to_path_buf(),
                source: e.into(),
            })?;
            let Ok(relative) = entry.path().strip_prefix(repo_root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let target = dir.path().join(relative);
            let result = if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)
            } else {
                std::fs::copy(entry.path(), &target).map(|_| ())
            };
            result.map_err(|source| SandboxError::StageFailed {
                path: entry.path().to_path_buf(),
                source,
            })?;
            copied += 1;
        }

        debug!(entries = copied, staged_root = %dir.path().display(), "Staged working tree copy");
        Ok(StagedTree { dir })
    }

    /// Validate each patch independently inside the staged tree. Check
    /// failures fold into that patch's result; only a restore failure
    /// is an error.
    pub async fn validate(
        &self,
        staged_root: &Path,
        patches: &[Patch],
    ) -> Result<ValidationSet, SandboxError> {
        info!(patches = patches.len(), "Validating patch set in sandbox");
        let mut results = Vec::with_capacity(patches.len());
        for patch in patches {
            results.push(self.validate_patch(staged_root, patch).await?);
        }
        let set = ValidationSet::new(results);
        info!(
            passed = set.passed,
            total = set.total,
            all_passed = set.all_tests_passed,
            "Sandbox validation complete"
        );
        Ok(set)
    }

    async fn validate_patch(
        &self,
        staged_root: &Path,
        patch: &Patch,
    ) -> Result<ValidationResult, SandboxError> {
        let target = staged_root.join(&patch.file);

        let snapshot = match FileSnapshot::capture(&target) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return Ok(ValidationResult::errored(
                    &patch.file,
                    format!("failed to snapshot original content: {e}"),
                ));
            }
        };

        let outcome = self.run_checks(staged_root, &target, patch).await;

        // The restore runs on every path; its failure is the only thing
        // that aborts the validation run.
        snapshot
            .restore()
            .map_err(|source| SandboxError::RestoreFailed {
                path: target.clone(),
                source,
            })?;

        Ok(outcome)
    }

    /// Apply the patch, gate on the linter, then run tests. Never
    /// restores; the caller owns the snapshot.
    async fn run_checks(
        &self,
        staged_root: &Path,
        target: &Path,
        patch: &Patch,
    ) -> ValidationResult {
        // Apply errors fold into this patch's result; they never abort
        // the validation run.
        let apply_error = |source: std::io::Error| SandboxError::ApplyFailed {
            path: target.to_path_buf(),
            source,
        };
        if let Some(parent) = target.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ValidationResult::errored(&patch.file, apply_error(e).to_string());
            }
        }
        if let Err(e) = std::fs::write(target, &patch.patched_content) {
            return ValidationResult::errored(&patch.file, apply_error(e).to_string());
        }

        let mut output = String::new();

        if let Some((program, args)) = self.lint_invocation(&patch.file) {
            match run_tool(&program, &args, staged_root, self.config.lint_timeout()).await {
                ToolOutcome::Passed(out) => output.push_str(&out),
                ToolOutcome::Failed(out) => {
                    // Lint gate failed: tests are skipped, the patch is
                    // rejected as-is.
                    warn!(file = %patch.file, "Lint gate failed for patch");
                    return ValidationResult {
                        file: patch.file.clone(),
                        tests_passed: false,
                        linter_passed: false,
                        output: out,
                        error: None,
                    };
                }
                ToolOutcome::Errored(e) => {
                    return ValidationResult::errored(&patch.file, e);
                }
            }
        }

        let tests_passed = match self.test_invocation(staged_root, &patch.file) {
            Some((program, args)) => {
                match run_tool(&program, &args, staged_root, self.config.test_timeout()).await {
                    ToolOutcome::Passed(out) => {
                        output.push_str(&out);
                        true
                    }
                    ToolOutcome::Failed(out) => {
                        output.push_str(&out);
                        false
                    }
                    ToolOutcome::Errored(e) => {
                        return ValidationResult::errored(&patch.file, e);
                    }
                }
            }
            None => {
                debug!(file = %patch.file, "No test framework detected, skipping tests");
                true
            }
        };

        ValidationResult {
            file: patch.file.clone(),
            tests_passed,
            linter_passed: true,
            output,
            error: None,
        }
    }

    /// Lint argv for one file: the configured override verbatim, or the
    /// per-language default.
    fn lint_invocation(&self, file: &str) -> Option<(String, Vec<String>)> {
        if let Some(argv) = &self.config.lint_command {
            let (program, args) = argv.split_first()?;
            return Some((program.clone(), args.to_vec()));
        }
        lint_command(file).map(|(program, args)| (program.to_string(), args))
    }

    /// Test argv: the configured override verbatim, or whatever
    /// framework detection finds in the staged tree.
    fn test_invocation(&self, staged_root: &Path, file: &str) -> Option<(String, Vec<String>)> {
        if let Some(argv) = &self.config.test_command {
            let (program, args) = argv.split_first()?;
            return Some((program.clone(), args.to_vec()));
        }
        test_command(staged_root, file)
    }
}

enum ToolOutcome {
    Passed(String),
    Failed(String),
    Errored(String),
}

async fn run_tool(program: &str, args: &[String], cwd: &Path, timeout: Duration) -> ToolOutcome {
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => return ToolOutcome::Errored(format!("failed to spawn {program}: {e}")),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => {
            let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&out.stderr));
            if out.status.success() {
                ToolOutcome::Passed(combined)
            } else {
                ToolOutcome::Failed(combined)
            }
        }
        Ok(Err(e)) => ToolOutcome::Errored(format!("{program} failed: {e}")),
        Err(_) => ToolOutcome::Errored(format!("{program} timed out after {timeout:?}")),
    }
}

/// Linter invocation for one file, confined to that file. Unsupported
/// extensions skip linting entirely.
fn lint_command(file: &str) -> Option<(&'static str, Vec<String>)> {
    match language_of(file)? {
        Language::Python => Some(("pylint", vec!["--errors-only".to_string(), file.to_string()])),
        Language::JavaScript => Some(("npx", vec!["eslint".to_string(), file.to_string()])),
    }
}

/// Detect the project's test command for the patched file's language,
/// narrowed to a related test file when one exists.
fn test_command(staged_root: &Path, file: &str) -> Option<(String, Vec<String>)> {
    match language_of(file)? {
        Language::Python => {
            let has_marker = ["pytest.ini", "setup.cfg", "setup.py", "pyproject.toml"]
                .iter()
                .any(|m| staged_root.join(m).exists());
            if !has_marker {
                return None;
            }
            let mut args = Vec::new();
            if let Some(candidate) = related_test_file(staged_root, file) {
                args.push(candidate);
            }
            Some(("pytest".to_string(), args))
        }
        Language::JavaScript => {
            let manifest = std::fs::read_to_string(staged_root.join("package.json")).ok()?;
            let package: serde_json::Value = serde_json::from_str(&manifest).ok()?;
            let test_script = package
                .get("scripts")
                .and_then(|s| s.get("test"))
                .and_then(|t| t.as_str())?;
            if test_script.contains("jest") {
                let mut args = vec!["jest".to_string()];
                if let Some(candidate) = related_test_file(staged_root, file) {
                    args.push(candidate);
                }
                Some(("npx".to_string(), args))
            } else {
                Some(("npm".to_string(), vec!["test".to_string()]))
            }
        }
    }
}

/// First existing conventional test file for the given source file.
fn related_test_file(staged_root: &Path, file: &str) -> Option<String> {
    let path = Path::new(file);
    let stem = path.file_stem()?.to_str()?;
    let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();

    let candidates: Vec<PathBuf> = match language_of(file)? {
        Language::Python => vec![
            PathBuf::from(format!("tests/test_{stem}.py")),
            parent.join(format!("test_{stem}.py")),
            parent.join("tests").join(format!("test_{stem}.py")),
        ],
        Language::JavaScript => vec![
            parent.join(format!("{stem}.test.js")),
            parent.join("__tests__").join(format!("{stem}.test.js")),
            PathBuf::from(format!("tests/{stem}.test.js")),
        ],
    };

    candidates
        .into_iter()
        .find(|c| staged_root.join(c).exists())
        .and_then(|c| c.to_str().map(String::from))
}
