//! Configuration for the Vanguard pipeline.
//!
//! Reads from `.vanguard/vanguard.toml` under the project directory,
//! falling back to defaults for any missing section or field. The loaded
//! [`VanguardConfig`] is an immutable value passed into each component at
//! construction; there is no process-wide mutable settings object.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! max_findings = 20
//! max_suggestions = 5
//!
//! [[backends]]
//! name = "primary"
//! command = "claude"
//! args = ["--print"]
//!
//! [[backends]]
//! name = "secondary"
//! command = "llm-review"
//!
//! [review]
//! backend_timeout_secs = 120
//!
//! [sandbox]
//! lint_timeout_secs = 30
//! test_timeout_secs = 300
//! ignore = [".git", "node_modules", "__pycache__", "target"]
//!
//! [task]
//! max_retries = 3
//! backoff_base_secs = 60
//! soft_time_limit_secs = 1800
//! hard_time_limit_secs = 2100
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One configured reasoning backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Name used in logs and finding attribution.
    pub name: String,
    /// Executable to invoke; the review prompt is piped over stdin.
    pub command: String,
    /// Extra arguments passed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Pipeline-wide limits for the aggregated review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum findings kept after ranking.
    pub max_findings: usize,
    /// Maximum suggestions kept after union/dedup.
    pub max_suggestions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_findings: 20,
            max_suggestions: 5,
        }
    }
}

/// Review fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Per-backend call timeout in seconds.
    pub backend_timeout_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 120,
        }
    }
}

impl ReviewConfig {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

/// Sandbox validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Short timeout for the per-file lint gate.
    pub lint_timeout_secs: u64,
    /// Long timeout for test execution.
    pub test_timeout_secs: u64,
    /// Directory names excluded when staging the working tree copy.
    pub ignore: Vec<String>,
    /// Override argv for the lint run, used verbatim in place of the
    /// per-language default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_command: Option<Vec<String>>,
    /// Override argv for the test run, used verbatim in place of
    /// framework detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<Vec<String>>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            lint_timeout_secs: 30,
            test_timeout_secs: 300,
            ignore: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                "target".to_string(),
            ],
            lint_command: None,
            test_command: None,
        }
    }
}

impl SandboxConfig {
    pub fn lint_timeout(&self) -> Duration {
        Duration::from_secs(self.lint_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

/// Retry policy for the task executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Retries permitted after the first attempt (`retry_count < max_retries`).
    pub max_retries: u32,
    /// Base backoff delay; attempt n waits `backoff_base * 2^n`.
    pub backoff_base_secs: u64,
    /// Soft wall-clock limit per attempt; expiry is a retryable abort.
    pub soft_time_limit_secs: u64,
    /// Hard wall-clock limit per attempt; expiry terminates the task.
    pub hard_time_limit_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_secs: 60,
            soft_time_limit_secs: 1800,
            hard_time_limit_secs: 2100,
        }
    }
}

impl TaskConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }
}

/// Complete, immutable Vanguard configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VanguardConfig {
    pub pipeline: PipelineConfig,
    pub backends: Vec<BackendSpec>,
    pub review: ReviewConfig,
    pub sandbox: SandboxConfig,
    pub task: TaskConfig,
}

/// Raw TOML structure for `.vanguard/vanguard.toml`; every section optional.
#[derive(Debug, Deserialize)]
struct VanguardToml {
    pipeline: Option<PartialPipeline>,
    backends: Option<Vec<BackendSpec>>,
    review: Option<PartialReview>,
    sandbox: Option<PartialSandbox>,
    task: Option<PartialTask>,
}

#[derive(Debug, Deserialize)]
struct PartialPipeline {
    max_findings: Option<usize>,
    max_suggestions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PartialReview {
    backend_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PartialSandbox {
    lint_timeout_secs: Option<u64>,
    test_timeout_secs: Option<u64>,
    ignore: Option<Vec<String>>,
    lint_command: Option<Vec<String>>,
    test_command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PartialTask {
    max_retries: Option<u32>,
    backoff_base_secs: Option<u64>,
    soft_time_limit_secs: Option<u64>,
    hard_time_limit_secs: Option<u64>,
}

impl VanguardConfig {
    /// Load config from `.vanguard/vanguard.toml` in the project directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(".vanguard").join("vanguard.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let raw: VanguardToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(section) = raw.pipeline {
            if let Some(max_findings) = section.max_findings {
                config.pipeline.max_findings = max_findings;
            }
            if let Some(max_suggestions) = section.max_suggestions {
                config.pipeline.max_suggestions = max_suggestions;
            }
        }
        if let Some(backends) = raw.backends {
            config.backends = backends;
        }
        if let Some(section) = raw.review {
            if let Some(secs) = section.backend_timeout_secs {
                config.review.backend_timeout_secs = secs;
            }
        }
        if let Some(section) = raw.sandbox {
            if let Some(secs) = section.lint_timeout_secs {
                config.sandbox.lint_timeout_secs = secs;
            }
            if let Some(secs) = section.test_timeout_secs {
                config.sandbox.test_timeout_secs = secs;
            }
            if let Some(ignore) = section.ignore {
                config.sandbox.ignore = ignore;
            }
            if let Some(argv) = section.lint_command {
                config.sandbox.lint_command = Some(argv);
            }
            if let Some(argv) = section.test_command {
                config.sandbox.test_command = Some(argv);
            }
        }
        if let Some(section) = raw.task {
            if let Some(n) = section.max_retries {
                config.task.max_retries = n;
            }
            if let Some(secs) = section.backoff_base_secs {
                config.task.backoff_base_secs = secs;
            }
            if let Some(secs) = section.soft_time_limit_secs {
                config.task.soft_time_limit_secs = secs;
            }
            if let Some(secs) = section.hard_time_limit_secs {
                config.task.hard_time_limit_secs = secs;
            }
        }

        Ok(config)
    }

    /// Default TOML written by `vanguard config init`.
    pub fn default_toml() -> String {
        r#"[pipeline]
max_findings = 20
max_suggestions = 5

[[backends]]
name = "primary"
command = "claude"
args = ["--print"]

[review]
backend_timeout_secs = 120

[sandbox]
lint_timeout_secs = 30
test_timeout_secs = 300
ignore = [".git", "node_modules", "__pycache__", "target"]

[task]
max_retries = 3
backoff_base_secs = 60
soft_time_limit_secs = 1800
hard_time_limit_secs = 2100
"#
        .to_string()
    }
}
