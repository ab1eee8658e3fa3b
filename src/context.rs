//! Change-request context shared across pipeline stages.
//!
//! A [`WorkUnit`] is the input to one pipeline invocation: the change
//! request metadata plus the raw tool outputs captured by the outer
//! system. Stages read from it and never mutate it; derived artifacts
//! accumulate in the pipeline's own state instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of one file within a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

/// One file touched by a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Path relative to the repository root.
    pub path: String,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    pub status: FileStatus,
    /// Unified diff of the change, when the platform provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// Full proposed content of the file, when fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            additions: 0,
            deletions: 0,
            status,
            diff: None,
            content: None,
        }
    }

    pub fn with_counts(mut self, additions: u32, deletions: u32) -> Self {
        self.additions = additions;
        self.deletions = deletions;
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = Some(diff.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Best-effort language tag from the file extension, used to pick
    /// lint and test tooling.
    pub fn language(&self) -> Option<Language> {
        language_of(&self.path)
    }
}

/// Languages the validation sandbox knows how to lint and test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
        }
    }
}

/// Language detection by extension.
pub fn language_of(path: &str) -> Option<Language> {
    let ext = std::path::Path::new(path).extension()?.to_str()?;
    match ext {
        "py" => Some(Language::Python),
        "js" | "jsx" | "ts" | "tsx" => Some(Language::JavaScript),
        _ => None,
    }
}

/// Metadata of the change request under review. Immutable once
/// constructed; deserialized from the work unit payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestContext {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub files: Vec<ChangedFile>,
}

impl ChangeRequestContext {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
            title: String::new(),
            description: String::new(),
            author: String::new(),
            files: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_file(mut self, file: ChangedFile) -> Self {
        self.files.push(file);
        self
    }

    /// `owner/repo#number`, used in logs and report headers.
    pub fn slug(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.number)
    }

    /// Paths of all changed files, in declaration order.
    pub fn changed_paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Languages present in the change set, deduplicated.
    pub fn languages(&self) -> Vec<Language> {
        let mut seen = Vec::new();
        for file in &self.files {
            if let Some(lang) = file.language() {
                if !seen.contains(&lang) {
                    seen.push(lang);
                }
            }
        }
        seen
    }
}

/// One unit of work handed to the executor: the change request plus the
/// raw tool outputs captured upstream, keyed by tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub context: ChangeRequestContext,
    /// Raw linter stdout keyed by tool (`pylint`, `eslint`).
    #[serde(default)]
    pub linter_outputs: BTreeMap<String, String>,
    /// Raw test-runner stdout keyed by framework (`pytest`, `jest`).
    #[serde(default)]
    pub test_outputs: BTreeMap<String, String>,
}

impl WorkUnit {
    pub fn new(context: ChangeRequestContext) -> Self {
        Self {
            context,
            linter_outputs: BTreeMap::new(),
            test_outputs: BTreeMap::new(),
        }
    }

    pub fn with_linter_output(mut self, tool: impl Into<String>, raw: impl Into<String>) -> Self {
        self.linter_outputs.insert(tool.into(), raw.into());
        self
    }

    pub fn with_test_output(mut self, tool: impl Into<String>, raw: impl Into<String>) -> Self {
        self.test_outputs.insert(tool.into(), raw.into());
        self
    }
}
