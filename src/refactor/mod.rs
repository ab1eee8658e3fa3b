//! Corrective patch generation from review findings.
//!
//! Only mechanically-fixable findings are attempted: either the message
//! matches a known fixable pattern, or enough backends agreed on a
//! non-trivial finding to justify a generated fix. Fixable findings are
//! grouped per file and each file with known content gets one proposed
//! patch, produced by a fix backend and diffed against the original.

use crate::config::BackendSpec;
use crate::context::ChangeRequestContext;
use crate::errors::BackendError;
use crate::review::{ReviewBackend, ReviewFinding, ReviewResult};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Finding messages that describe mechanical, safely-automatable fixes.
static FIXABLE_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)missing.*docstring|unused.*(import|variable)|trailing.*whitespace|line too long|missing.*semicolon|.*is not defined",
    )
    .expect("fixable-message regex must compile")
});

/// One line-level change inside a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    /// 1-based line number in the patched file.
    pub line: u32,
    /// The finding message this change addresses, when one matched.
    pub issue: String,
    pub original: String,
    pub fixed: String,
}

/// A proposed corrective patch for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub file: String,
    pub original_content: String,
    pub patched_content: String,
    /// Unified diff (`a/<file>` → `b/<file>`, 3 context lines).
    pub diff: String,
    pub fixes: Vec<FixRecord>,
    pub confidence: f64,
}

/// Protocol for generating fixed file content.
#[async_trait]
pub trait FixBackend: Send + Sync {
    fn name(&self) -> &str;
    /// Return the complete corrected file content for the prompt.
    async fn fix(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Fix backend that invokes a configured CLI command, same subprocess
/// protocol as the review backends.
#[derive(Debug, Clone)]
pub struct CommandFixer {
    spec: BackendSpec,
    timeout: Duration,
}

impl CommandFixer {
    pub fn new(spec: BackendSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait]
impl FixBackend for CommandFixer {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn fix(&self, prompt: &str) -> Result<String, BackendError> {
        crate::review::run_backend_command(&self.spec, prompt, self.timeout).await
    }
}

/// Generates corrective patches for the fixable subset of a review.
pub struct PatchGenerator {
    fixer: Box<dyn FixBackend>,
}

impl PatchGenerator {
    pub fn new(fixer: Box<dyn FixBackend>) -> Self {
        Self { fixer }
    }

    /// A finding qualifies for an automated fix when its message looks
    /// mechanical, or when multiple backends agreed and it isn't
    /// low-severity noise.
    pub fn is_fixable(finding: &ReviewFinding) -> bool {
        FIXABLE_MESSAGE.is_match(&finding.message)
            || (finding.agreement_count >= 2
                && finding.severity != crate::review::FindingSeverity::Low)
    }

    /// Generate one patch per file that has fixable findings and known
    /// content. A failing fix backend skips that file only.
    pub async fn generate(
        &self,
        context: &ChangeRequestContext,
        review: &ReviewResult,
    ) -> Vec<Patch> {
        let mut by_file: BTreeMap<&str, Vec<&ReviewFinding>> = BTreeMap::new();
        for finding in review.findings.iter().filter(|f| Self::is_fixable(f)) {
            by_file.entry(finding.file.as_str()).or_default().push(finding);
        }

        info!(
            change_request = %context.slug(),
            fixable_files = by_file.len(),
            "Generating corrective patches"
        );

        let mut patches = Vec::new();
        for (path, findings) in by_file {
            let Some(content) = context
                .files
                .iter()
                .find(|f| f.path == path)
                .and_then(|f| f.content.as_deref())
            else {
                debug!(file = path, "No content available, skipping fix");
                continue;
            };

            let prompt = build_fix_prompt(path, content, &findings);
            let raw = match self.fixer.fix(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(file = path, backend = %self.fixer.name(), error = %e, "Fix generation failed, skipping file");
                    continue;
                }
            };

            let patched = strip_code_fences(&raw);
            if patched.trim() == content.trim() {
                debug!(file = path, "Fix backend returned unchanged content");
                continue;
            }

            let fixes = identify_fixes(content, &patched, &findings);
            let confidence = if fixes.is_empty() { 0.5 } else { 0.8 };
            patches.push(Patch {
                file: path.to_string(),
                original_content: content.to_string(),
                patched_content: patched.clone(),
                diff: unified_diff(path, content, &patched),
                fixes,
                confidence,
            });
        }

        patches
    }
}

/// Low-creativity prompt: the full file plus the findings to address,
/// asking for nothing but the corrected file back.
fn build_fix_prompt(path: &str, content: &str, findings: &[&ReviewFinding]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Fix ONLY the issues listed below. Return the complete corrected file \
         content and nothing else. Do not reformat unrelated code.\n\n",
    );
    prompt.push_str("Issues:\n");
    for finding in findings {
        prompt.push_str(&format!("- line {}: {}\n", finding.line, finding.message));
    }
    prompt.push_str(&format!("\nFile `{path}`:\n```\n{content}\n```\n"));
    prompt
}

/// Remove a surrounding markdown code fence from model output.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines = trimmed.lines();
    lines.next(); // opening fence, possibly with a language tag
    let mut body: Vec<&str> = lines.collect();
    if body.last().is_some_and(|l| l.trim() == "```") {
        body.pop();
    }
    body.join("\n")
}

/// Line-level comparison of original and patched content, attributing
/// each changed line to the finding at that line when one exists.
fn identify_fixes(original: &str, patched: &str, findings: &[&ReviewFinding]) -> Vec<FixRecord> {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = patched.lines().collect();
    let mut fixes = Vec::new();

    let max = old.len().max(new.len());
    for i in 0..max {
        let before = old.get(i).copied().unwrap_or("");
        let after = new.get(i).copied().unwrap_or("");
        if before == after {
            continue;
        }
        let line = (i + 1) as u32;
        let issue = findings
            .iter()
            .find(|f| f.line == line)
            .map(|f| f.message.clone())
            .unwrap_or_default();
        fixes.push(FixRecord {
            line,
            issue,
            original: before.to_string(),
            fixed: after.to_string(),
        });
    }

    fixes
}

/// Minimal single-hunk unified diff with three lines of context.
pub fn unified_diff(file: &str, original: &str, patched: &str) -> String {
    let old: Vec<&str> = original.lines().collect();
    let new: Vec<&str> = patched.lines().collect();

    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    if prefix == old.len() && prefix == new.len() {
        return String::new();
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    const CONTEXT: usize = 3;
    let start = prefix.saturating_sub(CONTEXT);
    let old_changed_end = old.len() - suffix;
    let new_changed_end = new.len() - suffix;
    let old_end = (old_changed_end + CONTEXT).min(old.len());
    let new_end = (new_changed_end + CONTEXT).min(new.len());

    let mut out = format!(
        "--- a/{file}\n+++ b/{file}\n@@ -{},{} +{},{} @@\n",
        start + 1,
        old_end - start,
        start + 1,
        new_end - start
    );
    for line in &old[start..prefix] {
        out.push_str(&format!(" {line}\n"));
    }
    for line in &old[prefix..old_changed_end] {
        out.push_str(&format!("-{line}\n"));
    }
    for line in &new[prefix..new_changed_end] {
        out.push_str(&format!("+{line}\n"));
    }
    for line in &old[old_changed_end..old_end] {
        out.push_str(&format!(" {line}\n"));
    }
    out
}
