//! Reasoning backend protocol and the subprocess implementation.
//!
//! A backend is anything that can turn a review prompt into a
//! [`BackendReview`]. The shipped implementation shells out to a
//! configured executable, pipes the prompt over stdin, and extracts a
//! JSON object from possibly-markdown output. Output that isn't valid
//! review JSON degrades to a summary-only review rather than failing
//! the call.

use crate::config::BackendSpec;
use crate::errors::BackendError;
use crate::review::findings::BackendReview;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Protocol for calling one reasoning backend.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn review(&self, prompt: &str) -> Result<BackendReview, BackendError>;
}

/// Backend that invokes a configured CLI command.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    spec: BackendSpec,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(spec: BackendSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait]
impl ReviewBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn review(&self, prompt: &str) -> Result<BackendReview, BackendError> {
        let raw = run_backend_command(&self.spec, prompt, self.timeout).await?;
        Ok(parse_backend_output(&self.spec.name, &raw))
    }
}

/// Invoke the backend executable with the prompt on stdin, collecting
/// stdout under a timeout. Shared with the fix generator, which speaks
/// the same subprocess protocol.
pub(crate) async fn run_backend_command(
    spec: &BackendSpec,
    prompt: &str,
    timeout: Duration,
) -> Result<String, BackendError> {
    debug!(backend = %spec.name, command = %spec.command, "Invoking review backend");

    let mut child = Command::new(&spec.command)
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BackendError::SpawnFailed {
            command: spec.command.clone(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(BackendError::StdinWrite)?;
        stdin.shutdown().await.map_err(BackendError::StdinWrite)?;
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| BackendError::SpawnFailed {
            command: spec.command.clone(),
            source,
        })?,
        Err(_) => {
            return Err(BackendError::Timeout {
                backend: spec.name.clone(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(backend = %spec.name, stderr = %stderr.trim(), "Backend exited non-zero");
        return Err(BackendError::NonZeroExit {
            backend: spec.name.clone(),
            exit_code: output.status.code().unwrap_or(-1),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(BackendError::EmptyOutput {
            backend: spec.name.clone(),
        });
    }

    Ok(stdout)
}

/// Parse raw backend output into a review, degrading when the output
/// contains no usable JSON object.
fn parse_backend_output(backend: &str, raw: &str) -> BackendReview {
    if let Some(json) = extract_json(raw) {
        match serde_json::from_str::<BackendReview>(&json) {
            Ok(mut review) => {
                review.confidence = review.confidence.clamp(0.0, 1.0);
                return review;
            }
            Err(e) => {
                debug!(backend, error = %e, "Backend JSON did not match review schema");
            }
        }
    }
    warn!(backend, "Backend output not parseable as review JSON, degrading");
    BackendReview::degraded(raw)
}

/// Extract a JSON object from mixed text output.
///
/// Tries, in order: a ```json fenced block, any ``` fenced block, then
/// the first balanced `{...}` object found by brace counting.
pub fn extract_json(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim().to_string());
        }
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        if let Some(end) = after.find("```") {
            let candidate = after[..end].trim();
            if candidate.starts_with('{') {
                return Some(candidate.to_string());
            }
        }
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
