//! Hook execution.
//!
//! A hook is a shell command. It receives the event context as JSON on
//! stdin and may print `{"decision": "allow" | "block", "reason": "..."}`
//! on stdout. A hook that fails, times out or prints nothing allows.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use exthost_config::HooksConfig;

use super::{HookBinding, HookBindingTable};

/// Verdict returned by a hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    #[default]
    Allow,
    Block,
}

#[derive(Debug, Default, Deserialize)]
struct HookReply {
    #[serde(default)]
    decision: HookDecision,
    #[serde(default)]
    reason: Option<String>,
}

/// Result of running one hook.
#[derive(Debug, Clone, Serialize)]
pub struct HookOutcome {
    pub extension: String,
    pub generation: u64,
    pub command: String,
    pub decision: HookDecision,
    pub reason: Option<String>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Spawn or wait failure.
    pub error: Option<String>,
}

impl HookOutcome {
    fn new(binding: &HookBinding) -> Self {
        Self {
            extension: binding.extension.clone(),
            generation: binding.generation,
            command: binding.spec.command.clone(),
            decision: HookDecision::Allow,
            reason: None,
            exit_code: None,
            timed_out: false,
            error: None,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.decision == HookDecision::Block
    }
}

/// Runs the active hooks of an event.
pub struct HookRunner {
    table: Arc<HookBindingTable>,
    enabled: bool,
    default_timeout: Duration,
}

impl HookRunner {
    pub fn new(table: Arc<HookBindingTable>, config: &HooksConfig) -> Self {
        Self {
            table,
            enabled: config.enabled,
            default_timeout: config.timeout(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run every matching hook for `event`, in binding order.
    ///
    /// The bindings are resolved once up front, so a reload committing while
    /// the hooks run does not change which generation executes.
    pub async fn run(&self, event: &str, context: &serde_json::Value) -> Vec<HookOutcome> {
        if !self.enabled {
            return Vec::new();
        }

        let bindings: Vec<_> = self
            .table
            .lookup(event)
            .into_iter()
            .filter(|b| b.matches(context))
            .collect();

        let mut outcomes = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            outcomes.push(self.run_binding(event, binding, context).await);
        }
        outcomes
    }

    /// First blocking outcome, if any.
    pub fn first_block(outcomes: &[HookOutcome]) -> Option<&HookOutcome> {
        outcomes.iter().find(|o| o.is_blocking())
    }

    async fn run_binding(
        &self,
        event: &str,
        binding: &HookBinding,
        context: &serde_json::Value,
    ) -> HookOutcome {
        let mut outcome = HookOutcome::new(binding);
        let limit = binding
            .spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&binding.spec.command)
            .env("EXTHOST_EVENT", event)
            .env("EXTHOST_EXTENSION", &binding.extension)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn hook {:?}: {}", binding.spec.command, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        // The input write shares the deadline: a hook that never reads a
        // large context would otherwise stall the writer.
        let payload = context.to_string();
        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                // Hooks are free to ignore their input.
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!("Hook {:?} did not read its input: {}", binding.spec.command, e);
                }
            }
            child.wait_with_output().await
        };

        let output = match timeout(limit, exchange).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Hook {:?} failed: {}", binding.spec.command, e);
                outcome.error = Some(e.to_string());
                return outcome;
            }
            Err(_) => {
                warn!(
                    "Hook {:?} of {} timed out after {:?}",
                    binding.spec.command, binding.extension, limit
                );
                outcome.timed_out = true;
                return outcome;
            }
        };

        outcome.exit_code = output.status.code();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "Hook {:?} exited with {:?}: {}",
                binding.spec.command,
                outcome.exit_code,
                stderr.trim()
            );
            return outcome;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(reply) = parse_reply(&stdout) {
            outcome.decision = reply.decision;
            outcome.reason = reply.reason;
        }

        if outcome.is_blocking() {
            info!(
                "Hook {:?} of {} blocked {}: {}",
                binding.spec.command,
                binding.extension,
                event,
                outcome.reason.as_deref().unwrap_or("")
            );
        }

        outcome
    }
}

/// Parse the whole output, or failing that its last JSON line.
fn parse_reply(stdout: &str) -> Option<HookReply> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(reply) = serde_json::from_str(trimmed) {
        return Some(reply);
    }
    trimmed
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .and_then(|line| serde_json::from_str(line).ok())
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
