//! Skua kubectl boundary: one-shot queries, the context surface, and watch
//! streams. Everything that forks the cluster query tool lives here.

#![forbid(unsafe_code)]

pub mod watch;

pub use watch::{decode_watch_line, StreamState, WatchStream};

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use skua_core::QueryError;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Ceiling for one-shot invocations.
const ONESHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle on the cluster query tool. Cheap to clone; carries only the
/// program path and the one-shot timeout.
#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
    timeout: Duration,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

impl Kubectl {
    /// Uses `SKUA_KUBECTL` when set, plain `kubectl` otherwise.
    pub fn new() -> Self {
        let program =
            std::env::var("SKUA_KUBECTL").unwrap_or_else(|_| "kubectl".to_string());
        Self::with_program(program)
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: ONESHOT_TIMEOUT,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Runs the tool once and returns trimmed stdout. Non-zero exit,
    /// spawn failure, and timeout all surface as `QueryError`.
    pub async fn run(&self, args: &[&str], namespace: Option<&str>) -> Result<String, QueryError> {
        self.run_argv(plain_args(args, namespace)).await
    }

    /// Like `run`, with `-o json` appended and the output parsed.
    pub async fn run_json(
        &self,
        args: &[&str],
        namespace: Option<&str>,
    ) -> Result<Value, QueryError> {
        let argv = json_args(args, namespace);
        let command = render_command(&self.program, &argv);
        let stdout = self.run_argv(argv).await?;
        serde_json::from_str(&stdout).map_err(|source| QueryError::Decode { command, source })
    }

    /// Lists one collection and returns its `items`, bypassing any cache.
    pub async fn list(
        &self,
        collection: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<Value>, QueryError> {
        let envelope = self.run_json(&["get", collection], namespace).await?;
        Ok(envelope
            .get("items")
            .and_then(|items| items.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Current context name, or `"none"` when it cannot be determined.
    pub async fn current_context(&self) -> String {
        match self.run(&["config", "current-context"], None).await {
            Ok(name) if !name.is_empty() => name,
            Ok(_) => "none".to_string(),
            Err(err) => {
                debug!(error = %err, "current-context probe failed");
                "none".to_string()
            }
        }
    }

    pub async fn available_contexts(&self) -> Result<Vec<String>, QueryError> {
        let out = self.run(&["config", "get-contexts", "-o", "name"], None).await?;
        Ok(out
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    pub async fn use_context(&self, name: &str) -> Result<(), QueryError> {
        self.run(&["config", "use-context", name], None).await?;
        Ok(())
    }

    async fn run_argv(&self, argv: Vec<String>) -> Result<String, QueryError> {
        let command = render_command(&self.program, &argv);
        debug!(command = %command, "one-shot query");
        let mut cmd = Command::new(&self.program);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| QueryError::TimedOut {
                command: command.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| QueryError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(QueryError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `[--namespace <ns>] <args...>`: namespace flags lead, matching the
/// watch form.
pub fn plain_args(args: &[&str], namespace: Option<&str>) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() + 2);
    if let Some(ns) = namespace {
        argv.push("--namespace".to_string());
        argv.push(ns.to_string());
    }
    argv.extend(args.iter().map(|s| s.to_string()));
    argv
}

/// `plain_args` plus `-o json`.
pub fn json_args(args: &[&str], namespace: Option<&str>) -> Vec<String> {
    let mut argv = plain_args(args, namespace);
    argv.push("-o".to_string());
    argv.push("json".to_string());
    argv
}

/// One collection watch: `[--namespace <ns>] get <collection> --watch -o json`.
pub fn watch_args(collection: &str, namespace: Option<&str>) -> Vec<String> {
    let mut argv = plain_args(&["get", collection], namespace);
    argv.push("--watch".to_string());
    argv.push("-o".to_string());
    argv.push("json".to_string());
    argv
}

fn render_command(program: &str, argv: &[String]) -> String {
    let mut out = String::from(program);
    for arg in argv {
        out.push(' ');
        out.push_str(arg);
    }
    out
}
