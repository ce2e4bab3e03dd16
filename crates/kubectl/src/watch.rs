//! Watch stream adapter: one supervised subprocess per watcher key.

use std::process::Stdio;

use serde_json::Value;
use skua_core::{WatchError, WatchEvent, WatchKey};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Kubectl;

/// Adapter lifecycle. `Stopped` is terminal: watching the same key again
/// takes a fresh adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Running,
    Stopped,
}

/// Owns one `get <collection> --watch -o json` subprocess and decodes its
/// NDJSON output into events tagged with the watcher key. The adapter
/// knows nothing about caches or namespaces beyond its construction
/// arguments, and it never restarts itself.
#[derive(Debug)]
pub struct WatchStream {
    kubectl: Kubectl,
    key: WatchKey,
    events: mpsc::Sender<(WatchKey, WatchEvent)>,
    state: StreamState,
    pump: Option<JoinHandle<()>>,
}

impl WatchStream {
    pub fn new(
        kubectl: Kubectl,
        key: WatchKey,
        events: mpsc::Sender<(WatchKey, WatchEvent)>,
    ) -> Self {
        Self {
            kubectl,
            key,
            events,
            state: StreamState::Idle,
            pump: None,
        }
    }

    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Spawns the subprocess and its pump task. No-op when already
    /// running or stopped. On spawn failure the adapter stays Idle and
    /// the error goes to the owner.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.state != StreamState::Idle {
            return Ok(());
        }
        let collection = self.key.resource.collection();
        let argv = crate::watch_args(&collection, self.key.namespace.as_deref());
        let command = crate::render_command(self.kubectl.program(), &argv);
        let child = Command::new(self.kubectl.program())
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WatchError::Spawn { command, source })?;
        self.state = StreamState::Running;
        metrics::counter!("skua_watch_streams_started_total", 1);
        info!(key = %self.key, "watch stream started");
        self.pump = Some(tokio::spawn(pump(
            child,
            self.key.clone(),
            self.events.clone(),
        )));
        Ok(())
    }

    /// Kills the subprocess. Idempotent; Stopped is terminal.
    pub fn stop(&mut self) {
        if self.state != StreamState::Stopped {
            debug!(key = %self.key, "watch stream stopped");
        }
        self.state = StreamState::Stopped;
        if let Some(pump) = self.pump.take() {
            // kill_on_drop reaps the child when the pump dies.
            pump.abort();
        }
    }
}

impl Drop for WatchStream {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Decodes one NDJSON watch record. `Ok(None)` for records carrying an
/// unrecognized type or no object; those are skipped, not fatal.
pub fn decode_watch_line(line: &str) -> Result<Option<WatchEvent>, WatchError> {
    let mut record: Value = serde_json::from_str(line).map_err(|source| WatchError::Decode {
        line: snippet(line),
        source,
    })?;
    let object = match record.get_mut("object").map(Value::take) {
        Some(object) if !object.is_null() => object,
        _ => return Ok(None),
    };
    let event = match record.get("type").and_then(|t| t.as_str()) {
        Some("ADDED") => WatchEvent::Added(object),
        Some("MODIFIED") => WatchEvent::Updated(object),
        Some("DELETED") => WatchEvent::Deleted(object),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn snippet(line: &str) -> String {
    const MAX_CHARS: usize = 160;
    if line.chars().count() <= MAX_CHARS {
        line.to_string()
    } else {
        let mut out: String = line.chars().take(MAX_CHARS).collect();
        out.push_str("...");
        out
    }
}

async fn pump(mut child: Child, key: WatchKey, events: mpsc::Sender<(WatchKey, WatchEvent)>) {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = events.send((key, WatchEvent::Ended)).await;
        return;
    };
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;

    loop {
        tokio::select! {
            line = out_lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match decode_watch_line(line) {
                        Ok(Some(event)) => {
                            metrics::counter!("skua_watch_events_total", 1, "event" => event.label());
                            if events.send((key.clone(), event)).await.is_err() {
                                // Receiver went away (context switch); die quietly.
                                return;
                            }
                        }
                        Ok(None) => debug!(key = %key, "skipping unrecognized watch record"),
                        Err(err) => {
                            metrics::counter!("skua_watch_decode_failures_total", 1);
                            if events.send((key.clone(), WatchEvent::Error(err))).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(key = %key, error = %err, "watch stdout read failed");
                    break;
                }
            },
            line = err_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        let event = WatchEvent::Error(WatchError::Stream(line.to_string()));
                        if events.send((key.clone(), event)).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    }

    match child.wait().await {
        Ok(status) => info!(key = %key, %status, "watch stream ended"),
        Err(err) => warn!(key = %key, error = %err, "watch stream ended; wait failed"),
    }
    let _ = events.send((key, WatchEvent::Ended)).await;
}
