//! Sidecar Port Supervisor — newline-delimited JSON-RPC over a child
//! process's stdio, generalizing [`sa_mcp_client::transport::StdioTransport`]
//! from one serialized request at a time to many concurrently in flight,
//! demultiplexed by correlation id via a background reader task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex, RwLock};

use sa_domain::config::SidecarConfig;
use sa_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct SidecarRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct SidecarLine {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<SidecarErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct SidecarErrorPayload {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    Starting,
    Ready,
    Unavailable,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Port
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Pending = oneshot::Sender<std::result::Result<Value, (String, String)>>;

struct Running {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
}

/// A supervised child-process port. One `SidecarPort` owns one binary;
/// writes are serialized onto the port's stdin, responses demultiplexed by
/// id via the reader task spawned at `start`.
pub struct SidecarPort {
    name: String,
    config: SidecarConfig,
    mode: RwLock<PortMode>,
    running: RwLock<Option<Arc<Running>>>,
    pending: SyncMutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
}

impl SidecarPort {
    pub fn new(name: impl Into<String>, config: SidecarConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            mode: RwLock::new(PortMode::Starting),
            running: RwLock::new(None),
            pending: SyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn mode(&self) -> PortMode {
        *self.mode.read().await
    }

    fn locate_binary(&self) -> Option<PathBuf> {
        for dir in &self.config.search_path {
            let candidate = PathBuf::from(dir).join(&self.name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Start the port: locate the binary, spawn it, and begin the reader
    /// loop. If the binary cannot be located, mode becomes `Unavailable`
    /// and every subsequent `call` fails immediately — there is no fallback.
    pub async fn start(self: &Arc<Self>) {
        let Some(path) = self.locate_binary() else {
            *self.mode.write().await = PortMode::Unavailable;
            tracing::warn!(port = %self.name, "sidecar binary not found on search path");
            return;
        };

        let mut cmd = tokio::process::Command::new(&path);
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                *self.mode.write().await = PortMode::Unavailable;
                tracing::warn!(port = %self.name, error = %e, "failed to spawn sidecar");
                return;
            }
        };

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let running = Arc::new(Running {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
        });
        *self.running.write().await = Some(running);
        *self.mode.write().await = PortMode::Ready;

        let this = self.clone();
        tokio::spawn(async move {
            this.reader_loop(stdout).await;
            this.on_crash().await;
        });
    }

    async fn reader_loop(self: &Arc<Self>, stdout: tokio::process::ChildStdout) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            let n = match reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(port = %self.name, error = %e, "sidecar stdout read error");
                    break;
                }
            };
            if n == 0 {
                break; // EOF: process exited.
            }
            if line.len() > self.config.max_line_bytes {
                tracing::warn!(port = %self.name, bytes = line.len(), "sidecar response line too large, dropping");
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: SidecarLine = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let Some(id) = parsed.id else {
                continue; // notification; no correlation id to demux on.
            };
            let pending = self.pending.lock().remove(&id);
            let Some(tx) = pending else {
                tracing::debug!(port = %self.name, id, "dropping response for unknown/late id");
                continue;
            };
            let outcome = if let Some(err) = parsed.error {
                Err((err.code.unwrap_or_else(|| "sidecar_error".into()), err.message))
            } else {
                Ok(parsed.result.unwrap_or(Value::Null))
            };
            let _ = tx.send(outcome);
        }
    }

    async fn on_crash(self: &Arc<Self>) {
        *self.mode.write().await = PortMode::Unavailable;
        *self.running.write().await = None;
        let mut pending = self.pending.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(("port_crashed".into(), "sidecar process exited".into())));
        }
        drop(pending);

        let delay = std::time::Duration::from_millis(self.config.restart_delay_ms);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.start().await;
        });
    }

    /// Invoke a method, waiting up to the per-method (or default) timeout.
    pub async fn call(self: &Arc<Self>, method: &str, params: Value) -> Result<Value> {
        if *self.mode.read().await != PortMode::Ready {
            return Err(Error::SidecarUnavailable(self.name.clone()));
        }
        let running = {
            let guard = self.running.read().await;
            match guard.as_ref() {
                Some(r) => r.clone(),
                None => return Err(Error::SidecarUnavailable(self.name.clone())),
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let req = SidecarRequest { id, method, params };
        let json = match serde_json::to_string(&req) {
            Ok(s) => s,
            Err(e) => {
                self.pending.lock().remove(&id);
                return Err(Error::InvalidArgs(e.to_string()));
            }
        };

        {
            let mut stdin = running.stdin.lock().await;
            let write_ok = stdin.write_all(json.as_bytes()).await.is_ok()
                && stdin.write_all(b"\n").await.is_ok()
                && stdin.flush().await.is_ok();
            if !write_ok {
                self.pending.lock().remove(&id);
                return Err(Error::PortCrashed);
            }
        }

        let timeout_ms = self.config.timeout_ms_for(method);
        let timeout = std::time::Duration::from_millis(timeout_ms);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err((code, message)))) => Err(Error::Other(format!("{code}: {message}"))),
            Ok(Err(_canceled)) => Err(Error::PortCrashed),
            Err(_elapsed) => {
                self.pending.lock().remove(&id);
                Err(Error::Other("timeout".into()))
            }
        }
    }

    pub async fn shutdown(&self) {
        *self.mode.write().await = PortMode::Unavailable;
        if let Some(running) = self.running.write().await.take() {
            let mut child = running.child.lock().await;
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SidecarConfig {
        SidecarConfig {
            search_path: vec!["/definitely/does/not/exist".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_with_missing_binary_becomes_unavailable() {
        let port = SidecarPort::new("ghost-sidecar", cfg());
        port.start().await;
        assert_eq!(port.mode().await, PortMode::Unavailable);
    }

    #[tokio::test]
    async fn call_before_start_is_unavailable() {
        let port = SidecarPort::new("ghost-sidecar", cfg());
        let res = port.call("ping", serde_json::json!({})).await;
        assert!(matches!(res, Err(Error::SidecarUnavailable(_))));
    }
}
