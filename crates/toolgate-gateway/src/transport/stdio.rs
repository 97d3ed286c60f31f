//! Local-process transport.
//!
//! Spawns the backend as a child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout. Stderr is captured into the attempt's
//! diagnostic buffer.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use toolgate_core::{ConnectError, TransportKind};

use super::{Established, Transport, TransportOptions};
use crate::protocol::{ProtocolClient, RpcRequest, RpcResponse, TransportEvent};

type ResponseSender = oneshot::Sender<Result<Value, ConnectError>>;

/// Messages from the client half to the writer/router task.
enum Outbound {
    Send(RpcRequest, Option<(u64, ResponseSender)>),
    /// Drop the pending waiter for an abandoned request (e.g. a timeout),
    /// so the pending map cannot grow across repeated timeouts.
    Cancel(u64),
}

/// Local-process transport for child-process backends
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    options: TransportOptions,
}

impl StdioTransport {
    pub fn new(
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        options: TransportOptions,
    ) -> Self {
        Self {
            command,
            args,
            env,
            options,
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<Established, ConnectError> {
        info!(command = %self.command, "Connecting to local-process backend");

        // Validate command exists before spawning
        let command_path = which::which(&self.command)
            .or_else(|_| which::which(format!("{}.exe", &self.command)))
            .map_err(|_| {
                let msg = format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    self.command
                );
                self.options.diagnostics.push(&msg);
                ConnectError::Io(msg)
            })?;

        debug!(path = ?command_path, "Found command");

        let mut child = Command::new(&command_path)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let msg = format!("Failed to spawn process: {e}");
                self.options.diagnostics.push(&msg);
                ConnectError::Io(msg)
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ConnectError::Io("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConnectError::Io("child stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConnectError::Io("child stderr unavailable".into()))?;

        let (event_tx, events) = mpsc::unbounded_channel();

        // Stderr capture task
        let diagnostics = Arc::clone(&self.options.diagnostics);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                diagnostics.push(line);
            }
        });

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        spawn_io_tasks(stdin, stdout, request_rx, event_tx);

        let client = Arc::new(StdioClient {
            request_tx,
            next_id: AtomicU64::new(1),
            child: Mutex::new(Some(child)),
        });

        // Handshake with timeout
        let handshake = async {
            let init_id = client.next_id.fetch_add(1, Ordering::Relaxed);
            client.dispatch(RpcRequest::initialize(init_id), Some(init_id)).await?;
            client.notify(RpcRequest::initialized())?;
            Ok::<_, ConnectError>(())
        };
        match tokio::time::timeout(self.options.connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.options.diagnostics.push(format!("handshake failed: {e}"));
                client.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                self.options
                    .diagnostics
                    .push(format!("handshake timed out ({:?})", self.options.connect_timeout));
                client.shutdown().await;
                return Err(ConnectError::Timeout(self.options.connect_timeout));
            }
        }

        info!(command = %self.command, "Local-process backend connected");

        Ok(Established {
            client,
            kind: TransportKind::Stdio,
            session_token: None,
            events,
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }
}

/// Spawns the stdout reader and the writer/router tasks.
///
/// The reader parses newline-delimited responses and forwards them to the
/// router; the router writes outgoing requests and matches responses to
/// waiting callers by id. When either side dies, all pending callers get
/// `Closed` and a `Closed` event is emitted.
fn spawn_io_tasks(
    stdin: tokio::process::ChildStdin,
    stdout: tokio::process::ChildStdout,
    mut request_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<RpcResponse>();

    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RpcResponse>(&line) {
                Ok(response) => {
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
                // Server-initiated requests and notifications land here too;
                // the gateway ignores them.
                Err(e) => {
                    debug!("Ignoring unparseable line from backend: {e}");
                }
            }
        }
        debug!("Backend stdout reader finished");
    });

    tokio::spawn(async move {
        let mut stdin = stdin;
        let mut pending: HashMap<u64, ResponseSender> = HashMap::new();
        loop {
            tokio::select! {
                req = request_rx.recv() => {
                    let (request, waiter) = match req {
                        Some(Outbound::Send(request, waiter)) => (request, waiter),
                        Some(Outbound::Cancel(id)) => {
                            pending.remove(&id);
                            continue;
                        }
                        None => break,
                    };
                    let json = match serde_json::to_string(&request) {
                        Ok(j) => j,
                        Err(e) => {
                            if let Some((_, tx)) = waiter {
                                let _ = tx.send(Err(ConnectError::Protocol(format!(
                                    "failed to serialize request: {e}"
                                ))));
                            }
                            continue;
                        }
                    };
                    let write = async {
                        stdin.write_all(json.as_bytes()).await?;
                        stdin.write_all(b"\n").await?;
                        stdin.flush().await
                    };
                    if let Err(e) = write.await {
                        warn!("Write to backend stdin failed: {e}");
                        let _ = event_tx.send(TransportEvent::Error(format!(
                            "stdin write failed: {e}"
                        )));
                        if let Some((_, tx)) = waiter {
                            let _ = tx.send(Err(ConnectError::Closed));
                        }
                        break;
                    }
                    if let Some((id, tx)) = waiter {
                        pending.insert(id, tx);
                    }
                }
                resp = response_rx.recv() => {
                    let Some(response) = resp else { break };
                    if let Some(id) = response.id {
                        if let Some(tx) = pending.remove(&id) {
                            let _ = tx.send(response.into_result());
                        }
                    }
                }
            }
        }
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(ConnectError::Closed));
        }
        let _ = event_tx.send(TransportEvent::Closed);
        debug!("Backend request router finished");
    });
}

/// Client half of a live local-process connection.
struct StdioClient {
    request_tx: mpsc::UnboundedSender<Outbound>,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
}

impl StdioClient {
    /// Send a request and wait for its routed response.
    async fn dispatch(&self, request: RpcRequest, id: Option<u64>) -> Result<Value, ConnectError> {
        let Some(id) = id else {
            self.notify(request)?;
            return Ok(Value::Null);
        };
        let (tx, rx) = oneshot::channel();
        self.request_tx
            .send(Outbound::Send(request, Some((id, tx))))
            .map_err(|_| ConnectError::Closed)?;
        rx.await.map_err(|_| ConnectError::Closed)?
    }

    fn notify(&self, request: RpcRequest) -> Result<(), ConnectError> {
        self.request_tx
            .send(Outbound::Send(request, None))
            .map_err(|_| ConnectError::Closed)
    }
}

#[async_trait]
impl ProtocolClient for StdioClient {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ConnectError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(id, method, params);
        match tokio::time::timeout(timeout, self.dispatch(request, Some(id))).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.request_tx.send(Outbound::Cancel(id));
                Err(ConnectError::Timeout(timeout))
            }
        }
    }

    async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                error!("Failed to kill backend process: {e}");
            }
        }
    }
}
