//! Client for the external agent runtime (an app-server speaking
//! line-delimited JSON-RPC over stdio).
//!
//! The client is split into two tasks: a writer that serializes outgoing
//! requests from a command channel, and a reader that routes responses back
//! to per-request oneshot channels and forwards server requests and
//! notifications to the supervisor as [`RuntimeEvent`]s. The supervisor never
//! touches the wire directly, so tests can drive it with a scripted fake on
//! the same channels.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::approval::ApprovalChoice;
use crate::skills::TurnItem;
use crate::{flog_debug, flog_trace, flog_warn, Error, Result};

pub type ThreadId = String;

/// Result page from a thread listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadList {
    pub ids: Vec<ThreadId>,
    pub next_cursor: Option<String>,
}

/// Commands the supervisor sends to the runtime client task.
#[derive(Debug)]
pub enum RuntimeCommand {
    StartThread {
        cwd: Option<PathBuf>,
        reply: oneshot::Sender<Result<ThreadId>>,
    },
    StartTurn {
        thread: ThreadId,
        input: Vec<TurnItem>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Best-effort interruption of an in-flight turn. The reply is false
    /// when the runtime rejects the cancellation.
    CancelTurn {
        thread: ThreadId,
        reply: oneshot::Sender<bool>,
    },
    StartReview {
        thread: ThreadId,
        target: Value,
        delivery: Option<String>,
        reply: oneshot::Sender<Result<Option<ThreadId>>>,
    },
    ListThreads {
        loaded: bool,
        cursor: Option<String>,
        limit: Option<u64>,
        reply: oneshot::Sender<Result<ThreadList>>,
    },
    /// Answer a pending approval request raised by the runtime.
    RespondApproval {
        req_id: Value,
        kind: String,
        choice: ApprovalChoice,
        amendment: Option<Value>,
    },
}

/// Events flowing from the runtime into the supervisor loop.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    TurnStarted {
        thread: ThreadId,
    },
    TurnCompleted {
        thread: ThreadId,
        status: String,
    },
    AgentMessage {
        thread: ThreadId,
        text: String,
    },
    CommandStarted {
        thread: ThreadId,
        command: String,
    },
    FileChanged {
        thread: ThreadId,
        summary: String,
    },
    ReviewStarted {
        thread: ThreadId,
        review_id: String,
        label: Option<String>,
    },
    ReviewCompleted {
        thread: ThreadId,
        review_id: String,
        output: String,
    },
    ApprovalRequested {
        thread: ThreadId,
        req_id: Value,
        kind: String,
        summary: String,
        amendment: Option<Value>,
    },
    /// The runtime's stdout reached EOF.
    Closed,
}

/// Cloneable async facade over the runtime command channel.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    tx: mpsc::UnboundedSender<RuntimeCommand>,
}

impl RuntimeHandle {
    pub fn new(tx: mpsc::UnboundedSender<RuntimeCommand>) -> Self {
        Self { tx }
    }

    async fn roundtrip<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| Error::RuntimeClosed)?;
        reply_rx.await.map_err(|_| Error::RuntimeClosed)
    }

    pub async fn start_thread(&self, cwd: Option<PathBuf>) -> Result<ThreadId> {
        self.roundtrip(|reply| RuntimeCommand::StartThread { cwd, reply })
            .await?
    }

    pub async fn start_turn(&self, thread: ThreadId, input: Vec<TurnItem>) -> Result<()> {
        self.roundtrip(|reply| RuntimeCommand::StartTurn {
            thread,
            input,
            reply,
        })
        .await?
    }

    pub async fn cancel_turn(&self, thread: ThreadId) -> Result<bool> {
        self.roundtrip(|reply| RuntimeCommand::CancelTurn { thread, reply })
            .await
    }

    pub async fn start_review(
        &self,
        thread: ThreadId,
        target: Value,
        delivery: Option<String>,
    ) -> Result<Option<ThreadId>> {
        self.roundtrip(|reply| RuntimeCommand::StartReview {
            thread,
            target,
            delivery,
            reply,
        })
        .await?
    }

    pub async fn list_threads(
        &self,
        loaded: bool,
        cursor: Option<String>,
        limit: Option<u64>,
    ) -> Result<ThreadList> {
        self.roundtrip(|reply| RuntimeCommand::ListThreads {
            loaded,
            cursor,
            limit,
            reply,
        })
        .await?
    }

    pub fn respond_approval(
        &self,
        req_id: Value,
        kind: String,
        choice: ApprovalChoice,
        amendment: Option<Value>,
    ) {
        let _ = self.tx.send(RuntimeCommand::RespondApproval {
            req_id,
            kind,
            choice,
            amendment,
        });
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Spawns and owns the runtime server process.
pub struct RuntimeClient;

impl RuntimeClient {
    /// Launch the server process and perform the initialize handshake.
    /// Returns the command handle and the event stream.
    pub async fn spawn(
        command_line: &str,
    ) -> Result<(RuntimeHandle, mpsc::UnboundedReceiver<RuntimeEvent>)> {
        let mut parts = command_line.split_whitespace();
        let binary = parts
            .next()
            .ok_or_else(|| Error::RuntimeUnavailable("empty server command".to_string()))?;
        which::which(binary)
            .map_err(|_| Error::RuntimeUnavailable(format!("binary '{}' not found", binary)))?;

        let mut child = Command::new(binary)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::RuntimeUnavailable("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::RuntimeUnavailable("no stdout pipe".to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(read_loop(stdout, pending.clone(), event_tx));
        tokio::spawn(write_loop(stdin, child, cmd_rx, pending));

        Ok((RuntimeHandle::new(cmd_tx), event_rx))
    }
}

struct Writer {
    stdin: tokio::process::ChildStdin,
    pending: PendingMap,
    next_id: u64,
}

impl Writer {
    async fn send_line(&mut self, payload: &Value) -> Result<()> {
        let mut line = serde_json::to_string(payload)?;
        flog_trace!("runtime <- {}", line);
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Write a request and register a oneshot for its response.
    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let id = self.next_id;
        self.next_id += 1;
        let mut payload = json!({ "id": id, "method": method });
        if let Some(params) = params {
            payload["params"] = params;
        }
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);
        self.send_line(&payload).await?;
        Ok(rx)
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let mut payload = json!({ "method": method });
        if let Some(params) = params {
            payload["params"] = params;
        }
        self.send_line(&payload).await
    }

    async fn respond(&mut self, req_id: Value, result: Value) -> Result<()> {
        self.send_line(&json!({ "id": req_id, "result": result }))
            .await
    }
}

async fn write_loop(
    stdin: tokio::process::ChildStdin,
    mut child: tokio::process::Child,
    mut cmd_rx: mpsc::UnboundedReceiver<RuntimeCommand>,
    pending: PendingMap,
) {
    let mut writer = Writer {
        stdin,
        pending,
        next_id: 1,
    };

    // Handshake before serving commands. Commands queued meanwhile wait in
    // the channel.
    let handshake = async {
        let rx = writer
            .request(
                "initialize",
                Some(json!({ "clientInfo": { "name": "foreman", "version": "0.1.0" } })),
            )
            .await?;
        let _ = rx.await;
        writer.notify("initialized", Some(json!({}))).await
    };
    if let Err(e) = handshake.await {
        flog_warn!("Runtime handshake failed: {}", e);
    }

    while let Some(cmd) = cmd_rx.recv().await {
        if let Err(e) = handle_command(&mut writer, cmd).await {
            flog_warn!("Runtime write failed: {}", e);
            break;
        }
    }

    flog_debug!("Runtime command channel closed, terminating server");
    let _ = child.kill().await;
}

async fn handle_command(writer: &mut Writer, cmd: RuntimeCommand) -> Result<()> {
    match cmd {
        RuntimeCommand::StartThread { cwd, reply } => {
            let params = cwd.map(|c| json!({ "cwd": c }));
            let rx = writer.request("thread/start", params).await?;
            tokio::spawn(async move {
                let result = await_response(rx).await.and_then(|result| {
                    result
                        .pointer("/thread/id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| Error::Runtime("thread/start returned no id".to_string()))
                });
                let _ = reply.send(result);
            });
        }
        RuntimeCommand::StartTurn {
            thread,
            input,
            reply,
        } => {
            let params = json!({ "threadId": thread, "input": input });
            let rx = writer.request("turn/start", Some(params)).await?;
            tokio::spawn(async move {
                let _ = reply.send(await_response(rx).await.map(|_| ()));
            });
        }
        RuntimeCommand::CancelTurn { thread, reply } => {
            let params = json!({ "threadId": thread });
            let rx = writer.request("turn/cancel", Some(params)).await?;
            tokio::spawn(async move {
                let _ = reply.send(await_response(rx).await.is_ok());
            });
        }
        RuntimeCommand::StartReview {
            thread,
            target,
            delivery,
            reply,
        } => {
            let mut params = json!({ "threadId": thread, "target": target });
            if let Some(delivery) = delivery {
                params["delivery"] = json!(delivery);
            }
            let rx = writer.request("review/start", Some(params)).await?;
            tokio::spawn(async move {
                let result = await_response(rx).await.map(|result| {
                    result
                        .get("reviewThreadId")
                        .or_else(|| result.get("review_thread_id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
                let _ = reply.send(result);
            });
        }
        RuntimeCommand::ListThreads {
            loaded,
            cursor,
            limit,
            reply,
        } => {
            let mut params = json!({});
            if let Some(cursor) = cursor {
                params["cursor"] = json!(cursor);
            }
            if let Some(limit) = limit {
                params["limit"] = json!(limit);
            }
            let method = if loaded { "thread/loaded/list" } else { "thread/list" };
            let rx = writer.request(method, Some(params)).await?;
            tokio::spawn(async move {
                let _ = reply.send(await_response(rx).await.map(|v| parse_thread_list(&v)));
            });
        }
        RuntimeCommand::RespondApproval {
            req_id,
            kind,
            choice,
            amendment,
        } => {
            let decision = decision_payload(&kind, choice, amendment.as_ref());
            writer.respond(req_id, decision).await?;
        }
    }
    Ok(())
}

async fn await_response(rx: oneshot::Receiver<Result<Value>>) -> Result<Value> {
    rx.await.map_err(|_| Error::RuntimeClosed)?
}

async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<Value>(line) else {
            flog_trace!("runtime -> unparseable line");
            continue;
        };
        flog_trace!("runtime -> {}", line);

        let has_method = msg.get("method").is_some();
        let has_id = msg.get("id").is_some();
        let has_outcome = msg.get("result").is_some() || msg.get("error").is_some();

        if has_method && has_id && !has_outcome {
            // Server request: an approval raised by an in-flight turn.
            if let Some(event) = parse_server_request(&msg) {
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        } else if has_id {
            let id = msg.get("id").and_then(Value::as_u64);
            let sender = id.and_then(|id| {
                pending.lock().expect("pending map poisoned").remove(&id)
            });
            if let Some(sender) = sender {
                let outcome = match msg.get("error") {
                    Some(err) => Err(Error::Runtime(err.to_string())),
                    None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = sender.send(outcome);
            }
        } else if has_method {
            if let Some(event) = parse_notification(&msg) {
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        }
    }
    let _ = event_tx.send(RuntimeEvent::Closed);
}

fn thread_id_of(params: &Value) -> Option<ThreadId> {
    params
        .get("threadId")
        .or_else(|| params.get("thread_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Map a server request (approval) to an event for the supervisor.
pub fn parse_server_request(msg: &Value) -> Option<RuntimeEvent> {
    let method = msg.get("method")?.as_str()?.to_string();
    let req_id = msg.get("id")?.clone();
    let params = msg.get("params").cloned().unwrap_or(Value::Null);
    let thread = thread_id_of(&params).unwrap_or_else(|| "unknown".to_string());
    let summary = params
        .get("reason")
        .or_else(|| params.get("command"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| method.clone());
    let amendment = params
        .get("proposedExecpolicyAmendment")
        .or_else(|| params.get("proposed_execpolicy_amendment"))
        .cloned();
    Some(RuntimeEvent::ApprovalRequested {
        thread,
        req_id,
        kind: method,
        summary,
        amendment,
    })
}

/// Map a notification to an event. Delta notifications and unknown methods
/// are dropped here; the supervisor only needs item boundaries.
pub fn parse_notification(msg: &Value) -> Option<RuntimeEvent> {
    let method = msg.get("method")?.as_str()?;
    let params = msg.get("params").cloned().unwrap_or(Value::Null);
    let thread = thread_id_of(&params)?;

    match method {
        "turn/started" => Some(RuntimeEvent::TurnStarted { thread }),
        "turn/completed" => {
            let status = params
                .pointer("/turn/status")
                .and_then(Value::as_str)
                .unwrap_or("completed")
                .to_string();
            Some(RuntimeEvent::TurnCompleted { thread, status })
        }
        "item/started" | "item/completed" => {
            let item = params.get("item")?;
            let item_type = item.get("type").and_then(Value::as_str)?;
            match (method, item_type) {
                ("item/started", "commandExecution") => {
                    let command = item.get("command").and_then(Value::as_str)?.to_string();
                    Some(RuntimeEvent::CommandStarted { thread, command })
                }
                (_, "fileChange") => Some(RuntimeEvent::FileChanged {
                    thread,
                    summary: summarize_file_change(item),
                }),
                ("item/completed", "agentMessage") => {
                    let text = item.get("text").and_then(Value::as_str)?.to_string();
                    Some(RuntimeEvent::AgentMessage { thread, text })
                }
                ("item/completed", "enteredReviewMode") => {
                    let review_id = item.get("id").and_then(Value::as_str)?.to_string();
                    Some(RuntimeEvent::ReviewStarted {
                        thread,
                        review_id,
                        label: review_label(item),
                    })
                }
                ("item/completed", "exitedReviewMode") => {
                    let review_id = item.get("id").and_then(Value::as_str)?.to_string();
                    let output = item.get("review").and_then(Value::as_str)?.to_string();
                    Some(RuntimeEvent::ReviewCompleted {
                        thread,
                        review_id,
                        output,
                    })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn review_label(item: &Value) -> Option<String> {
    match item.get("review") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn summarize_file_change(item: &Value) -> String {
    let paths: Vec<&str> = item
        .get("changes")
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter_map(|c| c.get("path").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if paths.is_empty() {
        return "file change".to_string();
    }
    let sample = paths.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    let suffix = if paths.len() > 3 { "..." } else { "" };
    format!("file change: {}{}", sample, suffix)
}

const LEGACY_APPROVAL_METHODS: [&str; 2] = ["applyPatchApproval", "execCommandApproval"];

/// Build the wire decision payload for an approval response. Legacy methods
/// use the snake_case decision spellings.
pub fn decision_payload(kind: &str, choice: ApprovalChoice, amendment: Option<&Value>) -> Value {
    let legacy = LEGACY_APPROVAL_METHODS.contains(&kind);
    match choice {
        ApprovalChoice::Accept => {
            json!({ "decision": if legacy { "approved" } else { "accept" } })
        }
        ApprovalChoice::AcceptForSession => {
            json!({ "decision": if legacy { "approved_for_session" } else { "acceptForSession" } })
        }
        ApprovalChoice::PolicyAmendment => match amendment {
            Some(amendment) if legacy => json!({
                "decision": {
                    "approved_execpolicy_amendment": {
                        "proposed_execpolicy_amendment": amendment
                    }
                }
            }),
            Some(amendment) => json!({
                "decision": {
                    "acceptWithExecpolicyAmendment": { "execpolicyAmendment": amendment }
                }
            }),
            // No amendment attached to the request: degrade to a plain accept.
            None => json!({ "decision": if legacy { "approved" } else { "accept" } }),
        },
        ApprovalChoice::Decline => {
            json!({ "decision": if legacy { "denied" } else { "decline" } })
        }
        ApprovalChoice::Cancel => {
            json!({ "decision": if legacy { "abort" } else { "cancel" } })
        }
    }
}

fn parse_thread_list(result: &Value) -> ThreadList {
    let ids = result
        .get("data")
        .and_then(Value::as_array)
        .map(|data| {
            data.iter()
                .filter_map(|entry| match entry {
                    Value::String(id) => Some(id.clone()),
                    Value::Object(obj) => obj
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let next_cursor = result
        .get("nextCursor")
        .or_else(|| result.get("next_cursor"))
        .and_then(Value::as_str)
        .map(str::to_string);
    ThreadList { ids, next_cursor }
}
