//! Test fixtures: a supervisor harness wired to a scripted fake runtime.
//!
//! The fake runtime answers every [`RuntimeCommand`] the supervisor sends and
//! records what it saw, so tests can assert on the exact turns, approvals,
//! and reviews that reached the wire. Events are injected straight into the
//! supervisor's handler, keeping scenarios deterministic.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use foreman::approval::ApprovalChoice;
use foreman::config::Config;
use foreman::runtime::{RuntimeCommand, RuntimeEvent, RuntimeHandle, ThreadList};
use foreman::skills::TurnItem;
use foreman::{AgentId, AgentSpec, Result, Supervisor, SupervisorOptions};

/// Everything the fake runtime has been asked to do.
#[derive(Debug, Default)]
pub struct FakeState {
    pub threads_started: usize,
    /// Started turns as (thread, prompt text).
    pub turns: Vec<(String, String)>,
    pub approvals: Vec<(Value, ApprovalChoice)>,
    /// Dispatched reviews as (thread, target, delivery).
    pub reviews: Vec<(String, Value, Option<String>)>,
}

/// Scripted answers for commands that can go either way.
#[derive(Debug, Clone)]
pub struct Script {
    pub cancel_accepted: bool,
    /// Ok carries the detached review thread id; Err becomes a runtime error.
    pub review_result: std::result::Result<Option<String>, String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            cancel_accepted: true,
            review_result: Ok(Some("rt1".to_string())),
        }
    }
}

async fn fake_runtime(
    mut cmd_rx: mpsc::UnboundedReceiver<RuntimeCommand>,
    script: Script,
    state: Arc<Mutex<FakeState>>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RuntimeCommand::StartThread { reply, .. } => {
                let id = {
                    let mut state = state.lock().unwrap();
                    state.threads_started += 1;
                    format!("t{}", state.threads_started)
                };
                let _ = reply.send(Ok(id));
            }
            RuntimeCommand::StartTurn {
                thread,
                input,
                reply,
            } => {
                let text = input
                    .iter()
                    .find_map(|item| match item {
                        TurnItem::Text { text } => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                state.lock().unwrap().turns.push((thread, text));
                let _ = reply.send(Ok(()));
            }
            RuntimeCommand::CancelTurn { reply, .. } => {
                let _ = reply.send(script.cancel_accepted);
            }
            RuntimeCommand::StartReview {
                thread,
                target,
                delivery,
                reply,
            } => {
                state
                    .lock()
                    .unwrap()
                    .reviews
                    .push((thread, target, delivery));
                let result = script
                    .review_result
                    .clone()
                    .map_err(foreman::Error::Runtime);
                let _ = reply.send(result);
            }
            RuntimeCommand::ListThreads { reply, .. } => {
                let _ = reply.send(Ok(ThreadList::default()));
            }
            RuntimeCommand::RespondApproval { req_id, choice, .. } => {
                state.lock().unwrap().approvals.push((req_id, choice));
            }
        }
    }
}

/// A supervisor under test plus the fake runtime's recorded state.
pub struct Harness {
    pub supervisor: Supervisor,
    pub handle: RuntimeHandle,
    pub state: Arc<Mutex<FakeState>>,
    pub logs_dir: TempDir,
    _event_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

impl Harness {
    pub fn new(specs: &[&str]) -> Result<Self> {
        Self::with(specs, SupervisorOptions::default(), Script::default())
    }

    pub fn with(specs: &[&str], options: SupervisorOptions, script: Script) -> Result<Self> {
        let specs = specs
            .iter()
            .enumerate()
            .map(|(i, raw)| AgentSpec::parse(i + 1, raw))
            .collect::<Result<Vec<_>>>()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(FakeState::default()));
        tokio::spawn(fake_runtime(cmd_rx, script, state.clone()));

        let handle = RuntimeHandle::new(cmd_tx);
        let mut supervisor = Supervisor::new(
            specs,
            Config::default(),
            options,
            handle.clone(),
            event_rx,
        )?;
        let logs_dir = TempDir::new().expect("failed to create temp dir");
        supervisor.set_logs_dir(logs_dir.path());

        Ok(Self {
            supervisor,
            handle,
            state,
            logs_dir,
            _event_tx: event_tx,
        })
    }

    /// Dispatch every ungated initial prompt, as the run loop does on entry.
    pub async fn start(&mut self) {
        self.supervisor.start_ready().await;
    }

    pub fn thread(&self, agent: usize) -> String {
        self.supervisor
            .thread_of(AgentId(agent))
            .expect("agent should have a session")
            .to_string()
    }

    pub async fn complete_turn(&mut self, agent: usize, status: &str) {
        let thread = self.thread(agent);
        self.supervisor
            .handle_event(RuntimeEvent::TurnCompleted {
                thread,
                status: status.to_string(),
            })
            .await;
    }

    pub async fn agent_message(&mut self, agent: usize, text: &str) {
        let thread = self.thread(agent);
        self.supervisor
            .handle_event(RuntimeEvent::AgentMessage {
                thread,
                text: text.to_string(),
            })
            .await;
    }

    pub async fn raise_approval(&mut self, agent: usize, req_id: u64, summary: &str) {
        let thread = self.thread(agent);
        self.supervisor
            .handle_event(RuntimeEvent::ApprovalRequested {
                thread,
                req_id: json!(req_id),
                kind: "item/commandExecution/requestApproval".to_string(),
                summary: summary.to_string(),
                amendment: None,
            })
            .await;
    }

    /// Wait until the fake runtime has processed everything sent so far.
    /// Commands are served in order, so one extra roundtrip is enough.
    pub async fn sync(&self) {
        let _ = self.handle.list_threads(true, None, None).await;
    }

    pub fn turns(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().turns.clone()
    }

    pub fn recorded_approvals(&self) -> Vec<(Value, ApprovalChoice)> {
        self.state.lock().unwrap().approvals.clone()
    }

    pub fn recorded_reviews(&self) -> Vec<(String, Value, Option<String>)> {
        self.state.lock().unwrap().reviews.clone()
    }
}
