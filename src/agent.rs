//! Per-agent bookkeeping: identity, lifecycle state, and bounded history.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::flog_warn;

/// History entries kept per agent before the oldest are dropped.
const MAX_HISTORY: usize = 500;
/// Recent commands shown in status output.
const MAX_RECENT_COMMANDS: usize = 3;

/// Run-local agent identity: the 1-based position of its `--agent` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub usize);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an agent session.
///
/// Transitions are driven only by the supervisor loop: `Idle -> Running ->
/// Idle` for a normal turn, `Running -> ApprovalPending -> Running` when an
/// approval is raised mid-turn, `Done` after a final turn with an empty
/// queue, and `Stopped` on operator stop or fatal turn failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    ApprovalPending,
    Done,
    Stopped,
}

impl AgentState {
    /// True while a turn is in flight (including waiting on an approval).
    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Running | AgentState::ApprovalPending)
    }

    /// True when a new prompt may be dispatched immediately.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, AgentState::Idle | AgentState::Done | AgentState::Stopped)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Running => write!(f, "running"),
            AgentState::ApprovalPending => write!(f, "approval"),
            AgentState::Done => write!(f, "done"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// One timestamped history line.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub at: DateTime<Local>,
    pub text: String,
}

/// The supervisor's record of one agent session.
#[derive(Debug)]
pub struct AgentRecord {
    pub id: AgentId,
    pub name: Option<String>,
    /// The initial prompt from the spec (used for reviewer prompts).
    pub prompt: String,
    /// Runtime thread backing this agent, set once the session starts.
    pub thread_id: Option<String>,
    pub workdir: Option<PathBuf>,
    pub state: AgentState,
    pub last_message: Option<String>,
    pub recent_commands: VecDeque<String>,
    history: VecDeque<HistoryEntry>,
    log_path: Option<PathBuf>,
    /// Set when a cancel was requested so a late completion is treated as
    /// already resolved.
    pub cancel_requested: bool,
}

impl AgentRecord {
    pub fn new(id: AgentId, name: Option<String>, prompt: String) -> Self {
        Self {
            id,
            name,
            prompt,
            thread_id: None,
            workdir: None,
            state: AgentState::Idle,
            last_message: None,
            recent_commands: VecDeque::new(),
            history: VecDeque::new(),
            log_path: None,
            cancel_requested: false,
        }
    }

    /// Display label: `3 (tester)` for named agents, `3` otherwise.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", self.id, name),
            None => self.id.to_string(),
        }
    }

    /// Match an operator selector: a 1-based index or a case-insensitive name.
    pub fn matches_selector(&self, key: &str) -> bool {
        let key = key.trim();
        if let Ok(index) = key.parse::<usize>() {
            return self.id.0 == index;
        }
        self.name
            .as_deref()
            .map(|n| n.eq_ignore_ascii_case(key))
            .unwrap_or(false)
    }

    /// Point the record at its append-only log file under the logs dir.
    pub fn set_log_dir(&mut self, logs_dir: &Path) {
        self.log_path = Some(logs_dir.join(format!("agent-{}.log", self.id)));
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Append a timestamped history entry and mirror it to the agent log.
    pub fn record(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(path) = &self.log_path {
            // One line per entry in the log file; embedded newlines escaped.
            let line = text.replace('\n', "\\n");
            let result = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| writeln!(file, "{}", line));
            if let Err(e) = result {
                flog_warn!("Failed to write agent log {}: {}", path.display(), e);
            }
        }
        self.history.push_back(HistoryEntry {
            at: Local::now(),
            text,
        });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Remember a command the agent ran, keeping only the most recent few.
    pub fn push_command(&mut self, command: impl Into<String>) {
        self.recent_commands.push_back(command.into());
        while self.recent_commands.len() > MAX_RECENT_COMMANDS {
            self.recent_commands.pop_front();
        }
    }

    /// The most recent history entries, oldest first.
    pub fn tail(&self, count: usize) -> Vec<&HistoryEntry> {
        let start = self.history.len().saturating_sub(count);
        self.history.iter().skip(start).collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
