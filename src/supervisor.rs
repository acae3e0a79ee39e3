//! The supervisor engine: owns the set of agents and multiplexes runtime
//! events, operator commands, and status-gate polling through one control
//! loop.
//!
//! All state mutation (agent state, prompt queues, gate table, approval
//! table) happens inside this loop. Agent turns execute in the external
//! runtime and communicate back exclusively through the event channel, so no
//! locking is needed around the run state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentId, AgentRecord, AgentState};
use crate::approval::{ApprovalBroker, ApprovalChoice, ApprovalSelector};
use crate::command::{self, OperatorCommand};
use crate::config::Config;
use crate::gate::GateResolver;
use crate::queue::PromptQueue;
use crate::review::{write_review_artifact, ReviewDelivery, ReviewScope};
use crate::runtime::{RuntimeEvent, RuntimeHandle, ThreadId};
use crate::skills::build_turn_input;
use crate::spec::AgentSpec;
use crate::workspace::Workspace;
use crate::{flog, flog_debug, flog_error, flog_warn, Error, Result};

/// Interval between status-gate polls and status prints.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Gates pending this long are flagged as stalled in status output.
const STALL_THRESHOLD: Duration = Duration::from_secs(60);

/// Prompt template for reviewer turns spawned by `--review`.
pub const DEFAULT_REVIEW_TEMPLATE: &str = "You are reviewing output from a sub-agent.\n\n\
Sub-agent prompt:\n{prompt}\n\n\
Sub-agent output:\n{output}\n\n\
Return:\n\
1) a short verdict (correct/incorrect/uncertain),\n\
2) any issues or missing steps,\n\
3) concrete fixes if needed.\n";

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub cwd: Option<PathBuf>,
    /// Spawn a reviewer turn for each agent's final output.
    pub review: bool,
    pub review_template: String,
    /// Overall run timeout; None disables it.
    pub timeout: Option<Duration>,
    /// Cap on concurrently active agents; None means unbounded.
    pub max_parallel: Option<usize>,
    /// Give each agent its own worktree checkout.
    pub isolate: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            review: false,
            review_template: DEFAULT_REVIEW_TEMPLATE.to_string(),
            timeout: None,
            max_parallel: None,
            isolate: false,
        }
    }
}

/// A prompt ready to start, waiting only for dispatch capacity.
#[derive(Debug)]
struct StartItem {
    target: AgentId,
    prompt: String,
}

pub struct Supervisor {
    config: Config,
    options: SupervisorOptions,
    runtime: RuntimeHandle,
    events: mpsc::UnboundedReceiver<RuntimeEvent>,
    agents: Vec<AgentRecord>,
    threads: HashMap<ThreadId, AgentId>,
    gates: GateResolver,
    queue: PromptQueue,
    approvals: ApprovalBroker,
    /// Ready-to-start prompts held back by `--max-parallel`.
    start_queue: VecDeque<StartItem>,
    /// Reviewer threads spawned by `--review`, mapped to the agent reviewed.
    reviewer_threads: HashMap<ThreadId, AgentId>,
    /// Labels captured when a review enters review mode, keyed by review id.
    review_labels: HashMap<String, String>,
    reviews_written: HashSet<String>,
    /// Thread whose inline review blocks the command path, if any.
    inline_wait: Option<ThreadId>,
    logs_dir: PathBuf,
    workspace: Option<Workspace>,
    runtime_closed: bool,
}

impl Supervisor {
    /// Build the run state from parsed agent specifications.
    ///
    /// Fails with a configuration error (duplicate name, unknown gate
    /// target, gate cycle) before any agent starts.
    pub fn new(
        specs: Vec<AgentSpec>,
        config: Config,
        options: SupervisorOptions,
        runtime: RuntimeHandle,
        events: mpsc::UnboundedReceiver<RuntimeEvent>,
    ) -> Result<Self> {
        let mut seen_names = HashSet::new();
        for spec in &specs {
            if let Some(name) = &spec.name {
                if !seen_names.insert(name.to_lowercase()) {
                    return Err(Error::DuplicateAgent(name.clone()));
                }
            }
        }

        // Gate dependencies may name agents or reference them by index; the
        // resolver canonicalizes both forms to one node per agent.
        let mut gates = GateResolver::new(
            specs
                .iter()
                .map(|spec| (AgentId(spec.index), spec.name.clone())),
        );

        let mut agents = Vec::new();
        let mut start_queue = VecDeque::new();
        let logs_dir = Config::logs_dir()?;

        for spec in specs {
            let id = AgentId(spec.index);
            let label = spec.label();
            let mut record = AgentRecord::new(id, spec.name.clone(), spec.prompt.clone());
            record.set_log_dir(&logs_dir);
            match spec.gate {
                Some(gate) => {
                    gates.register(id, &label, spec.prompt, gate)?;
                }
                None => {
                    start_queue.push_back(StartItem {
                        target: id,
                        prompt: spec.prompt,
                    });
                }
            }
            agents.push(record);
        }

        let workspace = match (&options.cwd, options.isolate) {
            (Some(cwd), true) => Some(Workspace::new(cwd)?),
            _ => None,
        };

        Ok(Self {
            config,
            options,
            runtime,
            events,
            agents,
            threads: HashMap::new(),
            gates,
            queue: PromptQueue::new(),
            approvals: ApprovalBroker::new(),
            start_queue,
            reviewer_threads: HashMap::new(),
            review_labels: HashMap::new(),
            reviews_written: HashSet::new(),
            inline_wait: None,
            logs_dir,
            workspace,
            runtime_closed: false,
        })
    }

    /// The main control loop. Returns when all agents settle, the operator
    /// quits, the runtime closes, or the run times out.
    pub async fn run(&mut self) -> Result<()> {
        Config::ensure_dirs()?;
        self.start_ready().await;

        let cancel = CancellationToken::new();
        let mut line_rx = spawn_stdin_reader(cancel.clone());
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let deadline = self
            .options
            .timeout
            .map(|t| tokio::time::Instant::now() + t);
        let mut deferred_lines: VecDeque<String> = VecDeque::new();

        loop {
            if self.run_complete() {
                flog!("All agents settled, shutting down");
                break;
            }

            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            flog_warn!("Runtime event channel closed");
                            break;
                        }
                    }
                    // An inline review completing releases deferred commands.
                    if self.inline_wait.is_none() {
                        while let Some(line) = deferred_lines.pop_front() {
                            if self.handle_line(&line).await {
                                cancel.cancel();
                                return Ok(());
                            }
                        }
                    }
                }
                line = line_rx.recv() => {
                    let Some(line) = line else { break };
                    if self.inline_wait.is_some() {
                        deferred_lines.push_back(line);
                        continue;
                    }
                    if self.handle_line(&line).await {
                        break;
                    }
                }
                _ = poll.tick() => {
                    self.poll_status_gates().await;
                    self.print_status();
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                        if deadline.is_some() => {
                    flog_error!("Supervisor timed out");
                    println!("[foreman] run timed out");
                    break;
                }
            }

            if self.runtime_closed {
                println!("[foreman] runtime closed, shutting down");
                break;
            }
        }

        cancel.cancel();
        Ok(())
    }

    // ========== Dispatch ==========

    fn active_count(&self) -> usize {
        self.agents.iter().filter(|a| a.state.is_active()).count()
    }

    fn capacity_available(&self) -> bool {
        match self.options.max_parallel {
            Some(max) => self.active_count() < max,
            None => true,
        }
    }

    /// Start queued-for-start prompts while capacity allows, in push order.
    /// A target that turned busy in the meantime gets the prompt queued
    /// instead.
    pub async fn start_ready(&mut self) {
        while self.capacity_available() {
            let Some(item) = self.start_queue.pop_front() else {
                break;
            };
            if self.record(item.target).state.is_dispatchable() {
                self.dispatch(item.target, item.prompt).await;
            } else {
                self.queue.push(item.target, item.prompt);
            }
        }
    }

    /// Send a prompt to an agent's session, creating the session on first
    /// use. A failure to start the turn stops the agent and is surfaced.
    async fn dispatch(&mut self, id: AgentId, prompt: String) {
        if let Err(e) = self.try_dispatch(id, &prompt).await {
            let record = self.record_mut(id);
            record.state = AgentState::Stopped;
            record.record(format!("turn failed to start: {}", e));
            println!("[foreman] agent {} failed to start: {}", self.label(id), e);
            flog_error!("Agent {} dispatch failed: {}", id, e);
        }
    }

    async fn try_dispatch(&mut self, id: AgentId, prompt: &str) -> Result<()> {
        let thread = match self.record(id).thread_id.clone() {
            Some(thread) => thread,
            None => {
                let workdir = match &self.workspace {
                    Some(workspace) => {
                        Some(workspace.create_isolated_checkout(&self.label(id))?)
                    }
                    None => self.options.cwd.clone(),
                };
                let thread = self.runtime.start_thread(workdir.clone()).await?;
                flog!("Agent {} started thread {}", id, thread);
                self.threads.insert(thread.clone(), id);
                let record = self.record_mut(id);
                record.thread_id = Some(thread.clone());
                record.workdir = workdir;
                thread
            }
        };
        let workdir = self.record(id).workdir.clone();
        let input = build_turn_input(&self.config, prompt, workdir.as_deref());
        self.runtime.start_turn(thread, input).await?;

        let record = self.record_mut(id);
        record.state = AgentState::Running;
        record.cancel_requested = false;
        record.last_message = None;
        record.record(format!("user: {}", prompt));
        Ok(())
    }

    /// Route a prompt to an agent: straight to the session when it is ready
    /// (and capacity allows), otherwise into its queue.
    async fn enqueue_or_dispatch(&mut self, id: AgentId, prompt: String) {
        let ready = self.record(id).state.is_dispatchable() && self.queue.is_empty(id);
        if ready && self.capacity_available() {
            self.dispatch(id, prompt).await;
        } else if ready {
            self.start_queue.push_back(StartItem { target: id, prompt });
        } else {
            self.record_mut(id).record(format!("queued: {}", prompt));
            self.queue.push(id, prompt);
        }
    }

    // ========== Events ==========

    pub async fn handle_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::TurnStarted { thread } => {
                if let Some(id) = self.agent_for(&thread) {
                    self.record_mut(id).record("turn started");
                }
            }
            RuntimeEvent::TurnCompleted { thread, status } => {
                if let Some(id) = self.agent_for(&thread) {
                    self.on_turn_completed(id, &status).await;
                } else if let Some(id) = self.reviewer_threads.remove(&thread) {
                    self.record_mut(id).record("review completed");
                    flog!("Reviewer for agent {} completed", id);
                }
            }
            RuntimeEvent::AgentMessage { thread, text } => {
                if let Some(id) = self.agent_for(&thread) {
                    let record = self.record_mut(id);
                    record.last_message = Some(text.clone());
                    record.record(format!("agent: {}", first_line(&text)));
                } else if let Some(&id) = self.reviewer_threads.get(&thread) {
                    let snippet: String = text.chars().take(120).collect();
                    println!("[review {}] {}", self.label(id), snippet);
                    self.record_mut(id).record(format!("review: {}", snippet));
                }
            }
            RuntimeEvent::CommandStarted { thread, command } => {
                if let Some(id) = self.agent_for(&thread) {
                    let record = self.record_mut(id);
                    record.push_command(command.clone());
                    record.record(format!("command: {}", command));
                }
            }
            RuntimeEvent::FileChanged { thread, summary } => {
                if let Some(id) = self.agent_for(&thread) {
                    self.record_mut(id).record(summary);
                }
            }
            RuntimeEvent::ReviewStarted {
                review_id, label, ..
            } => {
                if let Some(label) = label {
                    self.review_labels.insert(review_id, label);
                }
            }
            RuntimeEvent::ReviewCompleted {
                thread,
                review_id,
                output,
            } => {
                self.on_review_completed(&thread, &review_id, &output);
            }
            RuntimeEvent::ApprovalRequested {
                thread,
                req_id,
                kind,
                summary,
                amendment,
            } => {
                let Some(id) = self.agent_for(&thread) else {
                    flog_warn!("Approval request for unknown thread {}", thread);
                    return;
                };
                let seq = self.approvals.raise(id, req_id, kind, summary.clone(), amendment);
                let record = self.record_mut(id);
                record.state = AgentState::ApprovalPending;
                record.record(format!("approval requested: {}", summary));
                println!(
                    "[approval #{}] agent {}: {} (a/s/p/d/c)",
                    seq,
                    self.label(id),
                    summary
                );
            }
            RuntimeEvent::Closed => {
                self.runtime_closed = true;
            }
        }
    }

    /// Advance an agent past a finished turn: failed turns stop it, a queued
    /// prompt continues it, and otherwise it is Done and its dependents'
    /// gates are evaluated.
    async fn on_turn_completed(&mut self, id: AgentId, status: &str) {
        self.record_mut(id)
            .record(format!("turn completed: {}", status));

        if status == "failed" {
            self.record_mut(id).state = AgentState::Stopped;
            println!("[foreman] agent {} turn failed", self.label(id));
            flog_error!("Agent {} turn failed", id);
            self.start_ready().await;
            return;
        }

        if let Some(next) = self.queue.pop(id) {
            self.record_mut(id).state = AgentState::Idle;
            if self.capacity_available() {
                self.dispatch(id, next).await;
            } else {
                self.start_queue.push_back(StartItem { target: id, prompt: next });
            }
        } else if self.record(id).cancel_requested {
            // A cancelled turn with nothing queued settles at Idle.
            self.record_mut(id).state = AgentState::Idle;
        } else {
            self.record_mut(id).state = AgentState::Done;
            println!("[foreman] agent {} done", self.label(id));
            self.release_gates_for(id).await;
            if self.options.review {
                self.spawn_reviewer(id).await;
            }
        }
        self.start_ready().await;
    }

    /// Credit the completed agent and route every released prompt. The
    /// resolver maps index and name references to the same agent, so one
    /// completion call covers gates written in either form.
    async fn release_gates_for(&mut self, id: AgentId) {
        let released = self.gates.on_agent_done(&id.to_string());
        for gate in released {
            flog!("Gate released for agent {}", gate.target);
            self.enqueue_or_dispatch(gate.target, gate.prompt).await;
        }
    }

    /// Start a reviewer session over the agent's final output.
    async fn spawn_reviewer(&mut self, id: AgentId) {
        let Some(output) = self.record(id).last_message.clone() else {
            return;
        };
        let prompt = self
            .options
            .review_template
            .replace("{prompt}", &self.record(id).prompt)
            .replace("{output}", &output);

        let thread = match self.runtime.start_thread(self.options.cwd.clone()).await {
            Ok(thread) => thread,
            Err(e) => {
                flog_warn!("Reviewer thread for agent {} failed: {}", id, e);
                return;
            }
        };
        let input = build_turn_input(&self.config, &prompt, self.options.cwd.as_deref());
        if let Err(e) = self.runtime.start_turn(thread.clone(), input).await {
            flog_warn!("Reviewer turn for agent {} failed: {}", id, e);
            return;
        }
        self.reviewer_threads.insert(thread, id);
        self.record_mut(id).record("review of final output requested");
    }

    fn on_review_completed(&mut self, thread: &str, review_id: &str, output: &str) {
        if output.is_empty() || !self.reviews_written.insert(review_id.to_string()) {
            return;
        }
        let label = self.review_labels.remove(review_id);
        match write_review_artifact(&self.logs_dir, thread, review_id, label.as_deref(), output) {
            Ok(path) => {
                println!("[foreman] review output saved: {}", path.display());
                if let Some(id) = self.agent_for(thread) {
                    self.record_mut(id)
                        .record(format!("review output saved: {}", path.display()));
                }
            }
            Err(e) => {
                flog_error!("Failed to write review artifact: {}", e);
                println!("[foreman] failed to write review output: {}", e);
            }
        }
        if self.inline_wait.as_deref() == Some(thread) {
            self.inline_wait = None;
        }
    }

    // ========== Operator commands ==========

    /// Execute one operator line. Returns true when the operator quit.
    pub async fn handle_line(&mut self, line: &str) -> bool {
        match command::parse(line) {
            Ok(Some(cmd)) => self.handle_command(cmd).await,
            Ok(None) => false,
            Err(e) => {
                println!("[foreman] {}", e);
                false
            }
        }
    }

    pub async fn handle_command(&mut self, cmd: OperatorCommand) -> bool {
        match cmd {
            OperatorCommand::Quit => return true,
            OperatorCommand::Help => {
                println!(
                    "Commands: <selector> <prompt> | <selector> stop [reason] | \
                     <selector> <a|s|p|d|c> | approve [<selector>] <a|s|p|d|c> | \
                     review <selector> [uncommitted|base <branch>|commit <sha> [title]|custom <text>] \
                     [--detached|--inline] | threads [loaded|list] [cursor|limit] | \
                     list | show <selector> | dump <selector> | help | quit"
                );
            }
            OperatorCommand::List => {
                for agent in &self.agents {
                    let queued = self.queue.len(agent.id);
                    let suffix = if queued > 0 {
                        format!(" +{} queued", queued)
                    } else {
                        String::new()
                    };
                    println!("{}: {}{}", agent.label(), agent.state, suffix);
                }
            }
            OperatorCommand::Show(selector) => match self.resolve_selector(&selector) {
                Some(id) => {
                    println!("Agent {} history (last 20):", self.label(id));
                    for entry in self.record(id).tail(20) {
                        println!("  [{}] {}", entry.at.format("%H:%M:%S"), entry.text);
                    }
                }
                None => self.unknown_selector(&selector),
            },
            OperatorCommand::Dump(selector) => match self.resolve_selector(&selector) {
                Some(id) => match self.record(id).log_path() {
                    Some(path) => println!("Agent {} log: {}", self.label(id), path.display()),
                    None => println!("Agent {} has no log path.", self.label(id)),
                },
                None => self.unknown_selector(&selector),
            },
            OperatorCommand::Threads {
                loaded,
                cursor,
                limit,
            } => match self.runtime.list_threads(loaded, cursor, limit).await {
                Ok(list) => {
                    println!("threads: {}", list.ids.len());
                    for id in &list.ids {
                        println!("  {}", id);
                    }
                    if let Some(cursor) = list.next_cursor {
                        println!("next_cursor: {}", cursor);
                    }
                }
                Err(e) => println!("threads: request failed: {}", e),
            },
            OperatorCommand::Approve { selector, choice } => {
                self.resolve_approval(selector.as_deref(), choice);
            }
            OperatorCommand::Stop { selector, reason } => {
                match self.resolve_selector(&selector) {
                    Some(id) => self.cancel(id, reason.as_deref()).await,
                    None => self.unknown_selector(&selector),
                }
            }
            OperatorCommand::Prompt { selector, prompt } => {
                match self.resolve_selector(&selector) {
                    Some(id) => self.enqueue_or_dispatch(id, prompt).await,
                    None => self.unknown_selector(&selector),
                }
            }
            OperatorCommand::Review {
                selector,
                scope,
                delivery,
            } => {
                self.dispatch_review(&selector, scope, delivery).await;
            }
        }
        false
    }

    fn unknown_selector(&self, selector: &str) {
        println!("Unknown agent '{}'. Use 'list' to see agents.", selector);
    }

    /// Resolve an approval and forward the decision to the runtime. A
    /// selector that matches nothing is a reported no-op.
    fn resolve_approval(&mut self, selector: Option<&str>, choice: ApprovalChoice) {
        let broker_selector = match selector {
            Some(key) => match self.resolve_selector(key) {
                Some(id) => ApprovalSelector::Agent(id),
                None => {
                    self.unknown_selector(key);
                    return;
                }
            },
            None => ApprovalSelector::OldestPending,
        };
        let Some(request) = self.approvals.resolve(broker_selector, choice) else {
            match broker_selector {
                ApprovalSelector::Agent(id) => {
                    println!("No pending approvals for agent {}.", self.label(id));
                }
                ApprovalSelector::OldestPending => println!("No pending approvals."),
            }
            return;
        };

        self.runtime.respond_approval(
            request.req_id.clone(),
            request.kind.clone(),
            choice,
            request.amendment.clone(),
        );
        let id = request.agent;
        self.record_mut(id)
            .record(format!("approval #{} resolved: {}", request.seq, choice.as_letter()));
        // The turn resumes unless more approvals are outstanding.
        if self.record(id).state == AgentState::ApprovalPending && !self.approvals.has_pending(id) {
            self.record_mut(id).state = AgentState::Running;
        }
        println!(
            "[foreman] approval #{} ({}) resolved: {}",
            request.seq,
            self.label(id),
            choice.as_letter()
        );
    }

    /// Cancel an agent's in-flight turn, or remove its queued head when no
    /// turn is in flight. Never silently dropped: every outcome is recorded.
    pub async fn cancel(&mut self, id: AgentId, reason: Option<&str>) {
        let reason = reason.unwrap_or("stop current task and report status");
        let active_thread = self
            .record(id)
            .state
            .is_active()
            .then(|| self.record(id).thread_id.clone())
            .flatten();
        if let Some(thread) = active_thread {
            self.record_mut(id).cancel_requested = true;
            match self.runtime.cancel_turn(thread).await {
                Ok(true) => {
                    let record = self.record_mut(id);
                    record.state = AgentState::Idle;
                    record.record(format!("turn cancelled: {}", reason));
                    println!("[foreman] agent {} turn cancelled", self.label(id));
                }
                Ok(false) | Err(_) => {
                    self.record_mut(id)
                        .record(format!("cancel rejected, still running: {}", reason));
                    println!(
                        "[foreman] agent {} did not accept cancellation",
                        self.label(id)
                    );
                }
            }
        } else if let Some(dropped) = self.queue.remove_head(id) {
            self.record_mut(id)
                .record(format!("dequeued '{}': {}", first_line(&dropped), reason));
            println!("[foreman] agent {} queued prompt removed", self.label(id));
        } else {
            // Cancel raced a completed turn: already resolved.
            self.record_mut(id).record(format!("stop (no-op): {}", reason));
            println!("[foreman] agent {} has nothing to cancel", self.label(id));
        }
    }

    async fn dispatch_review(
        &mut self,
        selector: &str,
        scope: ReviewScope,
        delivery: Option<ReviewDelivery>,
    ) {
        // Selectors may also name a raw thread id, matching none of the agents.
        let thread = match self.resolve_selector(selector) {
            Some(id) => match self.record(id).thread_id.clone() {
                Some(thread) => thread,
                None => {
                    println!(
                        "review: agent {} has no session yet ({})",
                        self.label(id),
                        scope.kind()
                    );
                    return;
                }
            },
            None => selector.to_string(),
        };

        let wire_delivery = delivery.map(|d| d.as_wire().to_string());
        match self
            .runtime
            .start_review(thread.clone(), scope.to_wire(), wire_delivery)
            .await
        {
            Ok(review_thread) => {
                let shown = review_thread.clone().unwrap_or_else(|| thread.clone());
                println!("review started: thread {} ({})", shown, scope.kind());
                if delivery == Some(ReviewDelivery::Inline) {
                    self.inline_wait = Some(thread);
                }
            }
            Err(e) => {
                // Reported with the failed scope; agent state is untouched.
                println!("review failed ({}): {}", scope.kind(), e);
                flog_warn!("Review dispatch failed ({}): {}", scope.kind(), e);
            }
        }
    }

    // ========== Gates and polling ==========

    /// Read the first line of each watched status file and release any
    /// satisfied gates. Unreadable files count as not yet satisfied.
    pub async fn poll_status_gates(&mut self) {
        for path in self.gates.status_paths() {
            let first_line = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content.lines().next().unwrap_or("").trim().to_string(),
                Err(_) => continue,
            };
            let released = self.gates.on_status_poll(&path, &first_line);
            for gate in released {
                flog!("Status gate satisfied for agent {}", gate.target);
                self.enqueue_or_dispatch(gate.target, gate.prompt).await;
            }
        }
        self.start_ready().await;
    }

    // ========== Status ==========

    /// One token per agent: `<index><marker>[+N][:name]` with `.` running,
    /// `✓` done, `!` approval pending, `+N` queued prompts.
    pub fn status_strip(&self) -> String {
        let mut parts = Vec::new();
        for agent in &self.agents {
            let marker = if self.approvals.has_pending(agent.id) {
                "!"
            } else if agent.state == AgentState::Done {
                "✓"
            } else {
                "."
            };
            let queued = self.queue.len(agent.id);
            let suffix = if queued > 0 {
                format!("+{}", queued)
            } else {
                String::new()
            };
            let mut label = format!("{}{}{}", agent.id, marker, suffix);
            if let Some(name) = &agent.name {
                label = format!("{}:{}", label, name);
            }
            parts.push(label);
        }
        parts.join("  ")
    }

    fn print_status(&self) {
        let mut line = self.status_strip();
        let stalled = self.gates.stalled(STALL_THRESHOLD);
        if !stalled.is_empty() {
            let labels: Vec<String> = stalled
                .iter()
                .map(|g| g.target_label.clone())
                .collect();
            line.push_str(&format!("  [stalled: {}]", labels.join(", ")));
        }
        if !line.is_empty() {
            println!("{}", line);
        }
    }

    // ========== Completion ==========

    /// The run is over when nothing can make further progress on its own:
    /// no pending gates or start-queue items, every agent settled, and no
    /// outstanding reviewer work.
    pub fn run_complete(&self) -> bool {
        self.start_queue.is_empty()
            && self.gates.pending_count() == 0
            && self.reviewer_threads.is_empty()
            && self.inline_wait.is_none()
            && self.agents.iter().all(|a| self.is_settled(a))
    }

    fn is_settled(&self, agent: &AgentRecord) -> bool {
        match agent.state {
            AgentState::Done | AgentState::Stopped => true,
            AgentState::Idle => {
                // A cancelled turn can settle at Idle with nothing queued.
                agent.cancel_requested && self.queue.is_empty(agent.id)
            }
            _ => false,
        }
    }

    // ========== Lookups ==========

    pub fn resolve_selector(&self, key: &str) -> Option<AgentId> {
        self.agents
            .iter()
            .find(|a| a.matches_selector(key))
            .map(|a| a.id)
    }

    fn agent_for(&self, thread: &str) -> Option<AgentId> {
        self.threads.get(thread).copied()
    }

    fn record(&self, id: AgentId) -> &AgentRecord {
        &self.agents[id.0 - 1]
    }

    fn record_mut(&mut self, id: AgentId) -> &mut AgentRecord {
        &mut self.agents[id.0 - 1]
    }

    fn label(&self, id: AgentId) -> String {
        self.record(id).label()
    }

    pub fn state(&self, id: AgentId) -> AgentState {
        self.record(id).state
    }

    pub fn queued(&self, id: AgentId) -> usize {
        self.queue.len(id)
    }

    pub fn pending_approvals(&self) -> usize {
        self.approvals.pending_count()
    }

    pub fn pending_gates(&self) -> usize {
        self.gates.pending_count()
    }

    pub fn thread_of(&self, id: AgentId) -> Option<&str> {
        self.record(id).thread_id.as_deref()
    }

    /// Redirect agent logs and review artifacts away from the default
    /// `~/.foreman/logs` directory.
    pub fn set_logs_dir(&mut self, dir: &std::path::Path) {
        self.logs_dir = dir.to_path_buf();
        for agent in &mut self.agents {
            agent.set_log_dir(dir);
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn spawn_stdin_reader(cancel: CancellationToken) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        _ => break,
                    }
                }
            }
        }
        flog_debug!("Stdin reader finished");
    });
    rx
}
