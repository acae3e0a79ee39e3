//! Per-agent FIFO buffers of pending prompts.
//!
//! The queue only holds prompts that could not be dispatched immediately:
//! the supervisor bypasses it entirely when the target session is ready.

use std::collections::{HashMap, VecDeque};

use crate::agent::AgentId;

#[derive(Debug, Default)]
pub struct PromptQueue {
    queues: HashMap<AgentId, VecDeque<String>>,
}

impl PromptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a prompt to the agent's queue.
    pub fn push(&mut self, agent: AgentId, prompt: impl Into<String>) {
        self.queues.entry(agent).or_default().push_back(prompt.into());
    }

    /// Pop the head of the agent's queue, if any.
    pub fn pop(&mut self, agent: AgentId) -> Option<String> {
        self.queues.get_mut(&agent)?.pop_front()
    }

    /// Remove the head without dispatching it (cancel against queued work).
    /// Returns the removed prompt.
    pub fn remove_head(&mut self, agent: AgentId) -> Option<String> {
        self.pop(agent)
    }

    pub fn len(&self, agent: AgentId) -> usize {
        self.queues.get(&agent).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, agent: AgentId) -> bool {
        self.len(agent) == 0
    }
}
