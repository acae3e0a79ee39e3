//! Broker for approval requests raised by agent sessions.
//!
//! Requests get a strictly increasing sequence number in creation order,
//! process-wide, so "oldest pending" is well defined across agents. Exactly
//! one request resolves per operator command; a selector that matches nothing
//! is a reported no-op, never an error.

use serde_json::Value;

use crate::agent::AgentId;

/// Operator decision letter for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChoice {
    /// `a` — accept this request.
    Accept,
    /// `s` — accept for the rest of the session.
    AcceptForSession,
    /// `p` — accept with the proposed policy amendment.
    PolicyAmendment,
    /// `d` — decline.
    Decline,
    /// `c` — cancel the turn.
    Cancel,
}

impl ApprovalChoice {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "a" => Some(Self::Accept),
            "s" => Some(Self::AcceptForSession),
            "p" => Some(Self::PolicyAmendment),
            "d" => Some(Self::Decline),
            "c" => Some(Self::Cancel),
            _ => None,
        }
    }

    pub fn as_letter(&self) -> &'static str {
        match self {
            Self::Accept => "a",
            Self::AcceptForSession => "s",
            Self::PolicyAmendment => "p",
            Self::Decline => "d",
            Self::Cancel => "c",
        }
    }

    pub fn approves(&self) -> bool {
        matches!(self, Self::Accept | Self::AcceptForSession | Self::PolicyAmendment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// Which pending request an operator command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalSelector {
    /// The oldest pending request raised by a specific agent.
    Agent(AgentId),
    /// The oldest pending request across all agents.
    OldestPending,
}

/// One approval request raised by an agent's in-flight turn.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// Creation-order sequence number, strictly increasing process-wide.
    pub seq: u64,
    pub agent: AgentId,
    /// The runtime's request id, echoed back when responding.
    pub req_id: Value,
    /// Request kind (wire method, e.g. a command-execution approval).
    pub kind: String,
    /// Human-readable payload description for display.
    pub summary: String,
    /// Proposed policy amendment carried by the request, if any.
    pub amendment: Option<Value>,
    pub status: ApprovalStatus,
}

#[derive(Debug, Default)]
pub struct ApprovalBroker {
    next_seq: u64,
    pending: Vec<ApprovalRequest>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: Vec::new(),
        }
    }

    /// Store a new pending request and return its sequence number.
    pub fn raise(
        &mut self,
        agent: AgentId,
        req_id: Value,
        kind: impl Into<String>,
        summary: impl Into<String>,
        amendment: Option<Value>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(ApprovalRequest {
            seq,
            agent,
            req_id,
            kind: kind.into(),
            summary: summary.into(),
            amendment,
            status: ApprovalStatus::Pending,
        });
        seq
    }

    /// Resolve exactly one pending request matching the selector, or None as
    /// a no-op when nothing matches. The returned request carries its final
    /// Approved/Denied status and has been removed from the pending set.
    pub fn resolve(
        &mut self,
        selector: ApprovalSelector,
        choice: ApprovalChoice,
    ) -> Option<ApprovalRequest> {
        // Pending entries are stored in raise order, so the first match is
        // the smallest sequence number.
        let position = match selector {
            ApprovalSelector::Agent(id) => self.pending.iter().position(|r| r.agent == id),
            ApprovalSelector::OldestPending => (!self.pending.is_empty()).then_some(0),
        }?;
        let mut request = self.pending.remove(position);
        request.status = if choice.approves() {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        Some(request)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, agent: AgentId) -> bool {
        self.pending.iter().any(|r| r.agent == agent)
    }

    /// Summary of the agent's oldest pending request, for status display.
    pub fn oldest_summary(&self, agent: AgentId) -> Option<&str> {
        self.pending
            .iter()
            .find(|r| r.agent == agent)
            .map(|r| r.summary.as_str())
    }
}
