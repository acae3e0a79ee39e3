//! Gate resolution for deferred agent prompts.
//!
//! A gate holds exactly one guarded prompt for one target agent and is
//! consumed the moment its condition first becomes true. Agent gates wait for
//! a set of named agents to reach Done (all of them, no partial unlock);
//! status gates wait for an external file's first line to equal a marker.
//!
//! Validation happens at registration, not at runtime: unknown dependency
//! names and cyclic agent-gate graphs are configuration errors that prevent
//! the run from starting.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::agent::AgentId;
use crate::spec::GateSpec;
use crate::{Error, Result};

/// A gate whose condition just became true: the guarded prompt and the agent
/// it is queued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedGate {
    pub target: AgentId,
    pub prompt: String,
}

#[derive(Debug)]
enum Condition {
    /// Canonical dependency keys still waiting to reach Done.
    Agents { remaining: HashSet<String> },
    Status { path: PathBuf, marker: String },
}

#[derive(Debug)]
struct PendingGate {
    target: AgentId,
    target_label: String,
    prompt: String,
    condition: Condition,
    registered_at: Instant,
}

/// A gate pending long enough that the operator should be told about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledGate {
    pub target: AgentId,
    pub target_label: String,
}

/// Tracks pending gates and releases them as agents complete or status files
/// reach their markers.
///
/// An agent is addressable both by name and by 1-based index. Every
/// dependency reference is canonicalized to the agent's index key, so the
/// cycle graph and the done set hold exactly one node per agent no matter
/// which form a gate uses.
pub struct GateResolver {
    /// Lowercased label (index rendering or name) to canonical index key.
    aliases: HashMap<String, String>,
    /// Canonical keys of agents that have reached Done.
    done: HashSet<String>,
    pending: Vec<PendingGate>,
    /// Agent-gate edges for cycle detection, one node per agent.
    graph: DiGraph<String, ()>,
    node_index: HashMap<String, NodeIndex>,
}

impl GateResolver {
    /// Create a resolver for a run with the given declared agents.
    pub fn new<I>(agents: I) -> Self
    where
        I: IntoIterator<Item = (AgentId, Option<String>)>,
    {
        let mut aliases = HashMap::new();
        for (id, name) in agents {
            let key = id.to_string();
            aliases.insert(key.clone(), key.clone());
            if let Some(name) = name {
                aliases.insert(name.to_lowercase(), key);
            }
        }
        Self {
            aliases,
            done: HashSet::new(),
            pending: Vec::new(),
            graph: DiGraph::new(),
            node_index: HashMap::new(),
        }
    }

    /// The canonical key for a dependency label, or None when no declared
    /// agent matches.
    fn canonical(&self, label: &str) -> Option<String> {
        self.aliases.get(&label.to_lowercase()).cloned()
    }

    fn node(&mut self, label: &str) -> NodeIndex {
        if let Some(&index) = self.node_index.get(label) {
            return index;
        }
        let index = self.graph.add_node(label.to_string());
        self.node_index.insert(label.to_string(), index);
        index
    }

    /// Register a gate guarding `prompt` for `target`.
    ///
    /// `target_label` is the target's name when it has one (so other gates
    /// may depend on it), otherwise its index rendering.
    ///
    /// # Errors
    /// Returns `UnknownGateTarget` when an agent gate names an undeclared
    /// agent, and `GateCycle` when the new edges would close a cycle in the
    /// agent-gate graph.
    pub fn register(
        &mut self,
        target: AgentId,
        target_label: &str,
        prompt: String,
        gate: GateSpec,
    ) -> Result<()> {
        let condition = match gate {
            GateSpec::Agents(deps) => {
                let mut remaining = HashSet::new();
                for dep in &deps {
                    let key = self.canonical(dep).ok_or_else(|| Error::UnknownGateTarget {
                        agent: target_label.to_string(),
                        target: dep.clone(),
                    })?;
                    remaining.insert(key);
                }

                // Add the edges tentatively, then reject if they close a cycle.
                let target_node = self.node(&target.to_string());
                let mut edges = Vec::new();
                for dep in &remaining {
                    let dep_node = self.node(dep);
                    edges.push(self.graph.add_edge(dep_node, target_node, ()));
                }
                if is_cyclic_directed(&self.graph) {
                    for edge in edges {
                        self.graph.remove_edge(edge);
                    }
                    return Err(Error::GateCycle(format!(
                        "agent '{}' participates in a dependency cycle",
                        target_label
                    )));
                }

                // Dependencies already done at registration count immediately.
                remaining.retain(|dep| !self.done.contains(dep));
                Condition::Agents { remaining }
            }
            GateSpec::Status { path, marker } => Condition::Status { path, marker },
        };

        self.pending.push(PendingGate {
            target,
            target_label: target_label.to_string(),
            prompt,
            condition,
            registered_at: Instant::now(),
        });
        Ok(())
    }

    /// Record that an agent reached Done and collect newly satisfied gates.
    /// Satisfied gates are removed; a later re-completion has no effect on
    /// gates already released. The agent may be given by name or index.
    pub fn on_agent_done(&mut self, name: &str) -> Vec<ReleasedGate> {
        let Some(key) = self.canonical(name) else {
            return Vec::new();
        };
        self.done.insert(key.clone());

        let mut released = Vec::new();
        self.pending.retain_mut(|gate| {
            if let Condition::Agents { remaining } = &mut gate.condition {
                remaining.remove(&key);
                if remaining.is_empty() {
                    released.push(ReleasedGate {
                        target: gate.target,
                        prompt: std::mem::take(&mut gate.prompt),
                    });
                    return false;
                }
            }
            true
        });
        released
    }

    /// Evaluate status gates against a polled file's first line.
    pub fn on_status_poll(&mut self, path: &std::path::Path, first_line: &str) -> Vec<ReleasedGate> {
        let mut released = Vec::new();
        self.pending.retain_mut(|gate| {
            if let Condition::Status { path: p, marker } = &gate.condition {
                if p == path && marker == first_line {
                    released.push(ReleasedGate {
                        target: gate.target,
                        prompt: std::mem::take(&mut gate.prompt),
                    });
                    return false;
                }
            }
            true
        });
        released
    }

    /// Distinct status-file paths still being waited on.
    pub fn status_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for gate in &self.pending {
            if let Condition::Status { path, .. } = &gate.condition {
                if !paths.contains(path) {
                    paths.push(path.clone());
                }
            }
        }
        paths
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Targets of gates pending longer than `threshold`, for operator display.
    pub fn stalled(&self, threshold: Duration) -> Vec<StalledGate> {
        self.pending
            .iter()
            .filter(|gate| gate.registered_at.elapsed() >= threshold)
            .map(|gate| StalledGate {
                target: gate.target,
                target_label: gate.target_label.clone(),
            })
            .collect()
    }
}
