//! Parsing of `--agent` specification strings.
//!
//! An agent specification is the prompt text, optionally preceded by gate
//! directives separated with `||`:
//!
//! ```text
//! WAIT_FOR_AGENT: builder,linter || run the test suite (name: tester)
//! WAIT_FOR_STATUS: ./status.txt | ready || deploy the service
//! ```
//!
//! The prompt body may embed `(name: <AgentName>)` to assign identity and
//! `$<skill-name>` tokens resolved by the skills module.

use std::path::PathBuf;

use crate::{Error, Result};

/// The gate condition guarding an agent's initial prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateSpec {
    /// All named agents must reach Done before the prompt dispatches.
    Agents(Vec<String>),
    /// The file's first line must equal the marker.
    Status { path: PathBuf, marker: String },
}

/// One parsed `--agent` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpec {
    /// 1-based position among the `--agent` flags.
    pub index: usize,
    /// Operator-assigned name from `(name: ...)`, if any.
    pub name: Option<String>,
    /// The prompt body with directives stripped (name marker retained).
    pub prompt: String,
    pub gate: Option<GateSpec>,
    /// The specification string exactly as given on the command line.
    pub raw: String,
}

impl AgentSpec {
    /// Parse a raw `--agent` value.
    pub fn parse(index: usize, raw: &str) -> Result<Self> {
        let (prompt, gate) = extract_directives(raw)?;
        if prompt.is_empty() {
            return Err(Error::InvalidAgentSpec(format!(
                "agent {} has an empty prompt",
                index
            )));
        }
        let name = parse_agent_name(&prompt);
        Ok(Self {
            index,
            name,
            prompt,
            gate,
            raw: raw.to_string(),
        })
    }

    /// Display label: the assigned name, or the index when unnamed.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.index.to_string(),
        }
    }
}

const AGENT_DIRECTIVES: [&str; 3] = [
    "WAIT_FOR_AGENT_DONE:",
    "WAIT_FOR_AGENTS:",
    "WAIT_FOR_AGENT:",
];

/// Split leading `||`-separated directive segments from the prompt body.
fn extract_directives(raw: &str) -> Result<(String, Option<GateSpec>)> {
    let parts: Vec<&str> = raw.split("||").collect();
    let mut deps: Vec<String> = Vec::new();
    let mut status: Option<(PathBuf, String)> = None;
    let mut body_start = 0;

    for (i, part) in parts.iter().enumerate() {
        let token = part.trim();
        if let Some(rest) = token.strip_prefix("WAIT_FOR_STATUS:") {
            let directive = rest.trim();
            match directive.split_once('|') {
                Some((path, marker)) if !path.trim().is_empty() && !marker.trim().is_empty() => {
                    status = Some((PathBuf::from(path.trim()), marker.trim().to_string()));
                    body_start = i + 1;
                    continue;
                }
                _ => {
                    return Err(Error::InvalidAgentSpec(format!(
                        "WAIT_FOR_STATUS requires '<path> | <status>', got '{}'",
                        directive
                    )));
                }
            }
        }
        if let Some(rest) = AGENT_DIRECTIVES
            .iter()
            .find_map(|prefix| token.strip_prefix(prefix))
        {
            deps.extend(
                rest.split(',')
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
            );
            body_start = i + 1;
            continue;
        }
        break;
    }

    let body = parts[body_start..].join("||").trim().to_string();

    let gate = match (deps.is_empty(), status) {
        (true, None) => None,
        (false, None) => Some(GateSpec::Agents(deps)),
        (true, Some((path, marker))) => Some(GateSpec::Status { path, marker }),
        (false, Some(_)) => {
            return Err(Error::InvalidAgentSpec(
                "a gate is either agent-based or status-based, not both".to_string(),
            ));
        }
    };

    Ok((body, gate))
}

/// Extract the `(name: <AgentName>)` marker from a prompt body.
pub fn parse_agent_name(prompt: &str) -> Option<String> {
    let marker = "(name:";
    let start = prompt.find(marker)?;
    let end = prompt[start..].find(')')? + start;
    let name = prompt[start + marker.len()..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
