//! Review dispatch: diff scope resolution and result artifacts.
//!
//! A review runs as an independent analysis on the agent runtime against a
//! diff scope. Foreman resolves the scope from the operator command, starts
//! the review, and persists the output to the logs directory when the
//! runtime reports completion. Inline delivery blocks the issuing command
//! until the artifact is written; detached delivery returns a handle
//! immediately.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::{Error, Result};

/// The diff source a review analyzes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewScope {
    /// The uncommitted working tree.
    Uncommitted,
    /// Changes relative to a base branch.
    BaseBranch(String),
    /// A single commit, with an optional display title.
    Commit { sha: String, title: Option<String> },
    /// Free-form review instructions.
    Custom(String),
}

impl ReviewScope {
    /// Parse the scope tokens of a review command (after selector and
    /// delivery flags are stripped). An empty list means the working tree;
    /// an unrecognized leading token becomes custom instructions.
    pub fn parse(tokens: &[&str]) -> Result<Self> {
        match tokens.first().copied() {
            None => Ok(Self::Uncommitted),
            Some("uncommitted") | Some("uncommittedChanges") | Some("changes") | Some("current") => {
                Ok(Self::Uncommitted)
            }
            Some("base") => match tokens.get(1) {
                Some(branch) => Ok(Self::BaseBranch(branch.to_string())),
                None => Err(Error::ReviewDispatch(
                    "base requires a branch name".to_string(),
                )),
            },
            Some("commit") => match tokens.get(1) {
                Some(sha) => {
                    let title = tokens[2..].join(" ");
                    Ok(Self::Commit {
                        sha: sha.to_string(),
                        title: (!title.is_empty()).then_some(title),
                    })
                }
                None => Err(Error::ReviewDispatch("commit requires a sha".to_string())),
            },
            Some("custom") => {
                let instructions = tokens[1..].join(" ");
                if instructions.is_empty() {
                    return Err(Error::ReviewDispatch(
                        "custom requires instructions".to_string(),
                    ));
                }
                Ok(Self::Custom(instructions))
            }
            Some(_) => Ok(Self::Custom(tokens.join(" "))),
        }
    }

    /// The wire representation for `review/start`.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Uncommitted => json!({ "type": "uncommittedChanges" }),
            Self::BaseBranch(branch) => json!({ "type": "baseBranch", "branch": branch }),
            Self::Commit { sha, title: None } => json!({ "type": "commit", "sha": sha }),
            Self::Commit {
                sha,
                title: Some(title),
            } => json!({ "type": "commit", "sha": sha, "title": title }),
            Self::Custom(instructions) => {
                json!({ "type": "custom", "instructions": instructions })
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Uncommitted => "uncommittedChanges",
            Self::BaseBranch(_) => "baseBranch",
            Self::Commit { .. } => "commit",
            Self::Custom(_) => "custom",
        }
    }
}

/// Whether the issuing control path waits for the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewDelivery {
    Inline,
    #[default]
    Detached,
}

impl ReviewDelivery {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Detached => "detached",
        }
    }
}

/// Strip delivery flags (`--detached`, `--inline`, `delivery <mode>`) from a
/// token list, returning the remaining tokens and the chosen delivery.
pub fn extract_delivery<'a>(tokens: &[&'a str]) -> (Vec<&'a str>, Option<ReviewDelivery>) {
    let mut delivery = None;
    let mut remaining = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "--detached" => {
                delivery = Some(ReviewDelivery::Detached);
                i += 1;
            }
            "--inline" => {
                delivery = Some(ReviewDelivery::Inline);
                i += 1;
            }
            "delivery" if matches!(tokens.get(i + 1), Some(&"inline") | Some(&"detached")) => {
                delivery = Some(if tokens[i + 1] == "inline" {
                    ReviewDelivery::Inline
                } else {
                    ReviewDelivery::Detached
                });
                i += 2;
            }
            token => {
                remaining.push(token);
                i += 1;
            }
        }
    }
    (remaining, delivery)
}

fn sanitize_filename_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitized.trim_matches('_').to_string()
}

/// Persist a completed review's output under the logs directory. Returns the
/// artifact path for display.
pub fn write_review_artifact(
    logs_dir: &Path,
    thread_id: &str,
    review_id: &str,
    label: Option<&str>,
    output: &str,
) -> Result<PathBuf> {
    let timestamp = chrono::Local::now();
    let safe_thread = sanitize_filename_component(thread_id);
    let safe_thread = if safe_thread.is_empty() { "thread".to_string() } else { safe_thread };
    let safe_review = sanitize_filename_component(review_id);
    let safe_review = if safe_review.is_empty() { "review".to_string() } else { safe_review };
    let filename = format!(
        "review-{}-{}-{}.md",
        safe_thread,
        safe_review,
        timestamp.format("%Y%m%d-%H%M%S")
    );
    let path = logs_dir.join(filename);

    let mut content = String::new();
    content.push_str("# Review Output\n");
    content.push_str(&format!("Thread: {}\n", thread_id));
    content.push_str(&format!("Review ID: {}\n", review_id));
    if let Some(label) = label {
        content.push_str(&format!("Label: {}\n", label));
    }
    content.push_str(&format!(
        "Timestamp: {}\n",
        timestamp.format("%Y-%m-%d %H:%M:%S %z")
    ));
    content.push('\n');
    content.push_str(output);
    if !output.ends_with('\n') {
        content.push('\n');
    }

    fs::write(&path, content)?;
    Ok(path)
}
