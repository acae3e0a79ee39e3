//! Parsing of operator commands typed on the control surface.
//!
//! Syntax (selector is a 1-based agent index or a name):
//!
//! ```text
//! <selector> <prompt>          queue or dispatch a prompt
//! <selector>: <prompt>         same, explicit separator
//! <selector> stop [reason]     cancel the in-flight turn or queued head
//! <selector> <a|s|p|d|c>       resolve that agent's oldest approval
//! approve [<selector>] <a|s|p|d|c>   bare letter targets the oldest pending
//! review <selector> [scope] [--detached|--inline]
//! threads [loaded|list] [cursor|limit]
//! list | show <selector> | dump <selector> | help | quit
//! ```

use crate::approval::ApprovalChoice;
use crate::review::{extract_delivery, ReviewDelivery, ReviewScope};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Help,
    Quit,
    List,
    Show(String),
    Dump(String),
    Threads {
        loaded: bool,
        cursor: Option<String>,
        limit: Option<u64>,
    },
    Review {
        selector: String,
        scope: ReviewScope,
        delivery: Option<ReviewDelivery>,
    },
    Approve {
        /// None targets the oldest pending request across all agents.
        selector: Option<String>,
        choice: ApprovalChoice,
    },
    Stop {
        selector: String,
        reason: Option<String>,
    },
    Prompt {
        selector: String,
        prompt: String,
    },
}

/// Parse one operator line. Returns Ok(None) for blank input.
pub fn parse(line: &str) -> Result<Option<OperatorCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    match line {
        "help" | "?" => return Ok(Some(OperatorCommand::Help)),
        "quit" | "exit" => return Ok(Some(OperatorCommand::Quit)),
        "list" | "ls" => return Ok(Some(OperatorCommand::List)),
        _ => {}
    }

    if let Some(rest) = line.strip_prefix("show ") {
        return Ok(Some(OperatorCommand::Show(rest.trim().to_string())));
    }
    if let Some(rest) = line.strip_prefix("dump ") {
        return Ok(Some(OperatorCommand::Dump(rest.trim().to_string())));
    }
    if line == "threads" || line.starts_with("threads ") {
        return parse_threads(line).map(Some);
    }
    if line == "review" || line.starts_with("review ") {
        return parse_review(line).map(Some);
    }
    if line == "approve" || line.starts_with("approve ") {
        return parse_approve(line).map(Some);
    }

    // Remaining forms address one agent: "<selector>: <text>" or
    // "<selector> <text>".
    let (selector, text) = match line.split_once(':') {
        Some((head, text)) => (head.trim(), text.trim()),
        None => line
            .split_once(char::is_whitespace)
            .map(|(head, text)| (head.trim(), text.trim()))
            .ok_or_else(|| {
                Error::InvalidCommand(format!(
                    "'{}' — use: <selector> <prompt> (see 'help')",
                    line
                ))
            })?,
    };
    if selector.is_empty() || text.is_empty() {
        return Err(Error::InvalidCommand(
            "selector and prompt are both required".to_string(),
        ));
    }

    if let Some(choice) = single_letter_choice(text) {
        return Ok(Some(OperatorCommand::Approve {
            selector: Some(selector.to_string()),
            choice,
        }));
    }

    if text == "stop" || text.starts_with("stop ") {
        let reason = text.strip_prefix("stop").unwrap_or("").trim();
        return Ok(Some(OperatorCommand::Stop {
            selector: selector.to_string(),
            reason: (!reason.is_empty()).then(|| reason.to_string()),
        }));
    }

    Ok(Some(OperatorCommand::Prompt {
        selector: selector.to_string(),
        prompt: text.to_string(),
    }))
}

fn single_letter_choice(text: &str) -> Option<ApprovalChoice> {
    if text.len() == 1 {
        ApprovalChoice::from_letter(text)
    } else {
        None
    }
}

fn parse_threads(line: &str) -> Result<OperatorCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut loaded = true;
    let mut cursor = None;
    let mut limit = None;
    if let Some(&arg) = parts.get(1) {
        match arg {
            "loaded" | "list" => {
                loaded = arg == "loaded";
                if let Some(&extra) = parts.get(2) {
                    match extra.parse::<u64>() {
                        Ok(n) => limit = Some(n),
                        Err(_) => cursor = Some(extra.to_string()),
                    }
                }
            }
            other => match other.parse::<u64>() {
                Ok(n) => limit = Some(n),
                Err(_) => cursor = Some(other.to_string()),
            },
        }
    }
    Ok(OperatorCommand::Threads {
        loaded,
        cursor,
        limit,
    })
}

fn parse_review(line: &str) -> Result<OperatorCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let selector = parts.get(1).ok_or_else(|| {
        Error::InvalidCommand(
            "usage: review <selector> [uncommitted|base <branch>|commit <sha> [title]|custom <text>] [--detached|--inline]"
                .to_string(),
        )
    })?;
    let (rest, delivery) = extract_delivery(&parts[2..]);
    let scope = ReviewScope::parse(&rest)
        .map_err(|e| Error::InvalidCommand(format!("review: {}", e)))?;
    Ok(OperatorCommand::Review {
        selector: selector.to_string(),
        scope,
        delivery,
    })
}

fn parse_approve(line: &str) -> Result<OperatorCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (selector, letter) = match (parts.get(1), parts.get(2)) {
        (Some(&arg), None) => {
            if single_letter_choice(arg).is_some() {
                (None, arg)
            } else {
                return Err(Error::InvalidCommand(
                    "approval requires a choice: a/s/p/d/c".to_string(),
                ));
            }
        }
        (Some(&selector), Some(&letter)) => (Some(selector.to_string()), letter),
        (None, _) => {
            return Err(Error::InvalidCommand(
                "usage: approve [<selector>] <a|s|p|d|c>".to_string(),
            ));
        }
    };
    let choice = single_letter_choice(letter).ok_or_else(|| {
        Error::InvalidCommand(format!("invalid approval choice '{}'", letter))
    })?;
    Ok(OperatorCommand::Approve { selector, choice })
}
