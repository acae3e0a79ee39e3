//! Skill attachment resolution for `$<skill-name>` prompt markers.
//!
//! Resolution is best-effort: a marker whose skill file cannot be found falls
//! back silently to a plain text prompt. Missing skills are never an error.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::Config;
use crate::flog_debug;

/// One input item for a turn, as sent to the agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnItem {
    Text { text: String },
    Skill { name: String, path: PathBuf },
}

fn skill_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$([A-Za-z0-9_-]+)").unwrap())
}

/// Find the first `$skill` marker in a prompt.
pub fn find_skill_marker(prompt: &str) -> Option<String> {
    skill_marker_re()
        .captures(prompt)
        .map(|caps| caps[1].to_string())
}

/// Resolve a skill name to its SKILL.md path, checking each lookup root in
/// order. Returns None when no root contains the skill.
pub fn resolve_skill_path(config: &Config, skill_name: &str, cwd: Option<&Path>) -> Option<PathBuf> {
    for root in config.skill_roots(cwd) {
        let candidate = root.join(skill_name).join("SKILL.md");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

/// Build the input items for a turn: the prompt text, plus a skill attachment
/// when the prompt carries a resolvable `$skill` marker.
pub fn build_turn_input(config: &Config, prompt: &str, cwd: Option<&Path>) -> Vec<TurnItem> {
    let mut items = vec![TurnItem::Text {
        text: prompt.to_string(),
    }];
    let Some(skill_name) = find_skill_marker(prompt) else {
        return items;
    };
    match resolve_skill_path(config, &skill_name, cwd) {
        Some(path) => {
            flog_debug!("Skill '{}' resolved to {}", skill_name, path.display());
            items.push(TurnItem::Skill {
                name: skill_name,
                path,
            });
        }
        None => {
            // Silent fallback: send the prompt without an attachment.
            flog_debug!("Skill '{}' not found, sending plain prompt", skill_name);
        }
    }
    items
}
