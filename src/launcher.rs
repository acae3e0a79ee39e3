//! Generation of run artifacts: one prompt file per agent plus a runnable
//! launcher script that starts the supervisor with the same specifications.

use std::fs;
use std::path::{Path, PathBuf};

use crate::spec::AgentSpec;
use crate::{flog, Result};

/// Paths produced by [`generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherArtifacts {
    pub prompt_files: Vec<PathBuf>,
    pub script: PathBuf,
}

/// Write the prompt files under `<out_dir>/agents/` and the launcher script
/// at `<out_dir>/run_agents.sh`. The script reads each prompt file back so
/// the operator can edit prompts without regenerating.
pub fn generate(
    out_dir: &Path,
    specs: &[AgentSpec],
    cwd: &Path,
    review: bool,
) -> Result<LauncherArtifacts> {
    let agents_dir = out_dir.join("agents");
    fs::create_dir_all(&agents_dir)?;

    let mut prompt_files = Vec::new();
    for spec in specs {
        let path = agents_dir.join(prompt_file_name(spec));
        let mut content = spec.raw.clone();
        if !content.ends_with('\n') {
            content.push('\n');
        }
        fs::write(&path, content)?;
        prompt_files.push(path);
    }

    let script = out_dir.join("run_agents.sh");
    fs::write(&script, render_script(specs, cwd, review))?;
    make_executable(&script)?;
    flog!(
        "Generated {} prompt file(s) and {}",
        prompt_files.len(),
        script.display()
    );

    Ok(LauncherArtifacts {
        prompt_files,
        script,
    })
}

fn prompt_file_name(spec: &AgentSpec) -> String {
    match &spec.name {
        Some(name) => format!("{:02}-{}.md", spec.index, sanitize(name)),
        None => format!("{:02}-agent.md", spec.index),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn render_script(specs: &[AgentSpec], cwd: &Path, review: bool) -> String {
    let mut script = String::from("#!/bin/sh\n# Generated by foreman init\n");
    script.push_str("DIR=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n");
    script.push_str("exec foreman \\\n");
    script.push_str(&format!("  --cwd {} \\\n", shell_quote(&cwd.to_string_lossy())));
    for spec in specs {
        script.push_str(&format!(
            "  --agent \"$(cat \"$DIR/agents/{}\")\" \\\n",
            prompt_file_name(spec)
        ));
    }
    if review {
        script.push_str("  --review \\\n");
    }
    // Trailing backslash-newline is removed so the command ends cleanly.
    script.truncate(script.len() - " \\\n".len());
    script.push('\n');
    script
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
