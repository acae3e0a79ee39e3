use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use foreman::config::Config;
use foreman::runtime::RuntimeClient;
use foreman::supervisor::DEFAULT_REVIEW_TEMPLATE;
use foreman::{flog_error, launcher, AgentSpec, Error, Result, Supervisor, SupervisorOptions};

/// Foreman - supervisor for parallel agent sessions on an agent runtime
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    FOREMAN_DEBUG=1     Enable debug logging (alternative to --debug)"
)]
struct Cli {
    /// Agent specification (repeat once per agent); may start with
    /// WAIT_FOR_AGENT: or WAIT_FOR_STATUS: directives separated by '||'
    #[arg(long = "agent", value_name = "SPEC")]
    agents: Vec<String>,

    /// Working directory for agent sessions
    #[arg(long, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Review each agent's final output with a second session
    #[arg(long)]
    review: bool,

    /// Override the runtime server command from the config file
    #[arg(long = "server-cmd", value_name = "CMD")]
    server_cmd: Option<String>,

    /// Overall run timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Cap on concurrently running agents
    #[arg(long = "max-parallel", value_name = "N")]
    max_parallel: Option<usize>,

    /// Give each agent an isolated git worktree checkout
    #[arg(long)]
    isolate: bool,

    /// Enable debug logging (writes to ~/.foreman/foreman.log)
    #[arg(short = 'd', long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Write per-agent prompt files and a launcher script instead of running
    Init {
        /// Output directory for the generated artifacts
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    foreman::log::init_with_debug(cli.debug);

    if let Err(e) = run(cli).await {
        eprintln!("foreman: {}", e);
        flog_error!("Fatal: {}", e);
        // Only configuration mistakes are exit-code failures; runtime
        // trouble is already surfaced in the transcript and logs.
        if e.is_configuration() {
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(cmd) = cli.server_cmd {
        config.server_command = Some(cmd);
    }

    if cli.agents.is_empty() {
        return Err(Error::InvalidAgentSpec(
            "at least one --agent specification is required".to_string(),
        ));
    }
    let mut specs = Vec::new();
    for (i, raw) in cli.agents.iter().enumerate() {
        specs.push(AgentSpec::parse(i + 1, raw)?);
    }

    if let Some(Command::Init { out }) = cli.command {
        let cwd = match cli.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()?,
        };
        let artifacts = launcher::generate(&out, &specs, &cwd, cli.review)?;
        for path in &artifacts.prompt_files {
            println!("wrote {}", path.display());
        }
        println!("wrote {}", artifacts.script.display());
        return Ok(());
    }

    let cwd = match cli.cwd {
        Some(cwd) => Some(cwd),
        None if cli.isolate => Some(std::env::current_dir()?),
        None => None,
    };
    let options = SupervisorOptions {
        cwd,
        review: cli.review,
        review_template: DEFAULT_REVIEW_TEMPLATE.to_string(),
        timeout: cli.timeout.map(Duration::from_secs),
        max_parallel: cli.max_parallel,
        isolate: cli.isolate,
    };

    let (runtime, events) = RuntimeClient::spawn(config.effective_server_command()).await?;
    let mut supervisor = Supervisor::new(specs, config, options, runtime, events)?;
    supervisor.run().await
}
