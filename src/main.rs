//! islet: run commands and file operations inside a remote sandbox instance.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use islet_sandbox::{
    CommandRequest, CommandResult, Sandbox, SandboxConfig, DEFAULT_POLL_INTERVAL,
};
use tracing_subscriber::prelude::*;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "islet")]
#[command(version, about = "Run commands inside an ephemeral cloud sandbox", long_about = None)]
struct Cli {
    /// Control-plane API base URL
    #[arg(long, env = "ISLET_API_URL", default_value = "https://api.islet.run")]
    api_url: Url,

    /// Control-plane API token
    #[arg(long, env = "ISLET_API_TOKEN", default_value = "", hide_env_values = true)]
    api_token: String,

    /// Sandbox instance id
    #[arg(long = "instance", env = "ISLET_INSTANCE_ID", value_name = "ID")]
    instance_id: String,

    /// Per-instance executor secret
    #[arg(long, env = "ISLET_SANDBOX_SECRET", hide_env_values = true)]
    secret: String,

    /// Executor endpoint, skipping control-plane resolution
    #[arg(long, env = "ISLET_ENDPOINT")]
    endpoint: Option<Url>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report control-plane status and executor health
    Health,
    /// Poll until the instance is ready or the timeout elapses
    WaitReady {
        /// Maximum time to wait, in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
        /// Seconds between polls
        #[arg(long = "poll-interval", default_value_t = 2)]
        poll_interval: u64,
    },
    /// Execute a command and print its output
    Run(RunArgs),
    /// Upload a local file into the sandbox
    Put { local: std::path::PathBuf, remote: String },
    /// Download a sandbox file
    Get { remote: String, local: std::path::PathBuf },
    /// List a sandbox directory
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// List background processes
    Ps,
    /// Kill one background process, or all of them
    Kill {
        id: Option<String>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Command text, run via `sh -c`
    cmd: String,

    /// Working directory inside the sandbox
    #[arg(long)]
    cwd: Option<String>,

    /// Environment override, KEY=VALUE; repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Command timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Stream output as it arrives instead of waiting for completion
    #[arg(long)]
    follow: bool,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SandboxConfig::new(&cli.instance_id, &cli.secret)
        .api(cli.api_url.clone(), &cli.api_token);
    if let Some(endpoint) = &cli.endpoint {
        config = config.endpoint(endpoint.clone());
    }
    let sandbox = Sandbox::new(config).context("invalid sandbox configuration")?;

    match cli.command {
        Command::Health => {
            let status = sandbox.status().await;
            let ready = sandbox.is_ready().await;
            println!("instance: {status:?}");
            println!("ready: {ready}");
            if !ready {
                std::process::exit(1);
            }
        }
        Command::WaitReady {
            timeout,
            poll_interval,
        } => {
            let interval = if poll_interval == 0 {
                DEFAULT_POLL_INTERVAL
            } else {
                Duration::from_secs(poll_interval)
            };
            let ready = sandbox
                .wait_ready(Duration::from_secs(timeout), interval)
                .await;
            println!("ready: {ready}");
            if !ready {
                std::process::exit(1);
            }
        }
        Command::Run(args) => {
            let result = run_command(&sandbox, args).await?;
            std::process::exit(result.exit_code);
        }
        Command::Put { local, remote } => {
            sandbox
                .fs()
                .upload(&local, &remote)
                .await
                .with_context(|| format!("failed to upload {}", local.display()))?;
        }
        Command::Get { remote, local } => {
            sandbox
                .fs()
                .download(&remote, &local)
                .await
                .with_context(|| format!("failed to download {remote}"))?;
        }
        Command::Ls { path } => {
            let entries = sandbox
                .fs()
                .list_dir(&path)
                .await
                .with_context(|| format!("failed to list {path}"))?;
            for entry in entries {
                println!("{entry}");
            }
        }
        Command::Ps => {
            let processes = sandbox
                .processes()
                .list()
                .await
                .context("failed to list processes")?;
            for process in processes {
                let pid = process
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}\t{}", process.id, process.status, pid, process.command);
            }
        }
        Command::Kill { id, all } => {
            if all {
                let killed = sandbox
                    .processes()
                    .kill_all()
                    .await
                    .context("failed to kill processes")?;
                println!("killed: {killed}");
            } else {
                let id = id.context("provide a process id or --all")?;
                sandbox
                    .processes()
                    .kill(&id)
                    .await
                    .with_context(|| format!("failed to kill {id}"))?;
            }
        }
    }

    Ok(())
}

async fn run_command(sandbox: &Sandbox, args: RunArgs) -> Result<CommandResult> {
    let mut request = CommandRequest::new(&args.cmd)
        .context("invalid command")?
        .timeout(Duration::from_secs(args.timeout));
    if let Some(cwd) = &args.cwd {
        request = request.cwd(cwd);
    }
    for (key, value) in &args.env {
        request = request
            .env(key, value)
            .with_context(|| format!("invalid environment key {key:?}"))?;
    }

    if args.follow {
        let mut print_out = |chunk: &str| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        };
        let mut print_err = |chunk: &str| {
            eprint!("{chunk}");
            let _ = std::io::stderr().flush();
        };
        let result = sandbox
            .exec_with_callbacks(&request, Some(&mut print_out), Some(&mut print_err))
            .await;
        Ok(result)
    } else {
        let result = sandbox.exec(&request).await;
        print!("{}", result.stdout);
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
        Ok(result)
    }
}
