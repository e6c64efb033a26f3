use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use hfs_core::{HfsClient, Session};
use hfs_sync::sync::paths::normalize_remote;
use hfs_sync::{
    ConflictPolicy, DirectoryEnsurer, OutcomeKind, ProgressEvent, RemoteExistenceOracle,
    SyncConfig, SyncEngine, TransferOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "hfs-sync", version, about = "Mirror local folders onto an HFS server")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Server URL, overrides HFS_URL and HFS_DOMAIN
    #[arg(long, global = true)]
    url: Option<String>,

    /// Login name, overrides HFS_USER
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a local directory tree
    Sync {
        local: PathBuf,
        /// Remote folder, defaults to HFS_REMOTE_ROOT
        remote: Option<String>,
        /// What to do with files already on the server: skip or overwrite
        #[arg(long)]
        policy: Option<ConflictPolicy>,
        /// Files uploaded at once
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Upload into a folder named after the local directory
        #[arg(long)]
        nest: bool,
    },
    /// Upload a single file, by default to /<file name>
    Upload {
        local: PathBuf,
        /// Remote file path
        remote: Option<String>,
        #[arg(long)]
        policy: Option<ConflictPolicy>,
    },
    /// List a remote folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a remote folder and its missing parents
    Mkdir { path: String },
    /// Delete a remote file or folder
    Rm {
        path: String,
        /// Allow deleting the server root
        #[arg(long)]
        force: bool,
    },
    /// Move remote entries into a folder
    Mv {
        #[arg(required = true)]
        from: Vec<String>,
        #[arg(long)]
        to: String,
    },
    /// Rename a remote entry in place
    Rename { path: String, new_name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = SyncConfig::from_env().context("invalid HFS_* environment")?;
    if let Some(url) = cli.url {
        config.server_url = Some(url);
    }
    if let Some(user) = cli.user {
        config.user = Some(user);
    }

    let client = HfsClient::with_config(config.server_url()?, config.client_config())
        .context("failed to build HFS client")?;
    let session = match config.credentials() {
        Some((user, password)) => client
            .login(user, password)
            .await
            .with_context(|| format!("login as {user} failed"))?,
        None => Session::anonymous(),
    };

    match cli.command {
        Command::Sync {
            local,
            remote,
            policy,
            jobs,
            nest,
        } => {
            let mut options = config.sync_options();
            if let Some(jobs) = jobs {
                options.concurrency = jobs.max(1);
            }
            options.nest_under_root_name |= nest;
            let remote = remote.unwrap_or_else(|| config.remote_root.clone());
            let policy = policy.unwrap_or(config.policy);

            let engine = SyncEngine::new(client, session)
                .with_options(options)
                .with_cancellation(cancel_on_interrupt())
                .with_progress(Arc::new(|event: &ProgressEvent| {
                    trace!(
                        path = %event.remote_path,
                        sent = event.bytes_sent,
                        total = event.total_bytes,
                        "upload progress"
                    );
                }));
            match engine.sync(&local, &remote, policy).await {
                Ok(outcomes) => {
                    print_outcomes(&outcomes, cli.json)?;
                    let failed = outcomes.iter().filter(|o| !o.success).count();
                    if failed > 0 {
                        anyhow::bail!("{failed} file(s) failed to upload");
                    }
                }
                Err(halted) => {
                    print_outcomes(&halted.outcomes, cli.json)?;
                    return Err(anyhow::Error::new(halted.error).context("sync halted"));
                }
            }
        }
        Command::Upload {
            local,
            remote,
            policy,
        } => {
            let policy = policy.unwrap_or(config.policy);
            let engine = SyncEngine::new(client, session).with_cancellation(cancel_on_interrupt());
            let outcome = engine
                .upload_file(&local, remote.as_deref(), policy)
                .await
                .with_context(|| format!("failed to upload {}", local.display()))?;
            let success = outcome.success;
            print_outcomes(std::slice::from_ref(&outcome), cli.json)?;
            if !success {
                anyhow::bail!("upload rejected by server");
            }
        }
        Command::Ls { path } => {
            let listing = client
                .list_directory(&session, &path)
                .await
                .with_context(|| format!("failed to list {path}"))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for entry in &listing.entries {
                    println!("{entry}");
                }
            }
        }
        Command::Mkdir { path } => {
            let oracle = Arc::new(RemoteExistenceOracle::new(client.clone(), session.clone()));
            let created = DirectoryEnsurer::new(client, session, oracle)
                .ensure(&path)
                .await
                .with_context(|| format!("failed to create {path}"))?;
            info!(path, created, "folder ready");
        }
        Command::Rm { path, force } => {
            check_delete_target(&path, force)?;
            client
                .delete(&session, &path)
                .await
                .with_context(|| format!("failed to delete {path}"))?;
            info!(path, "deleted");
        }
        Command::Mv { from, to } => {
            let sources: Vec<&str> = from.iter().map(String::as_str).collect();
            client
                .move_files(&session, &sources, &to)
                .await
                .with_context(|| format!("failed to move into {to}"))?;
            info!(count = sources.len(), to, "moved");
        }
        Command::Rename { path, new_name } => {
            client
                .rename(&session, &path, &new_name)
                .await
                .with_context(|| format!("failed to rename {path}"))?;
            info!(path, new_name, "renamed");
        }
    }
    Ok(())
}

fn check_delete_target(path: &str, force: bool) -> anyhow::Result<()> {
    let target = normalize_remote(path)?;
    if target == "/" && !force {
        anyhow::bail!("refusing to delete the server root without --force");
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, letting in-flight uploads finish");
            trigger.cancel();
        }
    });
    token
}

fn print_outcomes(outcomes: &[TransferOutcome], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
        return Ok(());
    }
    for outcome in outcomes {
        let label = match outcome.kind {
            OutcomeKind::Uploaded => "uploaded",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Failed => "FAILED",
        };
        match outcome.kind {
            OutcomeKind::Failed => println!(
                "{label:<9} {} ({})",
                outcome.task.remote_path, outcome.message
            ),
            _ => println!("{label:<9} {}", outcome.task.remote_path),
        }
    }
    Ok(())
}
