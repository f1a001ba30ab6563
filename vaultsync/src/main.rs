use anyhow::Context;
use async_trait::async_trait;
use drive_core::DriveClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vaultsync::config::AppConfig;
use vaultsync::sync::conflict::{
    ConflictHandler, ConflictInfo, ConflictResolution, PreferSide, Resolutions,
};
use vaultsync::sync::engine::{SyncEngine, SyncReport};
use vaultsync::sync::remote::DriveRemote;
use vaultsync::sync::vault::FsVault;
use vaultsync::token_provider::TokenProvider;

const USAGE: &str = "\
Usage: vaultsync <push|pull|full-push|full-pull> [--prefer local|remote] [--json]
  push        Upload local changes (full push when no snapshots exist yet)
  pull        Apply remote changes, asking about conflicts
  full-push   Make the remote folder mirror the vault
  full-pull   Overwrite the vault with remote content, backing up differences
  --prefer    Resolve every conflict toward one side without asking
  --json      Print the report as JSON";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Push,
    Pull,
    FullPush,
    FullPull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run {
        command: Command,
        prefer: Option<ConflictResolution>,
        json: bool,
    },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut command = None;
    let mut prefer = None;
    let mut json = false;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--json" => json = true,
            "--prefer" => {
                let side = args.next().context("--prefer needs local or remote")?;
                prefer = Some(side.parse::<ConflictResolution>().map_err(anyhow::Error::msg)?);
            }
            "push" | "pull" | "full-push" | "full-pull" if command.is_some() => {
                anyhow::bail!("only one command may be given")
            }
            "push" => command = Some(Command::Push),
            "pull" => command = Some(Command::Pull),
            "full-push" => command = Some(Command::FullPush),
            "full-pull" => command = Some(Command::FullPull),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    match command {
        Some(command) => Ok(CliMode::Run {
            command,
            prefer,
            json,
        }),
        None => Ok(CliMode::Help),
    }
}

/// Asks about each conflict on the terminal. An empty answer, `q` or end of
/// input cancels the whole pull.
struct StdinPrompt;

#[async_trait]
impl ConflictHandler for StdinPrompt {
    async fn resolve(&self, conflicts: &[ConflictInfo]) -> Option<Resolutions> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut answers = Resolutions::new();
        eprintln!("{} conflicting file(s):", conflicts.len());
        for conflict in conflicts {
            let remote_side = if conflict.remote_deleted {
                "deleted remotely"
            } else {
                "changed remotely"
            };
            eprintln!("  {} (changed locally, {remote_side})", conflict.path);
            loop {
                eprint!("  keep [l]ocal or [r]emote, [q] to cancel: ");
                let line = lines.next_line().await.ok().flatten()?;
                let answer = line.trim();
                if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
                    return None;
                }
                match answer.parse::<ConflictResolution>() {
                    Ok(choice) => {
                        answers.insert(conflict.path.clone(), choice);
                        break;
                    }
                    Err(err) => eprintln!("  {err}"),
                }
            }
        }
        Some(answers)
    }
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vaultsync=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn print_summary(report: &SyncReport) {
    println!("{:?} finished", report.mode);
    let sections = [
        ("uploaded", &report.uploaded),
        ("downloaded", &report.downloaded),
        ("deleted locally", &report.deleted_local),
        ("left untracked on remote", &report.untracked_remote),
        ("moved aside on remote", &report.renamed_remote),
        ("backups", &report.backups),
    ];
    for (label, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        println!("{label}: {}", paths.len());
        for path in paths {
            println!("  {path}");
        }
    }
    for conflict in &report.conflicts_resolved {
        println!("conflict {} resolved: kept {}", conflict.path, conflict.resolution);
    }
    if report.skipped > 0 {
        println!("unchanged: {}", report.skipped);
    }
    if !report.committed {
        println!("nothing to do");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let (command, prefer, json) = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        CliMode::Run {
            command,
            prefer,
            json,
        } => (command, prefer, json),
    };
    setup_logging();

    let config = AppConfig::from_env()?;
    let token = TokenProvider::new(config.credentials.clone(), config.oauth_base_url.as_deref())
        .context("invalid oauth configuration")?
        .access_token()
        .await
        .context("failed to obtain access token")?;
    let client = match config.api_base_url.as_deref() {
        Some(url) => DriveClient::with_base_url(url, token, config.folder_id.clone()),
        None => DriveClient::new(token, config.folder_id.clone()),
    }
    .context("invalid remote api configuration")?;

    tokio::fs::create_dir_all(&config.vault_dir)
        .await
        .with_context(|| format!("failed to create vault dir {}", config.vault_dir.display()))?;
    let mut engine = SyncEngine::new(FsVault::new(&config.vault_dir), DriveRemote::new(client));

    let report = match command {
        Command::Push => engine.push(&config.sync).await,
        Command::Pull => match prefer {
            Some(side) => engine.pull(&config.sync, &PreferSide(side)).await,
            None => engine.pull(&config.sync, &StdinPrompt).await,
        },
        Command::FullPush => engine.full_push(&config.sync).await,
        Command::FullPull => engine.full_pull(&config.sync).await,
    }
    .with_context(|| format!("{command:?} failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}
