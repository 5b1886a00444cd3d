//! Deployer - 目录差异部署工具
//!
//! Usage:
//! - Deploy the selected configuration: `deployer`
//! - Deploy a named configuration: `deployer --item web`
//! - Show what would be copied: `deployer --item web --preview`
//! - List configurations: `deployer --list`

use anyhow::{anyhow, bail, Context};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use deployer::config::env::constants::VERSION;
use deployer::config::{ConfigStore, EnvConfig};
use deployer::domain::{
    Configuration, ConfigurationItem, DeployEvent, DeployOutcome, FileViewMode, RunSummary,
};
use deployer::infra::LocalFileSystem;
use deployer::services::deploy::{DeploySettings, Deployer};
use deployer::services::diff::{diff, Side};
use deployer::state::{trigger_shutdown, AppState};

/// 命令行参数
#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<PathBuf>,
    item: Option<String>,
    preview: bool,
    view: Option<FileViewMode>,
    no_chain: bool,
    list: bool,
}

/// 解析命令行参数
fn parse_args() -> anyhow::Result<CliArgs> {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                cli.config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--item" if i + 1 < args.len() => {
                cli.item = Some(args[i + 1].clone());
                i += 2;
            }
            "--view" if i + 1 < args.len() => {
                let view = FileViewMode::parse(&args[i + 1])
                    .ok_or_else(|| anyhow!("Unknown view '{}'", args[i + 1]))?;
                cli.view = Some(view);
                i += 2;
            }
            "--preview" => {
                cli.preview = true;
                i += 1;
            }
            "--no-chain" => {
                cli.no_chain = true;
                i += 1;
            }
            "--list" => {
                cli.list = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => bail!("Unknown argument '{}'", other),
        }
    }

    Ok(cli)
}

fn print_help() {
    println!("Deployer {VERSION}");
    println!();
    println!("USAGE:");
    println!("    deployer [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>    Configuration file (default: $DEPLOYER_CONFIG)");
    println!("    --item <NAME>      Configuration to deploy (default: the selected one)");
    println!("    --preview          Show the diff instead of deploying");
    println!("    --view <VIEW>      Preview filter: all, pending, excluded");
    println!("    --no-chain         Do not follow the next configuration");
    println!("    --list             List configurations");
    println!("    -h, --help         Print help information");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deployer=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = parse_args()?;
    init_tracing();

    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    let code = rt.block_on(run(cli))?;
    std::process::exit(code);
}

async fn run(cli: CliArgs) -> anyhow::Result<i32> {
    let mut env = EnvConfig::from_env();
    if let Some(path) = cli.config_path.clone() {
        env.config_path = path;
    }

    let store = ConfigStore::new(env.config_path.clone());
    let config = store.load().await?;

    if cli.list {
        list_items(&config);
        return Ok(0);
    }

    let item = match &cli.item {
        Some(name) => config
            .item_by_name(name)
            .ok_or_else(|| anyhow!("No configuration named '{}'", name))?,
        None => config
            .selected_item()
            .ok_or_else(|| anyhow!("{} has no configurations", env.config_path.display()))?,
    };

    if cli.preview {
        preview(&config, item, cli.view.unwrap_or(FileViewMode::Pending))?;
        return Ok(0);
    }

    let deployer = Deployer::local(DeploySettings::from(&env));
    let state = AppState::new(env);

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            trigger_shutdown();
        }
    });

    let mut ctx = state.begin_run(&item.name).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.events = Some(tx);
    let printer = tokio::spawn(print_events(rx));

    let summary = if cli.no_chain {
        let mut summary = RunSummary::default();
        match deployer.prepare(&config, item.id).await {
            Ok(prepared) => match deployer.deploy(&prepared, &ctx).await {
                Ok(report) => summary.push(report),
                Err(e) => summary.abort(e.to_string()),
            },
            Err(e) => summary.abort(e.to_string()),
        }
        summary
    } else {
        deployer.deploy_chain(&config, item.id, &ctx).await
    };

    let run_id = ctx.run_id;
    drop(ctx);
    let _ = printer.await;
    state.finish_run(run_id, &summary).await;

    print_summary(&summary);
    Ok(if summary.outcome().is_success() { 0 } else { 1 })
}

fn list_items(config: &Configuration) {
    for (index, item) in config.items.iter().enumerate() {
        let marker = if index == config.selected_index { "*" } else { " " };
        let next = item
            .policy
            .next_configuration()
            .and_then(|id| config.item(id))
            .map(|next| format!(" -> {}", next.name))
            .unwrap_or_default();
        let disabled = if item.policy.enabled { "" } else { " (disabled)" };
        println!("{marker} {}{disabled}{next}", item.name);
    }
}

fn preview(config: &Configuration, item: &ConfigurationItem, view: FileViewMode) -> anyhow::Result<()> {
    let fs = LocalFileSystem::new();
    for pairing in item.pairings(&config.path_variables) {
        println!("{}", pairing.short_name());
        let entries = diff(
            &fs,
            &pairing.left,
            &pairing.right,
            Side::Left,
            &item.policy,
            view,
        )?;
        if entries.is_empty() {
            println!("    (nothing)");
        }
        for entry in entries {
            let state = if entry.excluded {
                "excluded"
            } else if entry.other {
                "right only"
            } else if entry.overwrite {
                "newer"
            } else if entry.get_overwritten {
                "older"
            } else if entry.has_other {
                "in sync"
            } else {
                "left only"
            };
            println!("    {:<10} {:<6} {}", state, entry.kind(), entry.name);
        }
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<DeployEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            DeployEvent::Progress(progress) => match progress.percent_complete {
                Some(percent) => println!("[{:>5.1}%] {}: {}", percent, progress.step, progress.details),
                None => println!("         {}: {}", progress.step, progress.details),
            },
            DeployEvent::Error(report) => eprintln!("error: {}", report.summary_line()),
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    for report in &summary.reports {
        println!(
            "{}: {} copied, {} skipped, {} errors{}",
            report.item_name,
            report.files_copied,
            report.files_skipped,
            report.error_count(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        if !report.stopped_services.is_empty() {
            println!("    stopped services: {}", report.stopped_services.join(", "));
        }
        for path in &report.killed_processes {
            println!("    killed: {}", path.display());
        }
    }
    match summary.outcome() {
        DeployOutcome::NoErrors => println!("Deployment succeeded"),
        DeployOutcome::HandledErrors { count, details } => {
            println!("Deployment finished with {count} error(s):");
            println!("{details}");
        }
        DeployOutcome::Aborted { reason } => println!("Deployment aborted: {reason}"),
    }
}
