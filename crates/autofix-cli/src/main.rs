//! `autofix` command line
//!
//! Maintenance entry points that need no model or scanner:
//! - `sandbox run`: evaluate a file in the configured sandbox
//! - `backup create|list|rollback|gc`: workspace snapshots
//! - `learning stats|history|cleanup|finetune-status`: learning store upkeep
//! - `config check`: validate and print the effective configuration

use anyhow::{bail, Context};
use autofix_core::AutofixConfig;
use autofix_learning::{ContinuousLearningService, UnavailableTrainer};
use autofix_sandbox::{SandboxTestRunner, TestRequest, TestType};
use autofix_workspace::{BackupStore, WorkspaceLock};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "autofix.toml";

fn cli() -> Command {
    let json = || {
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print JSON instead of text")
    };
    let dir = || {
        Arg::new("dir")
            .default_value(".")
            .value_parser(value_parser!(PathBuf))
            .help("Workspace directory")
    };

    Command::new("autofix")
        .version(autofix_core::VERSION)
        .about("Autonomous code remediation: sandbox, backups, learning")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: ./autofix.toml when present)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("sandbox")
                .about("Sandboxed test runs")
                .subcommand_required(true)
                .subcommand(
                    Command::new("run")
                        .about("Evaluate a file in the sandbox")
                        .arg(
                            Arg::new("file")
                                .required(true)
                                .value_parser(value_parser!(PathBuf))
                                .help("File holding the modified code"),
                        )
                        .arg(
                            Arg::new("original")
                                .long("original")
                                .value_parser(value_parser!(PathBuf))
                                .help("File holding the code before the fix"),
                        )
                        .arg(
                            Arg::new("tests")
                                .long("tests")
                                .value_delimiter(',')
                                .value_parser(value_parser!(TestType))
                                .help("Checks to run, comma separated (default: syntax)"),
                        )
                        .arg(
                            Arg::new("timeout")
                                .long("timeout")
                                .value_parser(value_parser!(u64))
                                .help("Timeout in seconds"),
                        )
                        .arg(json()),
                ),
        )
        .subcommand(
            Command::new("backup")
                .about("Workspace snapshots")
                .subcommand_required(true)
                .subcommand(Command::new("create").about("Snapshot a workspace").arg(dir()))
                .subcommand(
                    Command::new("list")
                        .about("List snapshots, newest first")
                        .arg(dir())
                        .arg(json()),
                )
                .subcommand(
                    Command::new("rollback")
                        .about("Restore a snapshot")
                        .arg(
                            Arg::new("name")
                                .required(true)
                                .help("Backup name, or `latest`"),
                        )
                        .arg(dir())
                        .arg(
                            Arg::new("only")
                                .long("only")
                                .action(ArgAction::Append)
                                .value_parser(value_parser!(PathBuf))
                                .help("Restore only this relative path (repeatable)"),
                        )
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .action(ArgAction::SetTrue)
                                .help("Roll back even while a cycle holds the workspace lock"),
                        ),
                )
                .subcommand(
                    Command::new("gc")
                        .about("Remove blobs no snapshot references")
                        .arg(dir()),
                ),
        )
        .subcommand(
            Command::new("learning")
                .about("Learning store maintenance")
                .subcommand_required(true)
                .subcommand(Command::new("stats").about("Lifetime statistics").arg(json()))
                .subcommand(
                    Command::new("history")
                        .about("Recent model updates")
                        .arg(
                            Arg::new("limit")
                                .long("limit")
                                .default_value("10")
                                .value_parser(value_parser!(usize)),
                        )
                        .arg(json()),
                )
                .subcommand(
                    Command::new("cleanup")
                        .about("Delete old feedback and update records")
                        .arg(
                            Arg::new("days")
                                .long("days")
                                .default_value("30")
                                .value_parser(value_parser!(u32))
                                .help("Days of data to keep"),
                        ),
                )
                .subcommand(
                    Command::new("finetune-status")
                        .about("Whether a model update could start now")
                        .arg(
                            Arg::new("min-examples")
                                .long("min-examples")
                                .value_parser(value_parser!(usize))
                                .help("Samples required (default: learning.batch_size)"),
                        )
                        .arg(json()),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Configuration")
                .subcommand_required(true)
                .subcommand(
                    Command::new("check").about("Validate and print the effective configuration"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AutofixConfig> {
    match path {
        Some(path) => Ok(AutofixConfig::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG).is_file() => {
            Ok(AutofixConfig::from_file(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(AutofixConfig::default()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match run(&matches).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = load_config(matches.get_one::<PathBuf>("config"))?;
    match matches.subcommand() {
        Some(("sandbox", sub)) => match sub.subcommand() {
            Some(("run", args)) => sandbox_run(&config, args).await,
            _ => bail!("unknown sandbox command"),
        },
        Some(("backup", sub)) => backup(&config, sub).map(|()| ExitCode::SUCCESS),
        Some(("learning", sub)) => learning(&config, sub).map(|()| ExitCode::SUCCESS),
        Some(("config", sub)) => match sub.subcommand() {
            Some(("check", _)) => {
                config.validate()?;
                print!("{}", config.to_toml_string()?);
                Ok(ExitCode::SUCCESS)
            }
            _ => bail!("unknown config command"),
        },
        _ => bail!("no command given"),
    }
}

async fn sandbox_run(config: &AutofixConfig, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let file = args
        .get_one::<PathBuf>("file")
        .context("missing file argument")?;
    let modified =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let original = match args.get_one::<PathBuf>("original") {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => modified.clone(),
    };
    let test_types: Vec<TestType> = args
        .get_many::<TestType>("tests")
        .map_or_else(|| vec![TestType::Syntax], |t| t.copied().collect());

    let mut request = TestRequest::new(file, original, modified).with_test_types(test_types);
    if let Some(secs) = args.get_one::<u64>("timeout") {
        request = request.with_timeout(Duration::from_secs(*secs));
    }

    let runner = SandboxTestRunner::new(config.sandbox.clone());
    let result = runner.run_test(request).await;
    if args.get_flag("json") {
        print_json(&result)?;
    } else {
        println!("{}", result.summary());
        if !result.success && !result.stderr.is_empty() {
            eprintln!("{}", result.stderr.trim_end());
        }
    }
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn open_store(config: &AutofixConfig, dir: &Path) -> anyhow::Result<BackupStore> {
    let store = BackupStore::open(config.backup.store_dir(dir), config.backup.max_backups)
        .with_context(|| format!("opening backup store for {}", dir.display()))?;
    Ok(store)
}

fn workspace_arg(args: &ArgMatches) -> anyhow::Result<&PathBuf> {
    args.get_one::<PathBuf>("dir").context("missing workspace argument")
}

fn backup(config: &AutofixConfig, sub: &ArgMatches) -> anyhow::Result<()> {
    match sub.subcommand() {
        Some(("create", args)) => {
            let dir = workspace_arg(args)?;
            let report = open_store(config, dir)?.create_backup(dir)?;
            println!(
                "created {} ({} files, {} bytes, {} new blobs)",
                report.info.name, report.info.file_count, report.info.total_bytes, report.new_blobs
            );
            for name in report.pruned {
                println!("pruned {name}");
            }
        }
        Some(("list", args)) => {
            let dir = workspace_arg(args)?;
            let backups = open_store(config, dir)?.list_backups()?;
            if args.get_flag("json") {
                print_json(&backups)?;
            } else if backups.is_empty() {
                println!("no backups");
            } else {
                for b in backups {
                    println!(
                        "{}  {}  {} files  {} bytes",
                        b.name,
                        b.created_at.to_rfc3339(),
                        b.file_count,
                        b.total_bytes
                    );
                }
            }
        }
        Some(("rollback", args)) => {
            let dir = workspace_arg(args)?;
            let store = open_store(config, dir)?;
            let requested = args.get_one::<String>("name").context("missing backup name")?;
            let name = if requested == "latest" {
                store.latest()?.context("no backups to roll back to")?.name
            } else {
                requested.clone()
            };
            if let (false, Some(holder)) = (args.get_flag("force"), WorkspaceLock::inspect(dir)?) {
                bail!(
                    "workspace is locked by pid {} since {}; pass --force to roll back anyway",
                    holder.pid,
                    holder.locked_at.to_rfc3339()
                );
            }
            let only: Option<Vec<PathBuf>> =
                args.get_many::<PathBuf>("only").map(|paths| paths.cloned().collect());
            let report = store.rollback(&name, dir, only.as_deref())?;
            println!(
                "rolled back to {name}: {} restored, {} removed, {} unchanged",
                report.restored, report.removed, report.unchanged
            );
        }
        Some(("gc", args)) => {
            let dir = workspace_arg(args)?;
            let report = open_store(config, dir)?.collect_garbage()?;
            print_json(&report)?;
        }
        _ => bail!("unknown backup command"),
    }
    Ok(())
}

fn learning(config: &AutofixConfig, sub: &ArgMatches) -> anyhow::Result<()> {
    let service = ContinuousLearningService::open(config.learning.clone(), Arc::new(UnavailableTrainer))
        .with_context(|| format!("opening learning store {}", config.learning.data_dir.display()))?;
    match sub.subcommand() {
        Some(("stats", args)) => {
            let stats = service.learning_statistics();
            if args.get_flag("json") {
                print_json(&stats)?;
            } else {
                let c = &stats.counters;
                println!("model version:   {}", stats.model_version);
                println!(
                    "feedback:        {} collected, {} accepted, {} rejected ({:.1}% accepted)",
                    c.total_collected,
                    c.accepted,
                    c.rejected,
                    stats.acceptance_rate * 100.0
                );
                println!(
                    "replay buffer:   {}/{} ({})",
                    stats.buffer_size,
                    stats.buffer_capacity,
                    if stats.buffer_ready { "ready" } else { "filling" }
                );
                println!(
                    "model updates:   {} completed, {} failed",
                    c.updates_completed, c.updates_failed
                );
            }
        }
        Some(("history", args)) => {
            let limit = args.get_one::<usize>("limit").copied().unwrap_or(10);
            let history = service.update_history(limit)?;
            if args.get_flag("json") {
                print_json(&history)?;
            } else if history.is_empty() {
                println!("no model updates");
            } else {
                for update in history {
                    println!(
                        "{}  {:?}  {} -> {}  {} samples",
                        update.timestamp.to_rfc3339(),
                        update.status,
                        update.previous_version,
                        update.new_version.as_deref().unwrap_or("-"),
                        update.samples_processed
                    );
                }
            }
        }
        Some(("cleanup", args)) => {
            let days = args.get_one::<u32>("days").copied().unwrap_or(30);
            let report = service.cleanup_old_data(days)?;
            println!(
                "removed {} feedback and {} update records older than {days} days",
                report.feedback_removed, report.updates_removed
            );
        }
        Some(("finetune-status", args)) => {
            let min = args
                .get_one::<usize>("min-examples")
                .copied()
                .unwrap_or(config.learning.batch_size);
            let status = service.finetune_status(min);
            if args.get_flag("json") {
                print_json(&status)?;
            } else {
                println!(
                    "{}: {}/{} samples{}{}",
                    if status.ready { "ready" } else { "not ready" },
                    status.available_samples,
                    status.required_samples,
                    if status.update_running { ", update running" } else { "" },
                    status
                        .cooldown_remaining_secs
                        .map(|s| format!(", cooldown {s}s"))
                        .unwrap_or_default(),
                );
            }
        }
        _ => bail!("unknown learning command"),
    }
    Ok(())
}
