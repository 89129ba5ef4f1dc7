use anyhow::Context;
use autosave_core::{AutosaveConfig, BackupStore, DocumentId, FileBackupStore};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;

mod simulate;
mod telemetry;

use simulate::SimulationOptions;

fn cli() -> Command {
    let dir_arg = Arg::new("dir")
        .long("dir")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Backup directory");
    let doc_arg = Arg::new("doc")
        .long("doc")
        .required(true)
        .help("Document identifier");

    Command::new("autosave")
        .version(autosave_core::VERSION)
        .about("Document autosave coordinator")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Type a memo into a session against an in-memory server")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("150")
                        .value_parser(value_parser!(u64))
                        .help("Latency of every remote call"),
                )
                .arg(
                    Arg::new("fail")
                        .long("fail")
                        .default_value("0")
                        .value_parser(value_parser!(u32))
                        .help("Number of remote calls to fail with 503"),
                )
                .arg(
                    Arg::new("conflict")
                        .long("conflict")
                        .action(ArgAction::SetTrue)
                        .help("Write the document from elsewhere mid-session"),
                )
                .arg(
                    Arg::new("offline-at")
                        .long("offline-at")
                        .value_parser(value_parser!(u64))
                        .help("Go offline for three seconds starting at this millisecond"),
                )
                .arg(
                    Arg::new("backup-dir")
                        .long("backup-dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Backup directory (a temporary one by default)"),
                ),
        )
        .subcommand(
            Command::new("backup")
                .about("Inspect the local backup store")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Print the backup record of a document")
                        .arg(dir_arg.clone())
                        .arg(doc_arg.clone()),
                )
                .subcommand(
                    Command::new("clear")
                        .about("Delete the backup record of a document")
                        .arg(dir_arg)
                        .arg(doc_arg),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    telemetry::init(matches.get_flag("log-json"))?;

    match matches.subcommand() {
        Some(("simulate", args)) => run_simulate(args).await,
        Some(("backup", args)) => match args.subcommand() {
            Some(("show", args)) => backup_show(args).await,
            Some(("clear", args)) => backup_clear(args).await,
            _ => unreachable!("subcommand required"),
        },
        _ => unreachable!("subcommand required"),
    }
}

async fn run_simulate(args: &ArgMatches) -> anyhow::Result<()> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => AutosaveConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AutosaveConfig::default(),
    };

    // Keep the temporary directory alive until the run ends.
    let scratch;
    let backup_dir = match args.get_one::<PathBuf>("backup-dir") {
        Some(dir) => dir.clone(),
        None => {
            scratch = tempfile::tempdir()?;
            scratch.path().to_path_buf()
        }
    };

    let options = SimulationOptions {
        config,
        latency: Duration::from_millis(args.get_one::<u64>("latency-ms").copied().unwrap_or(150)),
        failures: args.get_one::<u32>("fail").copied().unwrap_or(0),
        conflict: args.get_flag("conflict"),
        offline_at: args.get_one::<u64>("offline-at").map(|ms| Duration::from_millis(*ms)),
        backup_dir,
    };

    println!("Running autosave simulation...");
    println!("Latency: {}ms", options.latency.as_millis());
    println!("Injected failures: {}", options.failures);
    println!("Conflict: {}", options.conflict);
    println!();

    let report = simulate::run(options).await?;
    report.print()?;

    if !report.converged() {
        anyhow::bail!("server copy does not match the typed text");
    }
    Ok(())
}

async fn open_backup(args: &ArgMatches) -> anyhow::Result<(FileBackupStore, DocumentId)> {
    let dir = args
        .get_one::<PathBuf>("dir")
        .context("--dir is required")?;
    let doc = args
        .get_one::<String>("doc")
        .context("--doc is required")?;
    let store = FileBackupStore::open(dir.clone()).await?;
    Ok((store, DocumentId::new(doc.clone())))
}

async fn backup_show(args: &ArgMatches) -> anyhow::Result<()> {
    let (store, doc) = open_backup(args).await?;
    match store.read(&doc).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("no backup for {doc}"),
    }
    Ok(())
}

async fn backup_clear(args: &ArgMatches) -> anyhow::Result<()> {
    let (store, doc) = open_backup(args).await?;
    store.clear(&doc).await?;
    println!("cleared backup for {doc} in {}", store.dir().display());
    Ok(())
}
