//! Savepoint - Main entry point
//!
//! Versioned on-save backups with retention and browsing.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use savepoint::browser::{LatestSelector, VersionSelector};
use savepoint::clock::Timestamp;
use savepoint::executor::BackupExecutor;
use savepoint::fs::walker::WalkOptions;
use savepoint::{utils, ArchiveOutcome, BackupService, Config, SaveReport, SavepointError, SourceFile};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the current content of files, or of every file below a directory
    Backup {
        /// Local paths or remote sources (`method:user@host:/path`)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Take the content to store from FILE instead of the source itself
        #[arg(long, value_name = "FILE")]
        content_from: Option<PathBuf>,
    },

    /// List stored versions of a file, oldest first
    List {
        path: String,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all but the newest versions of a file
    Cleanup {
        path: String,

        /// Versions to keep (defaults to backup.keep_count)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Print one stored version of a file
    Open {
        path: String,

        /// Version to open, as `YYYY-MM-DD-HH-MM-SS` or `YYYY-MM-DD HH:MM:SS`
        #[arg(long, conflicts_with = "latest")]
        version: Option<String>,

        /// Open the newest version
        #[arg(long)]
        latest: bool,

        /// Write the content to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Do not print the version header
        #[arg(long)]
        no_header: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("savepoint: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "savepoint v{} (root: {})",
        env!("CARGO_PKG_VERSION"),
        config.backup.root.display()
    );

    if let Command::Config = args.command {
        print!("{}", config.to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let service = Arc::new(BackupService::from_config(&config)?);
    let executor = BackupExecutor::new(service, config.performance.max_concurrent_backups);

    match args.command {
        Command::Backup { paths, content_from } => {
            backup(&executor, &config, &paths, content_from.as_deref()).await
        }
        Command::List { path, json } => list(&executor, &path, json),
        Command::Cleanup { path, keep } => cleanup(&executor, &path, keep).await,
        Command::Open {
            path,
            version,
            latest,
            output,
            no_header,
        } => open(&executor, &path, version.as_deref(), latest, output.as_deref(), no_header),
        Command::Config => Ok(ExitCode::SUCCESS),
    }
}

/// Exit code for an error that reached the top level
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<SavepointError>()
        .map_or(1, SavepointError::exit_code)
}

/// Parse a source argument, anchoring relative local paths at the working
/// directory
fn resolve_source(arg: &str) -> savepoint::Result<SourceFile> {
    let source = SourceFile::parse(arg)?;
    if source.is_remote() {
        return Ok(source);
    }
    let path = Path::new(source.local_path());
    if let Ok(canonical) = path.canonicalize() {
        return Ok(SourceFile::local(canonical));
    }
    if path.is_absolute() {
        return Ok(source);
    }
    let cwd = std::env::current_dir().map_err(|e| SavepointError::io(".", e))?;
    Ok(SourceFile::local(cwd.join(path)))
}

async fn backup(
    executor: &BackupExecutor,
    config: &Config,
    paths: &[String],
    content_from: Option<&Path>,
) -> Result<ExitCode> {
    if content_from.is_some() && paths.len() > 1 {
        return Err(SavepointError::InvalidSource(
            "--content-from takes exactly one source".into(),
        )
        .into());
    }

    let mut worst = 0u8;
    for arg in paths {
        let result = backup_one(executor, config, arg, content_from).await;
        let code = match result {
            Ok(code) => code,
            Err(e) => {
                eprintln!("savepoint: {}: {}", arg, e);
                e.exit_code()
            }
        };
        worst = worst.max(code);
    }
    Ok(ExitCode::from(worst))
}

async fn backup_one(
    executor: &BackupExecutor,
    config: &Config,
    arg: &str,
    content_from: Option<&Path>,
) -> savepoint::Result<u8> {
    let source = resolve_source(arg)?;

    if let Some(file) = content_from {
        let content = std::fs::read(file).map_err(|e| SavepointError::io(file, e))?;
        let report = executor.save_content(source.clone(), content).await?;
        print_report(&source, &report);
        return Ok(0);
    }
    if source.is_remote() {
        return Err(SavepointError::InvalidSource(format!(
            "{} is remote; supply its content with --content-from",
            source
        )));
    }

    let path = PathBuf::from(source.local_path());
    if path.is_dir() {
        let options = WalkOptions::excluding(config.backup.exclude.clone());
        let report = executor.backup_tree(&path, options).await?;
        println!(
            "{}: {} archived, {} skipped, {} failed",
            path.display(),
            report.archived,
            report.skipped,
            report.failed.len()
        );
        if report.cleaned > 0 {
            println!("{}: removed {} old version(s)", path.display(), report.cleaned);
        }
        for (file, error) in &report.failed {
            eprintln!("savepoint: {}: {}", file.display(), error);
        }
        return Ok(if report.failed.is_empty() { 0 } else { 1 });
    }

    let report = executor.save_file(source.clone(), path).await?;
    print_report(&source, &report);
    Ok(0)
}

fn print_report(source: &SourceFile, report: &SaveReport) {
    match &report.outcome {
        ArchiveOutcome::Archived(entry) => {
            println!("{} -> {}", source, entry.storage_path.display())
        }
        ArchiveOutcome::Skipped(reason) => println!("{}: skipped, {}", source, reason),
    }
    if let Some(cleanup) = report.cleanup.as_ref().filter(|c| c.removed > 0) {
        println!("{}: removed {} old version(s)", source, cleanup.removed);
    }
}

fn list(executor: &BackupExecutor, arg: &str, as_json: bool) -> Result<ExitCode> {
    let source = resolve_source(arg)?;
    let entries = executor.service().catalog().list_entries(&source)?;

    if as_json {
        let listing = json!({
            "source": source.to_string(),
            "location": executor.service().location(&source)?.directory,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(ExitCode::SUCCESS);
    }

    if entries.is_empty() {
        eprintln!("No backups of {}", source);
    }
    for entry in &entries {
        println!(
            "{}  {:>10}  {}",
            entry.label(),
            entry.size,
            entry.storage_path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn cleanup(executor: &BackupExecutor, arg: &str, keep: Option<usize>) -> Result<ExitCode> {
    let source = resolve_source(arg)?;
    let keep = keep.unwrap_or_else(|| executor.service().keep_count());
    let report = executor.retain(source.clone(), keep).await?;

    println!("{}: removed {} version(s), kept {}", source, report.removed, report.kept);
    for failure in &report.failed {
        eprintln!(
            "savepoint: could not remove {}: {}",
            failure.entry.storage_path.display(),
            failure.error
        );
    }
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn open(
    executor: &BackupExecutor,
    arg: &str,
    version: Option<&str>,
    latest: bool,
    output: Option<&Path>,
    no_header: bool,
) -> Result<ExitCode> {
    let source = resolve_source(arg)?;
    let browser = executor.service().browser();

    let opened = match (version, latest) {
        (Some(version), _) => {
            let timestamp: Timestamp = version.replace([' ', ':'], "-").parse()?;
            browser.open_with(&source, &VersionSelector(timestamp))?
        }
        (None, true) => browser.open_with(&source, &LatestSelector)?,
        (None, false) => {
            for candidate in browser.candidates(&source)? {
                println!("{}  {}", candidate.entry.timestamp, candidate.label);
            }
            eprintln!("savepoint: choose a version with --version TIMESTAMP or --latest");
            return Ok(ExitCode::from(2));
        }
    };

    match output {
        Some(file) => {
            std::fs::write(file, &opened.content).map_err(|e| SavepointError::io(file, e))?;
            println!("{} ({}) -> {}", opened.original_basename, opened.label, file.display());
        }
        None => {
            let rendered = opened.render(browser.show_header() && !no_header);
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&rendered)?;
            stdout.flush()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
