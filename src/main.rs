//! filecore - list, copy, move and delete across local, archive and network sources.
//!
//! Usage:
//!   fcore ls [URI]               List a directory
//!   fcore stat URI               Show one entry
//!   fcore cp SOURCE... DEST      Copy into a directory
//!   fcore mv SOURCE... DEST      Move into a directory
//!   fcore rm TARGET...           Delete files and directory trees
//!   fcore mkdir URI              Create a directory
//!   fcore touch URI              Create an empty file
//!   fcore rename URI NAME        Rename in place
//!   fcore zip SOURCE... ARCHIVE  Pack into a new zip archive
//!   fcore unzip ARCHIVE... DEST  Unpack zip archives into a directory
//!   fcore --help                 Show help

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use filecore_backend::{BackendRegistry, LoggingMediaIndex};
use filecore_core::{EngineConfig, FileHandle, FileUri};
use filecore_ops::{
    CompressEngine, DeleteEngine, ExtractEngine, OperationComplete, OperationEvent,
    TransferEngine, TransferRequest,
};
use filecore_scan::{ListingEngine, ListingEvent, ListingOptions, SortKey, SortOrder};

#[derive(Parser)]
#[command(
    name = "filecore",
    version,
    about = "Unified file access across local, archive and network sources",
    long_about = "filecore lists, copies, moves and deletes files through one URI-based \
                  interface.\n\nLocal paths and file:// URIs work everywhere; zip:// URIs \
                  browse inside archives."
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Word used for collision names ("name (copy)")
    #[arg(long, global = true)]
    copy_word: Option<String>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = ".")]
        uri: FileUri,

        /// Sort field
        #[arg(short, long, default_value = "name")]
        sort: SortField,

        /// Reverse the sort order
        #[arg(short, long)]
        desc: bool,

        /// Show hidden entries
        #[arg(short, long)]
        all: bool,

        /// Keep only files with this extension (repeatable)
        #[arg(short, long)]
        ext: Vec<String>,

        /// Keep only files whose MIME type starts with this (repeatable)
        #[arg(short, long)]
        mime: Vec<String>,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one entry
    Stat {
        uri: FileUri,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Copy sources into a destination directory
    Cp {
        #[arg(required = true, num_args = 2..)]
        uris: Vec<FileUri>,

        /// Replace existing targets instead of picking "(copy)" names
        #[arg(short, long)]
        overwrite: bool,
    },

    /// Move sources into a destination directory
    Mv {
        #[arg(required = true, num_args = 2..)]
        uris: Vec<FileUri>,

        /// Replace existing targets instead of picking "(copy)" names
        #[arg(short, long)]
        overwrite: bool,
    },

    /// Delete files and directory trees
    Rm {
        #[arg(required = true)]
        targets: Vec<FileUri>,
    },

    /// Create a directory
    Mkdir { uri: FileUri },

    /// Create an empty file
    Touch { uri: FileUri },

    /// Rename a file or directory in place
    Rename { uri: FileUri, name: String },

    /// Pack sources into a new zip archive (last argument)
    Zip {
        #[arg(required = true, num_args = 2..)]
        uris: Vec<FileUri>,
    },

    /// Unpack zip archives into a directory (last argument)
    Unzip {
        #[arg(required = true, num_args = 2..)]
        uris: Vec<FileUri>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortField {
    Uri,
    Name,
    Size,
    Date,
}

impl From<SortField> for SortKey {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Uri => SortKey::Uri,
            SortField::Name => SortKey::Name,
            SortField::Size => SortKey::Size,
            SortField::Date => SortKey::Date,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_ref(), cli.copy_word)?;
    let registry = Arc::new(BackendRegistry::with_defaults(
        Arc::new(LoggingMediaIndex),
        config.protected.clone(),
    ));

    match cli.command {
        Command::Ls {
            uri,
            sort,
            desc,
            all,
            ext,
            mime,
            timeout,
            format,
        } => {
            let mut builder = ListingOptions::builder();
            builder
                .extensions(ext)
                .mime_prefixes(mime)
                .sort(SortOrder::new(sort.into(), desc))
                .keep_hidden(all);
            if let Some(seconds) = timeout {
                builder.timeout(Duration::from_secs_f64(seconds));
            }
            let options = builder.build().context("Invalid listing options")?;
            run_ls(registry, uri, options, format).await?;
        }
        Command::Stat { uri, format } => {
            let handle = tokio::task::spawn_blocking(move || registry.resolve(&uri)).await??;
            match format {
                OutputFormat::Text => print_entry(&handle),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&handle)?),
            }
        }
        Command::Cp { uris, overwrite } => {
            let (sources, destination) = split_destination(uris)?;
            let request = TransferRequest::copy(sources, destination).with_overwrite(overwrite);
            run_transfer(registry, config, request).await?;
        }
        Command::Mv { uris, overwrite } => {
            let (sources, destination) = split_destination(uris)?;
            let request = TransferRequest::cut(sources, destination).with_overwrite(overwrite);
            run_transfer(registry, config, request).await?;
        }
        Command::Rm { targets } => {
            let mut engine = DeleteEngine::new(registry, config);
            let Some(events) = engine.start(targets) else {
                bail!("A delete is already running");
            };
            report(drain(events).await?)?;
        }
        Command::Mkdir { uri } => {
            let created = filecore_ops::create_directory(registry, uri).await?;
            println!("{created}");
        }
        Command::Touch { uri } => {
            let created = filecore_ops::create_file(registry, uri).await?;
            println!("{created}");
        }
        Command::Rename { uri, name } => {
            let renamed =
                filecore_ops::rename(registry, config.protected.clone(), uri, name).await?;
            println!("{renamed}");
        }
        Command::Zip { uris } => {
            let (sources, archive) = split_destination(uris)?;
            let mut engine = CompressEngine::new(registry, config);
            let Some(events) = engine.start(sources, archive) else {
                bail!("A compression is already running");
            };
            report(drain(events).await?)?;
        }
        Command::Unzip { uris } => {
            let (archives, destination) = split_destination(uris)?;
            let mut engine = ExtractEngine::new(registry, config);
            let Some(events) = engine.start(archives, destination) else {
                bail!("An extraction is already running");
            };
            report(drain(events).await?)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file (if any) and apply command-line overrides.
fn load_config(path: Option<&PathBuf>, copy_word: Option<String>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .wrap_err_with(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(word) = copy_word {
        config.copy_word = word;
    }
    config.validate()?;
    Ok(config)
}

/// Last URI is the destination directory, the rest are sources.
fn split_destination(mut uris: Vec<FileUri>) -> Result<(Vec<FileUri>, FileUri)> {
    let Some(destination) = uris.pop() else {
        bail!("Missing destination");
    };
    if uris.is_empty() {
        bail!("Missing source");
    }
    Ok((uris, destination))
}

async fn run_ls(
    registry: Arc<BackendRegistry>,
    uri: FileUri,
    options: ListingOptions,
    format: OutputFormat,
) -> Result<()> {
    let mut engine = ListingEngine::new(registry);
    let Some(mut events) = engine.start(uri.clone(), options) else {
        bail!("A listing is already running");
    };

    while let Some(event) = events.recv().await {
        match event {
            ListingEvent::Started => tracing::debug!(%uri, "listing"),
            ListingEvent::Update(entries) => match format {
                OutputFormat::Text => entries.iter().for_each(print_entry),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            },
            ListingEvent::End => break,
            ListingEvent::TimedOut => bail!("Listing {uri} timed out"),
            ListingEvent::CredentialRequired(error) => {
                return Err(error).wrap_err("Credentials are required");
            }
            ListingEvent::FatalError { error, kind } => {
                return Err(error).wrap_err(kind.message());
            }
        }
    }
    Ok(())
}

async fn run_transfer(
    registry: Arc<BackendRegistry>,
    config: EngineConfig,
    request: TransferRequest,
) -> Result<()> {
    let mut engine = TransferEngine::new(registry, config);
    let Some(events) = engine.start(request) else {
        bail!("A transfer is already running");
    };
    report(drain(events).await?)
}

/// Follow an operation until its terminal event.
async fn drain(mut events: mpsc::Receiver<OperationEvent>) -> Result<OperationComplete> {
    let mut total = 0;
    while let Some(event) = events.recv().await {
        match event {
            OperationEvent::Started { operation } => tracing::info!(%operation, "started"),
            OperationEvent::FilesListUpdate {
                total_bytes,
                total_files,
                ..
            } => {
                total = total_bytes;
                eprintln!("{} files, {}", total_files, format_size(total_bytes));
            }
            OperationEvent::Progress(progress) if !progress.file_done => {
                let speed = progress
                    .speed
                    .map(|s| format!(" ({}/s)", format_size(s as u64)))
                    .unwrap_or_default();
                tracing::debug!(
                    "{} / {}{}",
                    format_size(progress.total_bytes),
                    format_size(total),
                    speed
                );
            }
            OperationEvent::Progress(_) => {}
            OperationEvent::Success { uri } => println!("{uri}"),
            OperationEvent::Finished(complete) => return Ok(complete),
            OperationEvent::Cancelled => bail!("Operation cancelled"),
            OperationEvent::FatalError { error } => {
                return Err(error).wrap_err("Operation failed");
            }
        }
    }
    bail!("Operation ended without a result")
}

fn report(complete: OperationComplete) -> Result<()> {
    eprintln!("{}", complete.summary());
    for error in &complete.errors {
        eprintln!("  {error}");
    }
    if !complete.is_success() {
        bail!("{} item(s) failed", complete.failed);
    }
    Ok(())
}

/// Print one entry as a listing line.
fn print_entry(handle: &FileHandle) {
    let marker = if handle.is_dir() {
        "d"
    } else if handle.is_shortcut() {
        "l"
    } else {
        "-"
    };
    let size = if handle.is_dir() {
        "-".to_string()
    } else {
        format_size(handle.length())
    };
    let modified = handle
        .modified
        .map(format_time)
        .unwrap_or_else(|| "-".to_string());
    let suffix = if handle.is_dir() { "/" } else { "" };

    println!(
        "{} {:>10}  {:<16}  {}{}",
        marker, size, modified, handle.name, suffix
    );
}

/// Format a timestamp in local time.
fn format_time(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Local>::from(time)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
