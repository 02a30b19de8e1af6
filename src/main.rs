use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use dialoguer::{Input, Select};
use humansize::{BINARY, format_size};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;
use tape_deck::{
    CaptureStatus, Config, ConfigError, MediaKind, ProgressEvent, RangeFilter, RunSummary,
    TapeDeckError, TitleRequest, record_title,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Some target failed, or the title could not be resolved
const EXIT_FAILURE: i32 = 1;
/// The run is misconfigured
const EXIT_CONFIG: i32 = 2;
/// The user interrupted the run
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TitleType {
    Movie,
    Tv,
}

impl From<TitleType> for MediaKind {
    fn from(value: TitleType) -> Self {
        match value {
            TitleType::Movie => MediaKind::Movie,
            TitleType::Tv => MediaKind::Tv,
        }
    }
}

/// Record movies and tv episodes from HLS streams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kind of title to record
    #[arg(long = "type", value_enum)]
    title_type: Option<TitleType>,

    /// Catalog identifier of the movie or show
    #[arg(long)]
    tmdb_id: Option<u64>,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,

    /// Path to the ffmpeg executable
    #[arg(long)]
    ffmpeg_path: Option<PathBuf>,

    /// Base output directory [default: current directory]
    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip targets whose output file already exists
    #[arg(long)]
    resume: bool,

    /// First season to record (tv only)
    #[arg(long)]
    season_from: Option<u32>,

    /// Last season to record (tv only)
    #[arg(long)]
    season_to: Option<u32>,

    /// First episode to record within each season (tv only)
    #[arg(long)]
    episode_from: Option<u32>,

    /// Last episode to record within each season (tv only)
    #[arg(long)]
    episode_to: Option<u32>,

    /// Base URL of the stream provider
    #[arg(long)]
    provider_url: Option<String>,

    /// Configuration file [default: platform config dir/tape-deck/config.toml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not read or write the title metadata cache
    #[arg(long)]
    no_cache: bool,
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug {
            "tape_deck=debug,info"
        } else {
            "tape_deck=info,warn"
        })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(debug))
        .init();
}

/// Cancels `cancel` on the first Ctrl-C and exits on the second
fn spawn_interrupt_listener(cancel: CancellationToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Interrupt handling unavailable");
                return;
            }
        };

        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupted, cleaning up (press Ctrl-C again to quit immediately)");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                process::exit(EXIT_INTERRUPTED);
            }
        });
    });
}

/// Layers the command line over the configuration file
fn build_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(url) = &args.provider_url {
        config.provider_url = Some(url.clone());
    }
    if let Some(path) = &args.ffmpeg_path {
        config.ffmpeg_path = path.clone();
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    config.resume |= args.resume;
    config.debug |= args.debug;
    if args.no_cache {
        config.use_cache = false;
    }

    Ok(config)
}

/// Fills in the title type and id, asking for them on a terminal
fn build_request(args: &Args) -> Result<TitleRequest, ConfigError> {
    let interactive = io::stdin().is_terminal();

    let kind = match args.title_type {
        Some(kind) => kind.into(),
        None if interactive => {
            let choice = Select::new()
                .with_prompt("Type")
                .items(&["movie", "tv"])
                .default(0)
                .interact()
                .map_err(|_| ConfigError::MissingValue("--type"))?;
            if choice == 0 { MediaKind::Movie } else { MediaKind::Tv }
        }
        None => missing_argument("--type <TYPE>"),
    };

    let catalog_id = match args.tmdb_id {
        Some(id) => id,
        None if interactive => Input::<u64>::new()
            .with_prompt("TMDB id")
            .interact_text()
            .map_err(|_| ConfigError::MissingValue("--tmdb-id"))?,
        None => missing_argument("--tmdb-id <TMDB_ID>"),
    };

    Ok(TitleRequest {
        catalog_id,
        kind,
        seasons: RangeFilter::new(args.season_from, args.season_to),
        episodes: RangeFilter::new(args.episode_from, args.episode_to),
    })
}

fn missing_argument(name: &str) -> ! {
    Args::command()
        .error(
            ErrorKind::MissingRequiredArgument,
            format!("the following required argument was not provided: {name}"),
        )
        .exit()
}

/// Formats a duration as `HH:MM:SS`
fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::ResolvingTitle { kind, catalog_id } => {
            println!("Resolving {kind} {catalog_id}...");
        }
        ProgressEvent::TitleResolved {
            title,
            year,
            targets,
        } => {
            println!("Found '{title}' ({year}): {targets} target(s) to record\n");
        }
        ProgressEvent::TargetStarted {
            index,
            total,
            label,
        } => {
            println!("[{}/{}] {}", index + 1, total, label);
        }
        ProgressEvent::StreamLocated { .. } => {
            println!("  Stream located, recording...");
        }
        ProgressEvent::Recording { progress, .. } => {
            let percent = progress
                .percent()
                .map(|p| format!(" ({p:.0}%)"))
                .unwrap_or_default();
            let total = progress
                .total
                .map(|t| format!(" / {}", format_clock(t)))
                .unwrap_or_default();
            print!(
                "\r  {}{}{}  {}",
                format_clock(progress.recorded),
                total,
                percent,
                format_size(progress.bytes_written, BINARY)
            );
            let _ = io::stdout().flush();
        }
        ProgressEvent::TargetFinished { status, error, .. } => {
            // Terminates a pending progress line
            print!("\r");
            match status {
                CaptureStatus::Completed => println!("  Done"),
                CaptureStatus::Skipped => println!("  Skipped, output already exists"),
                _ => println!("  Failed: {}", error.unwrap_or_default()),
            }
        }
        ProgressEvent::Interrupted { not_attempted } => {
            println!("\nInterrupted, {not_attempted} target(s) not attempted");
        }
        ProgressEvent::Complete { .. } => {}
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Summary ===");
    println!(
        "Completed: {}  Failed: {}  Skipped: {}",
        summary.completed(),
        summary.failed(),
        summary.skipped()
    );
    if summary.interrupted {
        println!("Not attempted: {}", summary.not_attempted());
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        println!("\nFailed targets:");
        for (target, error) in failures {
            let kind = if error.is_transient() {
                "transient, retry later"
            } else {
                "permanent"
            };
            println!("  {} [{}]: {}", target.label(), kind, error);
        }
    }
}

fn exit_code_for(error: &TapeDeckError) -> i32 {
    if error.is_cancelled() {
        EXIT_INTERRUPTED
    } else if matches!(error, TapeDeckError::Config(_)) {
        EXIT_CONFIG
    } else {
        EXIT_FAILURE
    }
}

fn main() {
    let args = Args::parse();
    let config = build_config(&args);
    init_logging(config.as_ref().map_or(args.debug, |config| config.debug));

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(EXIT_CONFIG);
        }
    };
    let request = match build_request(&args) {
        Ok(request) => request,
        Err(e) => {
            error!("{e}");
            process::exit(EXIT_CONFIG);
        }
    };
    debug!(?config, ?request, "Starting run");

    let cancel = CancellationToken::new();
    spawn_interrupt_listener(cancel.clone());

    match record_title(&config, &request, &cancel, handle_progress_event) {
        Ok(summary) => {
            print_summary(&summary);
            if summary.interrupted {
                process::exit(EXIT_INTERRUPTED);
            }
            if !summary.all_succeeded() {
                process::exit(EXIT_FAILURE);
            }
        }
        Err(e) => {
            error!("{e}");
            process::exit(exit_code_for(&e));
        }
    }
}
