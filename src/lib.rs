//! tape-deck - Record movies and tv episodes from HLS streams
//!
//! This library resolves a catalog title into an ordered list of recording
//! targets, locates the stream of each target at a provider and records it
//! into a local file with ffmpeg, one target after another.

mod batch;
mod cache;
mod capture;
mod config;
mod file_operations;
mod http;
mod metadata_retrieval;
mod provider;
mod resolver;
mod temp;

use cache::CacheStorage;
use capture::FfmpegRecorder;
use metadata_retrieval::{CachedMetadataProvider, MetadataProvider, TmdbProvider};
use provider::EmbedProvider;
use resolver::MetadataResolver;

// Re-export error types
pub use batch::TargetError;
pub use cache::CacheError;
pub use capture::CaptureError;
pub use config::ConfigError;
pub use file_operations::FileOperationError;
pub use http::HttpError;
pub use metadata_retrieval::MetadataRetrievalError;
pub use provider::ResolutionError;
pub use resolver::ResolveError;

pub use batch::{BatchController, CaptureAttempt, RunSummary, TargetOutcome};
pub use capture::{CaptureEngine, CaptureProgress, CaptureResult, CaptureStatus, Recorder};
pub use config::{
    Config, MediaKind, RangeFilter, TitleRequest, default_config_path, locate_executable,
};
pub use http::{HttpClient, RetryPolicy};
pub use metadata_retrieval::{TitleMetadata, UNKNOWN_YEAR};
pub use provider::{EpisodeListing, StreamLocator};

// Re-export file operations types
pub use file_operations::{format_filename, part_path, sanitize_filename};

use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a target records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Movie,
    /// One episode; season and episode are both at least 1
    Episode { season: u32, episode: u32 },
}

/// One unit of work: a movie or a single episode
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTarget {
    pub kind: TargetKind,
    /// Catalog identifier of the movie or show
    pub catalog_id: u64,
    pub title: String,
    pub year: String,
    /// Destination of the recording, unique within a run
    pub output_path: PathBuf,
}

impl MediaTarget {
    /// Short human readable name, e.g. `Dark S01E02` or `Alien (1979)`
    pub fn label(&self) -> String {
        match self.kind {
            TargetKind::Movie => format!("{} ({})", self.title, self.year),
            TargetKind::Episode { season, episode } => {
                format!("{} S{season:02}E{episode:02}", self.title)
            }
        }
    }
}

/// Progress event emitted during a run
///
/// These events allow library users to track progress and provide feedback
/// while titles are resolved and recorded.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Looking up the title at the provider and the catalog
    ResolvingTitle { kind: MediaKind, catalog_id: u64 },

    /// Target list built
    TitleResolved {
        title: String,
        year: String,
        targets: usize,
    },

    /// Processing of a target begins
    TargetStarted {
        index: usize,
        total: usize,
        label: String,
    },

    /// The stream of the current target was found
    StreamLocated { label: String },

    /// The recording of the current target advanced
    Recording {
        label: String,
        progress: CaptureProgress,
    },

    /// A target reached its final status
    TargetFinished {
        index: usize,
        total: usize,
        label: String,
        status: CaptureStatus,
        error: Option<String>,
    },

    /// The user interrupted the run
    Interrupted { not_attempted: usize },

    /// All targets processed (or the run was interrupted)
    Complete {
        completed: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Top-level error type for a run
///
/// Per-target failures never show up here; they are part of the
/// [`RunSummary`].
#[derive(Debug, Error)]
pub enum TapeDeckError {
    /// The run is misconfigured
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The requested title could not be turned into targets
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// The HTTP client could not be set up
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

impl TapeDeckError {
    /// True if the run was stopped by a user interrupt
    pub fn is_cancelled(&self) -> bool {
        match self {
            TapeDeckError::Resolve(ResolveError::Resolution(e)) => e.is_cancelled(),
            TapeDeckError::Http(e) => matches!(e, HttpError::Cancelled),
            _ => false,
        }
    }
}

/// Resolves a title and records all of its targets
///
/// The configuration and request are validated before any request is sent.
/// Title metadata lookups are cached on disk unless `config.use_cache` is
/// off. Progress events are emitted through the provided callback.
///
/// # Arguments
///
/// * `config` - Run configuration
/// * `request` - The catalog title and optional season/episode bounds
/// * `cancel` - Process-wide interrupt signal
/// * `progress_callback` - Closure called with progress events
///
/// # Returns
///
/// The summary of the batch, including partial results after an interrupt.
///
/// # Examples
///
/// ```no_run
/// use tape_deck::{Config, MediaKind, ProgressEvent, RangeFilter, TitleRequest, record_title};
/// use tokio_util::sync::CancellationToken;
///
/// let mut config = Config::default();
/// config.provider_url = Some("https://provider.example".to_string());
///
/// let request = TitleRequest {
///     catalog_id: 70523,
///     kind: MediaKind::Tv,
///     seasons: RangeFilter::new(Some(1), Some(1)),
///     episodes: RangeFilter::default(),
/// };
///
/// let summary = record_title(&config, &request, &CancellationToken::new(), |event| {
///     if let ProgressEvent::TargetStarted { index, total, label } = event {
///         println!("[{}/{}] {}", index + 1, total, label);
///     }
/// })
/// .unwrap();
///
/// println!("{} completed", summary.completed());
/// ```
pub fn record_title<F>(
    config: &Config,
    request: &TitleRequest,
    cancel: &CancellationToken,
    mut progress_callback: F,
) -> Result<RunSummary, TapeDeckError>
where
    F: FnMut(ProgressEvent),
{
    request.validate()?;
    let provider_url = config.validate()?;
    let ffmpeg = locate_executable(&config.ffmpeg_path)
        .ok_or_else(|| ConfigError::MissingExecutable(config.ffmpeg_path.clone()))?;

    let client = HttpClient::new(
        &config.user_agent,
        config.request_timeout,
        config.retry.clone(),
        cancel.clone(),
    )?;

    progress_callback(ProgressEvent::ResolvingTitle {
        kind: request.kind,
        catalog_id: request.catalog_id,
    });

    let tmdb = TmdbProvider::new(
        client.clone(),
        &config.metadata_url,
        &config.metadata_language,
    );
    let metadata: Box<dyn MetadataProvider> = if config.use_cache {
        match CacheStorage::open("metadata", Some(config.metadata_cache_ttl)) {
            Ok(cache) => Box::new(CachedMetadataProvider::new(tmdb, cache)),
            Err(e) => {
                warn!(error = %e, "Metadata cache unavailable, continuing without it");
                Box::new(tmdb)
            }
        }
    } else {
        Box::new(tmdb)
    };

    let resolver = MetadataResolver::new(
        EmbedProvider::new(client.clone(), &provider_url, &config.catalog_language),
        metadata,
        &config.output_dir,
    );
    let (title, targets) = resolver.resolve(
        request.catalog_id,
        request.kind,
        request.seasons,
        request.episodes,
    )?;

    info!(title = %title.title, year = %title.year, targets = targets.len(), "Title resolved");
    progress_callback(ProgressEvent::TitleResolved {
        title: title.title,
        year: title.year,
        targets: targets.len(),
    });

    let controller = BatchController::new(
        EmbedProvider::new(client, &provider_url, &config.catalog_language),
        CaptureEngine::new(FfmpegRecorder::new(&ffmpeg, &config.user_agent)),
        cancel.clone(),
        config.pause_between_targets,
    );
    let summary = controller.run(targets, config.resume, &mut progress_callback);

    progress_callback(ProgressEvent::Complete {
        completed: summary.completed(),
        failed: summary.failed(),
        skipped: summary.skipped(),
    });

    Ok(summary)
}
