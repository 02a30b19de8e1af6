//! Run configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! command line flags. [`Config::validate`] rejects anything that would make
//! the whole run fail before a single request is sent.

use crate::http::RetryPolicy;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that abort a run before any target is processed
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The capture executable could not be located
    #[error("Capture executable not found: {0}")]
    MissingExecutable(PathBuf),

    /// A season or episode range is malformed
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// No provider endpoint was configured
    #[error("No provider URL configured (use --provider-url or set provider_url in the config file)")]
    MissingProviderUrl,

    /// A configured URL could not be parsed
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Failed to read the configuration file
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file
    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A required value was neither given nor could be asked for
    #[error("Missing required value: {0}")]
    MissingValue(&'static str),
}

/// The kind of title to record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// A single movie
    Movie,
    /// A tv show, recorded episode by episode
    Tv,
}

impl MediaKind {
    /// Path segment used by the catalog and provider endpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range filter with optional open ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeFilter {
    pub from: Option<u32>,
    pub to: Option<u32>,
}

impl RangeFilter {
    pub fn new(from: Option<u32>, to: Option<u32>) -> Self {
        Self { from, to }
    }

    /// True if neither bound is set
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, value: u32) -> bool {
        self.from.is_none_or(|from| value >= from) && self.to.is_none_or(|to| value <= to)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.from == Some(0) || self.to == Some(0) {
            return Err(ConfigError::InvalidRange(format!(
                "{name} numbers start at 1"
            )));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ConfigError::InvalidRange(format!(
                    "{name} range {from}..={to} is empty"
                )));
            }
        }
        Ok(())
    }
}

/// What to record: one catalog title plus optional season/episode bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRequest {
    pub catalog_id: u64,
    pub kind: MediaKind,
    pub seasons: RangeFilter,
    pub episodes: RangeFilter,
}

impl TitleRequest {
    /// Checks that range bounds are sensible for the requested kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == MediaKind::Movie
            && !(self.seasons.is_unbounded() && self.episodes.is_unbounded())
        {
            return Err(ConfigError::InvalidRange(
                "season and episode bounds only apply to tv shows".to_string(),
            ));
        }
        self.seasons.validate("season")?;
        self.episodes.validate("episode")?;
        Ok(())
    }
}

/// Complete configuration for one run
#[derive(Debug, Clone)]
pub struct Config {
    /// Base endpoint of the stream provider
    pub provider_url: Option<String>,
    /// Base URL of the catalog web site used for titles and years
    pub metadata_url: String,
    /// Location of the external capture executable
    pub ffmpeg_path: PathBuf,
    /// Base directory for recorded files
    pub output_dir: PathBuf,
    /// Skip targets whose output file already exists
    pub resume: bool,
    /// Verbose logging and capture output
    pub debug: bool,
    /// Language parameter for the provider catalog listing
    pub catalog_language: String,
    /// Language parameter for title metadata
    pub metadata_language: String,
    pub user_agent: String,
    /// Per-attempt HTTP timeout
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Pause between two consecutive targets
    pub pause_between_targets: Duration,
    /// Lifetime of cached title metadata
    pub metadata_cache_ttl: Duration,
    pub use_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_url: None,
            metadata_url: "https://www.themoviedb.org".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            output_dir: PathBuf::from("."),
            resume: false,
            debug: false,
            catalog_language: "it".to_string(),
            metadata_language: "en-US".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            pause_between_targets: Duration::from_millis(400),
            metadata_cache_ttl: Duration::from_secs(24 * 60 * 60),
            use_cache: true,
        }
    }
}

/// On-disk representation of the configuration file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    provider_url: Option<String>,
    metadata_url: Option<String>,
    ffmpeg_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    catalog_language: Option<String>,
    metadata_language: Option<String>,
    user_agent: Option<String>,
    request_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    pause_between_targets_ms: Option<u64>,
    metadata_cache_ttl_secs: Option<u64>,
}

impl Config {
    /// Loads defaults overlaid with the given file, or the default config file
    ///
    /// An explicitly given file must exist. The default location
    /// (`<config dir>/tape-deck/config.toml`) is only read if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };

        if let Some(path) = path {
            let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            config.apply_toml(&content, &path)?;
        }

        Ok(config)
    }

    fn apply_toml(&mut self, content: &str, path: &Path) -> Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        if file.provider_url.is_some() {
            self.provider_url = file.provider_url;
        }
        if let Some(v) = file.metadata_url {
            self.metadata_url = v;
        }
        if let Some(v) = file.ffmpeg_path {
            self.ffmpeg_path = v;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = file.catalog_language {
            self.catalog_language = v;
        }
        if let Some(v) = file.metadata_language {
            self.metadata_language = v;
        }
        if let Some(v) = file.user_agent {
            self.user_agent = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.max_retries {
            self.retry.max_retries = v;
        }
        if let Some(v) = file.retry_base_delay_ms {
            self.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.retry_max_delay_ms {
            self.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.pause_between_targets_ms {
            self.pause_between_targets = Duration::from_millis(v);
        }
        if let Some(v) = file.metadata_cache_ttl_secs {
            self.metadata_cache_ttl = Duration::from_secs(v);
        }
        Ok(())
    }

    /// Checks everything that would make the whole run fail
    ///
    /// Returns the parsed provider base URL on success.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let provider = self
            .provider_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingProviderUrl)?;
        let provider = parse_url(provider)?;
        parse_url(&self.metadata_url)?;

        if locate_executable(&self.ffmpeg_path).is_none() {
            return Err(ConfigError::MissingExecutable(self.ffmpeg_path.clone()));
        }

        Ok(provider)
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Default configuration file location
///
/// - Linux: ~/.config/tape-deck/config.toml
/// - macOS: ~/Library/Application Support/tape-deck/config.toml
/// - Windows: %APPDATA%\tape-deck\config\config.toml
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tape-deck")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Resolves an executable either as an explicit path or by searching `PATH`
///
/// Only files the current user may execute are accepted.
pub fn locate_executable(program: &Path) -> Option<PathBuf> {
    which::which(program).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_range_filter_contains() {
        let both = RangeFilter::new(Some(2), Some(4));
        assert!(!both.contains(1));
        assert!(both.contains(2));
        assert!(both.contains(4));
        assert!(!both.contains(5));

        let open_end = RangeFilter::new(Some(3), None);
        assert!(open_end.contains(99));
        assert!(!open_end.contains(2));

        assert!(RangeFilter::default().contains(1));
    }

    #[test]
    fn test_title_request_rejects_inverted_range() {
        let request = TitleRequest {
            catalog_id: 1,
            kind: MediaKind::Tv,
            seasons: RangeFilter::new(Some(3), Some(1)),
            episodes: RangeFilter::default(),
        };
        assert_matches!(request.validate(), Err(ConfigError::InvalidRange(_)));
    }

    #[test]
    fn test_title_request_rejects_zero_bound() {
        let request = TitleRequest {
            catalog_id: 1,
            kind: MediaKind::Tv,
            seasons: RangeFilter::default(),
            episodes: RangeFilter::new(Some(0), None),
        };
        assert_matches!(request.validate(), Err(ConfigError::InvalidRange(_)));
    }

    #[test]
    fn test_title_request_rejects_ranges_for_movies() {
        let request = TitleRequest {
            catalog_id: 1,
            kind: MediaKind::Movie,
            seasons: RangeFilter::new(Some(1), Some(1)),
            episodes: RangeFilter::default(),
        };
        assert_matches!(request.validate(), Err(ConfigError::InvalidRange(_)));
    }

    #[test]
    fn test_load_overlays_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "provider_url = \"https://provider.example\"\nmax_retries = 7\npause_between_targets_ms = 0\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.provider_url.as_deref(), Some("https://provider.example"));
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.pause_between_targets, Duration::ZERO);
        assert_eq!(config.catalog_language, "it");
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provdier_url = \"typo\"\n").unwrap();

        assert_matches!(Config::load(Some(&path)), Err(ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = Config::load(Some(Path::new("/nonexistent/tape-deck.toml")));
        assert_matches!(result, Err(ConfigError::ReadFailed { .. }));
    }

    #[test]
    fn test_validate_requires_provider_url() {
        let config = Config::default();
        assert_matches!(config.validate(), Err(ConfigError::MissingProviderUrl));
    }

    #[test]
    fn test_validate_detects_missing_executable() {
        let config = Config {
            provider_url: Some("https://provider.example".to_string()),
            ffmpeg_path: PathBuf::from("/nonexistent/bin/ffmpeg"),
            ..Config::default()
        };
        assert_matches!(config.validate(), Err(ConfigError::MissingExecutable(_)));
    }

    /// Writes a file named `ffmpeg` with the given unix mode
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let exe = dir.join("ffmpeg");
        fs::write(&exe, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(mode)).unwrap();
        exe
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_accepts_existing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_ffmpeg(dir.path(), 0o755);

        let config = Config {
            provider_url: Some("https://provider.example/".to_string()),
            ffmpeg_path: exe,
            ..Config::default()
        };
        let url = config.validate().unwrap();
        assert_eq!(url.host_str(), Some("provider.example"));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_non_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_ffmpeg(dir.path(), 0o644);

        let config = Config {
            provider_url: Some("https://provider.example/".to_string()),
            ffmpeg_path: exe,
            ..Config::default()
        };
        assert_matches!(config.validate(), Err(ConfigError::MissingExecutable(_)));
    }

    #[test]
    fn test_locate_executable_explicit_path() {
        assert!(locate_executable(Path::new("/nonexistent/ffmpeg")).is_none());
    }
}
