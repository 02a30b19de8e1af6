//! Stream provider access
//!
//! The provider answers two questions: which titles and episodes it carries
//! ([`ProviderCatalog`]) and where the playable stream of one target lives
//! ([`StreamLocator`]). The base endpoint is injected at construction time.

mod api_types;
mod embed;
mod playlist;

pub(crate) use embed::EmbedProvider;

use crate::MediaTarget;
use crate::config::MediaKind;
use crate::http::HttpError;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur while resolving a title or a stream
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The title, episode or playlist does not exist at the provider
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider could not be reached or kept failing
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(#[from] HttpError),
}

impl ResolutionError {
    /// Whether a later run has a reasonable chance to succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ResolutionError::NotFound(_) => false,
            ResolutionError::ProviderUnavailable(e) => e.is_transient(),
        }
    }

    /// True if this error stems from a user interrupt
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResolutionError::ProviderUnavailable(HttpError::Cancelled))
    }
}

/// Episodes offered for one show: season number to ascending episode numbers
pub type EpisodeListing = BTreeMap<u32, Vec<u32>>;

/// Availability listing of the provider
pub(crate) trait ProviderCatalog {
    /// Whether the provider carries the given title at all
    fn is_available(&self, kind: MediaKind, catalog_id: u64) -> Result<bool, ResolutionError>;

    /// All episodes the provider carries for a show, seasons ascending
    fn episodes(&self, catalog_id: u64) -> Result<EpisodeListing, ResolutionError>;
}

/// Maps a target to a concrete playable stream URL
pub trait StreamLocator {
    fn locate(&self, target: &MediaTarget) -> Result<String, ResolutionError>;
}
