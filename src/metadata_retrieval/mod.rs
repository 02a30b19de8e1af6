/// Title metadata retrieval.
///
/// This module provides the display metadata (title and release year) used to
/// name recorded files, as well as the trait for implementing metadata
/// providers.
mod cached;
mod tmdb;

pub(crate) use cached::CachedMetadataProvider;
pub(crate) use tmdb::TmdbProvider;

use crate::config::MediaKind;
use crate::http::HttpError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder year when the catalog does not know one
pub const UNKNOWN_YEAR: &str = "Unknown";

/// Errors that can occur during metadata retrieval operations.
#[derive(Debug, Error)]
pub enum MetadataRetrievalError {
    /// Request to the metadata provider failed
    #[error("Request failed: {0}")]
    RequestError(#[from] HttpError),

    /// The page did not contain the expected markup
    #[error("Failed to parse catalog page: {0}")]
    ParseError(String),
}

/// Display metadata for a catalog title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleMetadata {
    /// The movie or show title
    pub title: String,
    /// The release year, or [`UNKNOWN_YEAR`]
    pub year: String,
}

impl TitleMetadata {
    /// Stand-in used when the catalog cannot be consulted
    pub fn placeholder(kind: MediaKind, catalog_id: u64) -> Self {
        Self {
            title: format!("{}_{}", kind.as_str(), catalog_id),
            year: UNKNOWN_YEAR.to_string(),
        }
    }
}

/// Trait for metadata providers that can fetch title information.
///
/// Implementors of this trait can retrieve display metadata from various
/// sources such as TMDB or other catalog services.
pub(crate) trait MetadataProvider {
    /// Fetches title and year for a catalog entry.
    ///
    /// # Arguments
    ///
    /// * `kind` - Whether the identifier refers to a movie or a tv show
    /// * `catalog_id` - The catalog identifier of the title
    fn fetch_title(
        &self,
        kind: MediaKind,
        catalog_id: u64,
    ) -> Result<TitleMetadata, MetadataRetrievalError>;
}

impl<P: MetadataProvider + ?Sized> MetadataProvider for Box<P> {
    fn fetch_title(
        &self,
        kind: MediaKind,
        catalog_id: u64,
    ) -> Result<TitleMetadata, MetadataRetrievalError> {
        (**self).fetch_title(kind, catalog_id)
    }
}
