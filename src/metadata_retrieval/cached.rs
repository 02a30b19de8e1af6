//! Cached metadata provider implementation
//!
//! This module provides a caching wrapper for metadata providers that
//! automatically stores and retrieves title metadata from a local cache.

use super::{MetadataProvider, MetadataRetrievalError, TitleMetadata};
use crate::cache::CacheStorage;
use crate::config::MediaKind;
use tracing::debug;

/// A caching wrapper for metadata providers
///
/// This provider wraps another metadata provider and caches the results
/// to avoid redundant network requests. The cache is persistent across
/// application runs.
pub(crate) struct CachedMetadataProvider<P>
where
    P: MetadataProvider,
{
    /// The underlying metadata provider
    provider: P,
    /// Cache storage for title metadata
    cache: CacheStorage<TitleMetadata>,
}

impl<P> CachedMetadataProvider<P>
where
    P: MetadataProvider,
{
    /// Creates a new cached metadata provider wrapping the given provider
    pub fn new(provider: P, cache: CacheStorage<TitleMetadata>) -> Self {
        Self { provider, cache }
    }

    fn cache_key(kind: MediaKind, catalog_id: u64) -> String {
        format!("{}_{}", kind.as_str(), catalog_id)
    }
}

impl<P> MetadataProvider for CachedMetadataProvider<P>
where
    P: MetadataProvider,
{
    fn fetch_title(
        &self,
        kind: MediaKind,
        catalog_id: u64,
    ) -> Result<TitleMetadata, MetadataRetrievalError> {
        let cache_key = Self::cache_key(kind, catalog_id);

        match self.cache.load(&cache_key) {
            Ok(Some(metadata)) => {
                debug!(key = %cache_key, "Title metadata served from cache");
                return Ok(metadata);
            }
            Ok(None) => {}
            Err(e) => {
                // A broken cache must not prevent the lookup
                debug!(key = %cache_key, error = %e, "Ignoring unreadable cache entry");
            }
        }

        let metadata = self.provider.fetch_title(kind, catalog_id)?;

        // Store in cache (ignore errors to avoid failing the request)
        let _ = self.cache.store(&cache_key, &metadata);

        Ok(metadata)
    }
}
