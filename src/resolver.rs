//! Metadata resolver
//!
//! Turns a catalog identifier into the ordered list of targets to record: one
//! target for a movie, one per available episode (seasons ascending, episodes
//! ascending within a season) for a tv show.

use crate::config::{MediaKind, RangeFilter};
use crate::file_operations::{
    FileOperationError, ensure_unique_outputs, episode_output_path, movie_output_path,
};
use crate::metadata_retrieval::{MetadataProvider, TitleMetadata};
use crate::provider::{ProviderCatalog, ResolutionError};
use crate::{MediaTarget, TargetKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that prevent building the target list
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The title could not be resolved at the provider
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The derived output paths collide
    #[error(transparent)]
    FileOperation(#[from] FileOperationError),
}

/// Resolves catalog titles into recording targets
pub(crate) struct MetadataResolver<C, M>
where
    C: ProviderCatalog,
    M: MetadataProvider,
{
    catalog: C,
    metadata: M,
    output_dir: PathBuf,
}

impl<C, M> MetadataResolver<C, M>
where
    C: ProviderCatalog,
    M: MetadataProvider,
{
    pub fn new(catalog: C, metadata: M, output_dir: &Path) -> Self {
        Self {
            catalog,
            metadata,
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Title and year, falling back to a placeholder when the lookup fails
    pub fn title_metadata(&self, kind: MediaKind, catalog_id: u64) -> TitleMetadata {
        match self.metadata.fetch_title(kind, catalog_id) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(%kind, catalog_id, error = %e, "Title metadata unavailable, using placeholder");
                TitleMetadata::placeholder(kind, catalog_id)
            }
        }
    }

    /// Builds the ordered target list for one catalog title
    ///
    /// # Arguments
    ///
    /// * `catalog_id` - Catalog identifier of the movie or show
    /// * `kind` - Movie or tv
    /// * `seasons` - Inclusive season bounds (tv only)
    /// * `episodes` - Inclusive episode bounds applied within every season (tv only)
    ///
    /// # Errors
    ///
    /// `NotFound` if the provider does not carry the title or no episode is
    /// listed for a show; `ProviderUnavailable` if the listing cannot be fetched.
    pub fn resolve(
        &self,
        catalog_id: u64,
        kind: MediaKind,
        seasons: RangeFilter,
        episodes: RangeFilter,
    ) -> Result<(TitleMetadata, Vec<MediaTarget>), ResolveError> {
        if !self.catalog.is_available(kind, catalog_id)? {
            return Err(ResolutionError::NotFound(format!(
                "{kind} {catalog_id} is not offered by the provider"
            ))
            .into());
        }

        let resolved = match kind {
            MediaKind::Movie => {
                let metadata = self.title_metadata(kind, catalog_id);
                let target = MediaTarget {
                    kind: TargetKind::Movie,
                    catalog_id,
                    output_path: movie_output_path(&self.output_dir, &metadata.title, &metadata.year),
                    title: metadata.title.clone(),
                    year: metadata.year.clone(),
                };
                (metadata, vec![target])
            }
            MediaKind::Tv => {
                let listing = self.catalog.episodes(catalog_id)?;
                if listing.is_empty() {
                    return Err(ResolutionError::NotFound(format!(
                        "no episodes listed for tv {catalog_id}"
                    ))
                    .into());
                }

                let metadata = self.title_metadata(kind, catalog_id);
                let targets: Vec<MediaTarget> = listing
                    .iter()
                    .filter(|(season, _)| **season >= 1 && seasons.contains(**season))
                    .flat_map(|(season, numbers)| {
                        numbers
                            .iter()
                            .filter(|episode| **episode >= 1 && episodes.contains(**episode))
                            .map(move |episode| (*season, *episode))
                    })
                    .map(|(season, episode)| MediaTarget {
                        kind: TargetKind::Episode { season, episode },
                        catalog_id,
                        title: metadata.title.clone(),
                        year: metadata.year.clone(),
                        output_path: episode_output_path(
                            &self.output_dir,
                            &metadata.title,
                            &metadata.year,
                            season,
                            episode,
                        ),
                    })
                    .collect();

                debug!(
                    catalog_id,
                    listed = listing.values().map(Vec::len).sum::<usize>(),
                    selected = targets.len(),
                    "Expanded episode ranges"
                );
                (metadata, targets)
            }
        };

        ensure_unique_outputs(&resolved.1)?;
        Ok(resolved)
    }
}
