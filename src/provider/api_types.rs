/// Provider listing response types for deserialization.
///
/// These structures mirror the JSON arrays returned by the `/api/list/...`
/// endpoints. Unknown fields are ignored.
use serde::Deserialize;

/// One entry of the movie or tv listing.
#[derive(Debug, Deserialize)]
pub(super) struct ListedTitle {
    /// Catalog identifier (may be missing for unmatched entries)
    pub tmdb_id: Option<u64>,
}

/// One entry of the episode listing.
#[derive(Debug, Deserialize)]
pub(super) struct ListedEpisode {
    /// Catalog identifier of the show
    pub tmdb_id: Option<u64>,
    /// Season number
    pub s: u32,
    /// Episode number within the season
    pub e: u32,
}
