/// Embed-page provider implementation.
use super::api_types::{ListedEpisode, ListedTitle};
use super::playlist::{build_playlist_url, extract_playlist_data};
use super::{EpisodeListing, ProviderCatalog, ResolutionError, StreamLocator};
use crate::config::MediaKind;
use crate::http::{HttpClient, HttpError};
use crate::{MediaTarget, TargetKind};
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

/// Provider serving a JSON availability listing and one embed page per title
/// or episode.
///
/// - listing: `{base}/api/list/{movie|tv|episode}?lang={language}`
/// - movie page: `{base}/movie/{id}`
/// - episode page: `{base}/tv/{id}/{SS}/{EE}`
pub(crate) struct EmbedProvider {
    client: HttpClient,
    base_url: String,
    language: String,
}

impl EmbedProvider {
    /// Creates a provider for the given base endpoint.
    pub fn new(client: HttpClient, base_url: &Url, language: &str) -> Self {
        Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            language: language.to_string(),
        }
    }

    fn listing_url(&self, listing: &str) -> String {
        format!("{}/api/list/{}?lang={}", self.base_url, listing, self.language)
    }

    fn page_url(&self, target: &MediaTarget) -> String {
        match target.kind {
            TargetKind::Movie => format!("{}/movie/{}", self.base_url, target.catalog_id),
            TargetKind::Episode { season, episode } => format!(
                "{}/tv/{}/{:02}/{:02}",
                self.base_url, target.catalog_id, season, episode
            ),
        }
    }
}

/// Maps a 404 to `NotFound`, everything else to `ProviderUnavailable`
fn not_found_or_unavailable(error: HttpError, what: impl FnOnce() -> String) -> ResolutionError {
    if error.status() == Some(StatusCode::NOT_FOUND) {
        ResolutionError::NotFound(what())
    } else {
        ResolutionError::ProviderUnavailable(error)
    }
}

/// Groups listed episodes of one show by season, sorted and de-duplicated
fn group_episodes(entries: Vec<ListedEpisode>, catalog_id: u64) -> EpisodeListing {
    let mut listing = EpisodeListing::new();
    for entry in entries {
        if entry.tmdb_id == Some(catalog_id) {
            listing.entry(entry.s).or_default().push(entry.e);
        }
    }
    for episodes in listing.values_mut() {
        episodes.sort_unstable();
        episodes.dedup();
    }
    listing
}

impl ProviderCatalog for EmbedProvider {
    fn is_available(&self, kind: MediaKind, catalog_id: u64) -> Result<bool, ResolutionError> {
        let url = self.listing_url(kind.as_str());
        let titles: Vec<ListedTitle> = self.client.get_json(&url)?;

        Ok(titles.iter().any(|t| t.tmdb_id == Some(catalog_id)))
    }

    fn episodes(&self, catalog_id: u64) -> Result<EpisodeListing, ResolutionError> {
        let url = self.listing_url("episode");
        let entries: Vec<ListedEpisode> = self.client.get_json(&url)?;

        Ok(group_episodes(entries, catalog_id))
    }
}

impl StreamLocator for EmbedProvider {
    fn locate(&self, target: &MediaTarget) -> Result<String, ResolutionError> {
        let page_url = self.page_url(target);
        debug!(url = %page_url, "Fetching embed page");

        let html = self
            .client
            .get_text(&page_url)
            .map_err(|e| not_found_or_unavailable(e, || target.label()))?;

        let data = extract_playlist_data(&html).ok_or_else(|| {
            ResolutionError::NotFound(format!("no playlist for {}", target.label()))
        })?;

        let stream_url = build_playlist_url(&data).map_err(|e| {
            ResolutionError::NotFound(format!("malformed playlist URL for {}: {e}", target.label()))
        })?;

        Ok(stream_url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use crate::http::test_server::StubServer;
    use assert_matches::assert_matches;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn provider(base_url: &str) -> EmbedProvider {
        let client = HttpClient::new(
            "test",
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            CancellationToken::new(),
        )
        .unwrap();
        EmbedProvider::new(client, &Url::parse(base_url).unwrap(), "it")
    }

    fn episode(season: u32, episode: u32) -> MediaTarget {
        MediaTarget {
            kind: TargetKind::Episode { season, episode },
            catalog_id: 1399,
            title: "Game of Thrones".to_string(),
            year: "2011".to_string(),
            output_path: PathBuf::from("out.mkv"),
        }
    }

    #[test]
    fn test_page_url_pads_numbers() {
        let provider = provider("https://provider.example/");
        assert_eq!(
            provider.page_url(&episode(1, 3)),
            "https://provider.example/tv/1399/01/03"
        );
    }

    #[test]
    fn test_listing_url() {
        let provider = provider("https://provider.example");
        assert_eq!(
            provider.listing_url("episode"),
            "https://provider.example/api/list/episode?lang=it"
        );
    }

    #[test]
    fn test_group_episodes_filters_and_sorts() {
        let entries = vec![
            ListedEpisode { tmdb_id: Some(1399), s: 2, e: 1 },
            ListedEpisode { tmdb_id: Some(1399), s: 1, e: 2 },
            ListedEpisode { tmdb_id: Some(1399), s: 1, e: 1 },
            ListedEpisode { tmdb_id: Some(1399), s: 1, e: 2 },
            ListedEpisode { tmdb_id: Some(7), s: 1, e: 9 },
            ListedEpisode { tmdb_id: None, s: 1, e: 5 },
        ];

        let listing = group_episodes(entries, 1399);

        assert_eq!(listing.len(), 2);
        assert_eq!(listing[&1], vec![1, 2]);
        assert_eq!(listing[&2], vec![1]);
    }

    #[test]
    fn test_is_available() {
        let server = StubServer::start(vec![(200, r#"[{"tmdb_id": 1}, {"tmdb_id": 1399}, {}]"#.to_string())]);
        let provider = provider(&server.base_url);

        assert!(provider.is_available(MediaKind::Tv, 1399).unwrap());
        assert!(!provider.is_available(MediaKind::Tv, 42).unwrap());
    }

    #[test]
    fn test_locate_builds_stream_url() {
        let page = "url: 'https://cdn.example/playlist/9', 'token': 't', 'expires': '5'";
        let server = StubServer::start(vec![(200, page.to_string())]);

        let url = provider(&server.base_url).locate(&episode(1, 1)).unwrap();

        assert_eq!(url, "https://cdn.example/playlist/9?token=t&expires=5&h=1&lang=en");
    }

    #[test]
    fn test_locate_missing_page_is_not_found() {
        let server = StubServer::start(vec![(404, String::new())]);
        let result = provider(&server.base_url).locate(&episode(1, 1));

        assert_matches!(result, Err(ResolutionError::NotFound(_)));
        assert_eq!(server.hits(), 1);
    }

    #[test]
    fn test_locate_page_without_playlist_is_not_found() {
        let server = StubServer::start(vec![(200, "<html></html>".to_string())]);
        let result = provider(&server.base_url).locate(&episode(1, 1));

        assert_matches!(result, Err(ResolutionError::NotFound(_)));
    }

    #[test]
    fn test_locate_failing_provider_is_unavailable() {
        let server = StubServer::start(vec![(500, String::new())]);
        let result = provider(&server.base_url).locate(&episode(1, 1));

        assert_matches!(
            result,
            Err(ResolutionError::ProviderUnavailable(HttpError::Exhausted { .. }))
        );
        assert_eq!(server.hits(), 2);
    }
}
