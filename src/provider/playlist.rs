//! Playlist extraction from provider embed pages.
//!
//! An embed page carries the master playlist URL plus a short-lived token and
//! expiry inside an inline script. The stream URL is the playlist URL with
//! those values merged into its query string.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static PLAYLIST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"url:\s*'([^']+/playlist/\d+[^']*)'").expect("playlist regex should compile")
});
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'token'\s*:\s*'([^']+)'").expect("token regex should compile")
});
static EXPIRES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'expires'\s*:\s*'([^']+)'").expect("expires regex should compile")
});

/// Values scraped from an embed page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PlaylistData {
    pub playlist_url: String,
    pub token: String,
    pub expires: String,
}

/// Extracts the playlist parameters, or `None` if any of them is missing
pub(super) fn extract_playlist_data(html: &str) -> Option<PlaylistData> {
    let capture = |re: &Regex| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    Some(PlaylistData {
        playlist_url: capture(&PLAYLIST_URL)?,
        token: capture(&TOKEN)?,
        expires: capture(&EXPIRES)?,
    })
}

/// Builds the signed stream URL
///
/// `token`, `expires`, `h=1` and `lang=en` replace any existing parameters of
/// the same name; other parameters are kept in order.
pub(super) fn build_playlist_url(data: &PlaylistData) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&data.playlist_url)?;

    let overrides = [
        ("token", data.token.as_str()),
        ("expires", data.expires.as_str()),
        ("h", "1"),
        ("lang", "en"),
    ];

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !overrides.iter().any(|(name, _)| **name == **key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .extend_pairs(overrides);

    Ok(url)
}
