/// TMDB metadata provider implementation.
use super::{MetadataProvider, MetadataRetrievalError, TitleMetadata, UNKNOWN_YEAR};
use crate::config::MediaKind;
use crate::http::HttpClient;
use scraper::{Html, Selector};

/// Metadata provider reading the public TMDB title pages.
///
/// The title and year are taken from the poster header of
/// `{base_url}/{movie|tv}/{id}`.
pub(crate) struct TmdbProvider {
    client: HttpClient,
    base_url: String,
    language: String,
}

impl TmdbProvider {
    /// Creates a new TMDB provider instance.
    pub fn new(client: HttpClient, base_url: &str, language: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        }
    }

    /// Extracts title and year from a title page.
    fn parse_title_page(html: &str) -> Result<TitleMetadata, MetadataRetrievalError> {
        let document = Html::parse_document(html);
        let heading = selector(".header_poster_wrapper h2")?;
        let link = selector("a")?;
        let release = selector("span.release_date")?;

        let h2 = document
            .select(&heading)
            .next()
            .ok_or_else(|| MetadataRetrievalError::ParseError("no title heading".to_string()))?;

        let title = h2
            .select(&link)
            .next()
            .map(|a| a.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MetadataRetrievalError::ParseError("empty title".to_string()))?;

        let year = h2
            .select(&release)
            .next()
            .map(|span| {
                span.text()
                    .collect::<String>()
                    .trim()
                    .trim_matches(|c: char| c == '(' || c == ')')
                    .to_string()
            })
            .filter(|y| !y.is_empty())
            .unwrap_or_else(|| UNKNOWN_YEAR.to_string());

        Ok(TitleMetadata { title, year })
    }
}

fn selector(css: &str) -> Result<Selector, MetadataRetrievalError> {
    Selector::parse(css).map_err(|e| MetadataRetrievalError::ParseError(e.to_string()))
}

impl MetadataProvider for TmdbProvider {
    fn fetch_title(
        &self,
        kind: MediaKind,
        catalog_id: u64,
    ) -> Result<TitleMetadata, MetadataRetrievalError> {
        let url = format!(
            "{}/{}/{}?language={}",
            self.base_url,
            kind.as_str(),
            catalog_id,
            self.language
        );

        let html = self.client.get_text(&url)?;

        Self::parse_title_page(&html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::StubServer;
    use crate::http::RetryPolicy;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const PAGE: &str = r#"
        <html><body>
          <section class="header_poster_wrapper">
            <h2 class="title">
              <a href="/tv/1399">Game of Thrones</a>
              <span class="tag release_date">(2011)</span>
            </h2>
          </section>
        </body></html>
    "#;

    #[test]
    fn test_parse_title_page() {
        let metadata = TmdbProvider::parse_title_page(PAGE).unwrap();
        assert_eq!(metadata.title, "Game of Thrones");
        assert_eq!(metadata.year, "2011");
    }

    #[test]
    fn test_parse_title_page_without_year() {
        let page = r#"<div class="header_poster_wrapper"><h2><a>Untitled</a></h2></div>"#;
        let metadata = TmdbProvider::parse_title_page(page).unwrap();
        assert_eq!(metadata.year, UNKNOWN_YEAR);
    }

    #[test]
    fn test_parse_title_page_without_heading() {
        let result = TmdbProvider::parse_title_page("<html><body>nothing</body></html>");
        assert!(matches!(result, Err(MetadataRetrievalError::ParseError(_))));
    }

    #[test]
    fn test_fetch_title_over_http() {
        let server = StubServer::start(vec![(200, PAGE.to_string())]);
        let client = HttpClient::new(
            "test",
            Duration::from_secs(5),
            RetryPolicy::default(),
            CancellationToken::new(),
        )
        .unwrap();
        let provider = TmdbProvider::new(client, &server.base_url, "en-US");

        let metadata = provider.fetch_title(MediaKind::Tv, 1399).unwrap();
        assert_eq!(metadata.title, "Game of Thrones");
    }
}
