use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w500";

/// Looks up poster art for a movie. Failures resolve to `None`; a missing poster never
/// aborts a listing.
#[async_trait]
pub trait PosterLookup: Send + Sync {
    async fn lookup_poster(&self, title: &str, year: Option<i32>) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    api_base: String,
    image_base: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    poster_path: Option<String>,
}

enum SearchOutcome {
    Found(Option<String>),
    Unauthorized,
    Failed(StatusCode),
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_urls(api_key, TMDB_BASE, POSTER_BASE)
    }

    pub fn with_base_urls(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        image_base: impl Into<String>,
    ) -> Result<Self> {
        let user_agent = format!("posterlink/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            image_base: image_base.into(),
        })
    }

    fn search_url(&self, title: &str, year: Option<i32>) -> String {
        let mut url = format!(
            "{}/search/movie?api_key={}&query={}",
            self.api_base,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(title)
        );
        if let Some(year) = year {
            url.push_str(&format!("&year={year}"));
        }
        url
    }

    async fn search(&self, title: &str, year: Option<i32>) -> Result<SearchOutcome> {
        let res = self
            .client
            .get(self.search_url(title, year))
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        debug!("TMDB search for '{}' returned {}", title, status);
        if status == StatusCode::UNAUTHORIZED {
            return Ok(SearchOutcome::Unauthorized);
        }
        if !status.is_success() {
            return Ok(SearchOutcome::Failed(status));
        }
        let text = res.text().await.context("reading body failed")?;
        let parsed: SearchResponse = serde_json::from_str(&text).context("JSON parse failed")?;
        let path = parsed
            .results
            .into_iter()
            .next()
            .and_then(|r| r.poster_path)
            .filter(|p| !p.is_empty());
        Ok(SearchOutcome::Found(path))
    }
}

#[async_trait]
impl PosterLookup for TmdbClient {
    async fn lookup_poster(&self, title: &str, year: Option<i32>) -> Option<String> {
        match self.search(title, year).await {
            Ok(SearchOutcome::Found(Some(path))) => Some(format!("{}{}", self.image_base, path)),
            Ok(SearchOutcome::Found(None)) => {
                debug!("No TMDB poster for '{}' ({:?})", title, year);
                None
            }
            Ok(SearchOutcome::Unauthorized) => {
                error!("TMDB API key unauthorized! Check TMDB_API_KEY.");
                None
            }
            Ok(SearchOutcome::Failed(status)) => {
                warn!("TMDB search for '{}' failed with status {}", title, status);
                None
            }
            Err(e) => {
                warn!("TMDB search for '{}' failed: {:#}", title, e);
                None
            }
        }
    }
}
