use crate::models::{CatalogItem, LibrarySection};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to connect to Plex: {0}")]
    Connection(String),

    #[error("Library section '{0}' not found")]
    SectionNotFound(String),

    #[error("Plex request failed: {0}")]
    Request(String),

    #[error("Poster upload failed: {0}")]
    Upload(String),
}

/// Opens sessions against a media catalog. One session is opened per request.
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
    ) -> Result<Box<dyn CatalogSession>, CatalogError>;
}

#[async_trait]
pub trait CatalogSession: Send + Sync {
    async fn section(&self, name: &str) -> Result<LibrarySection, CatalogError>;
    async fn list_all(&self, section: &LibrarySection) -> Result<Vec<CatalogItem>, CatalogError>;
    async fn search(
        &self,
        section: &LibrarySection,
        query: &str,
    ) -> Result<Vec<CatalogItem>, CatalogError>;
    async fn fetch_item(&self, id: i64) -> Result<Option<CatalogItem>, CatalogError>;
    async fn upload_poster(&self, item: &CatalogItem, poster_url: &str) -> Result<(), CatalogError>;
}

#[derive(Debug, Clone)]
pub struct PlexClient {
    client: Client,
}

#[derive(Debug, Clone)]
pub struct PlexSession {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PlexResponse<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    key: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct MetadataContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: serde_json::Value,
    title: String,
    year: Option<i32>,
    #[serde(rename = "addedAt")]
    added_at: Option<i64>,
    thumb: Option<String>,
}

impl PlexClient {
    pub fn new() -> Result<Self> {
        let user_agent = format!("posterlink/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build Plex HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaCatalog for PlexClient {
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
    ) -> Result<Box<dyn CatalogSession>, CatalogError> {
        let session = PlexSession {
            client: self.client.clone(),
            base_url: server_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        };
        debug!("Connecting to Plex at {}", session.base_url);
        // The server root requires a valid token; `/identity` does not.
        let res = session
            .client
            .get(format!("{}/", session.base_url))
            .header("X-Plex-Token", &session.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CatalogError::Connection(format!(
                "HTTP {status} (check PLEX_TOKEN)"
            )));
        }
        if !status.is_success() {
            return Err(CatalogError::Connection(format!("HTTP {status}")));
        }
        info!("Connected to Plex at {}", session.base_url);
        Ok(Box::new(session))
    }
}

impl PlexSession {
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("{} -> HTTP {}", path, status));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(Some(parsed))
    }

    async fn fetch_metadata(&self, path: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        let container: Option<PlexResponse<MetadataContainer>> = self
            .get_json(path)
            .await
            .map_err(|e| CatalogError::Request(format!("{e:#}")))?;
        let Some(container) = container else {
            return Err(CatalogError::Request(format!("{path} -> HTTP 404")));
        };
        Ok(self.map_items(container.media_container.metadata))
    }

    fn map_items(&self, raw: Vec<serde_json::Value>) -> Vec<CatalogItem> {
        raw.into_iter()
            .filter_map(|value| match serde_json::from_value::<RawMetadata>(value) {
                Ok(meta) => self.to_item(meta),
                Err(e) => {
                    debug!("Skipping unreadable Plex metadata entry: {}", e);
                    None
                }
            })
            .collect()
    }

    fn to_item(&self, meta: RawMetadata) -> Option<CatalogItem> {
        let Some(id) = parse_rating_key(&meta.rating_key) else {
            debug!("Skipping '{}': unusable ratingKey {}", meta.title, meta.rating_key);
            return None;
        };
        let added_at = meta
            .added_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let poster_url = meta.thumb.as_deref().map(|thumb| self.authed_url(thumb));
        Some(CatalogItem {
            id,
            title: meta.title,
            year: meta.year,
            added_at,
            poster_url,
        })
    }

    fn authed_url(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}X-Plex-Token={}",
            self.base_url,
            path,
            sep,
            urlencoding::encode(&self.token)
        )
    }
}

#[async_trait]
impl CatalogSession for PlexSession {
    async fn section(&self, name: &str) -> Result<LibrarySection, CatalogError> {
        let sections: Option<PlexResponse<SectionsContainer>> = self
            .get_json("/library/sections")
            .await
            .map_err(|e| CatalogError::Request(format!("{e:#}")))?;
        let directories = sections
            .map(|s| s.media_container.directories)
            .unwrap_or_default();
        let found = directories
            .iter()
            .find(|d| d.title == name)
            .or_else(|| directories.iter().find(|d| d.title.eq_ignore_ascii_case(name)))
            .ok_or_else(|| CatalogError::SectionNotFound(name.to_string()))?;
        debug!("Resolved library '{}' to section {}", name, found.key);
        Ok(LibrarySection {
            key: found.key.clone(),
            title: found.title.clone(),
        })
    }

    async fn list_all(&self, section: &LibrarySection) -> Result<Vec<CatalogItem>, CatalogError> {
        self.fetch_metadata(&format!("/library/sections/{}/all", section.key))
            .await
    }

    async fn search(
        &self,
        section: &LibrarySection,
        query: &str,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        let path = if query.is_empty() {
            format!("/library/sections/{}/all", section.key)
        } else {
            format!(
                "/library/sections/{}/all?title={}",
                section.key,
                urlencoding::encode(query)
            )
        };
        self.fetch_metadata(&path).await
    }

    async fn fetch_item(&self, id: i64) -> Result<Option<CatalogItem>, CatalogError> {
        let container: Option<PlexResponse<MetadataContainer>> = self
            .get_json(&format!("/library/metadata/{id}"))
            .await
            .map_err(|e| CatalogError::Request(format!("{e:#}")))?;
        Ok(container.and_then(|c| self.map_items(c.media_container.metadata).into_iter().next()))
    }

    async fn upload_poster(&self, item: &CatalogItem, poster_url: &str) -> Result<(), CatalogError> {
        let url = format!(
            "{}/library/metadata/{}/posters?url={}",
            self.base_url,
            item.id,
            urlencoding::encode(poster_url)
        );
        let res = self
            .client
            .post(&url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CatalogError::Upload(e.to_string()))?;
        let status = res.status();
        if status.is_success() {
            info!("Uploaded poster for '{}' ({})", item.title, item.id);
            Ok(())
        } else {
            Err(CatalogError::Upload(format!("HTTP {status}")))
        }
    }
}

fn parse_rating_key(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> PlexSession {
        PlexSession {
            client: Client::new(),
            base_url: "http://plex:32400".to_string(),
            token: "tok".to_string(),
        }
    }

    #[test]
    fn maps_metadata_entries() {
        let items = session().map_items(vec![
            json!({
                "ratingKey": "123",
                "title": "Heat",
                "year": 1995,
                "addedAt": 1_700_000_000,
                "thumb": "/library/metadata/123/thumb/1700000001"
            }),
            json!({ "ratingKey": 7, "title": "No Thumb" }),
            json!({ "ratingKey": "abc", "title": "Bad Key" }),
            json!({ "title": "No Key" }),
        ]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 123);
        assert_eq!(items[0].year, Some(1995));
        assert_eq!(items[0].added_at.timestamp(), 1_700_000_000);
        assert_eq!(
            items[0].poster_url.as_deref(),
            Some("http://plex:32400/library/metadata/123/thumb/1700000001?X-Plex-Token=tok")
        );
        assert_eq!(items[1].id, 7);
        assert!(items[1].poster_url.is_none());
        assert_eq!(items[1].added_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn appends_token_to_existing_query() {
        assert_eq!(
            session().authed_url("/photo?size=2"),
            "http://plex:32400/photo?size=2&X-Plex-Token=tok"
        );
    }
}
