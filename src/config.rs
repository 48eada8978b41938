use std::env;
use std::fmt;

const DEFAULT_LIBRARY: &str = "Movies";
const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("WEB_PORT is not a valid port: {0:?}")]
    InvalidPort(String),
}

/// Connection settings, loaded once at startup and shared read-only with every handler.
#[derive(Clone)]
pub struct Config {
    pub server_url: String,
    pub auth_token: String,
    pub tmdb_api_key: String,
    pub library_name: String,
    pub port: u16,
    pub debug_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads from an arbitrary variable source. `lookup` returns `None` for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let server_url = normalize_server_url(&read("PLEX_URL").unwrap_or_default());
        let auth_token = read("PLEX_TOKEN").unwrap_or_default();
        let tmdb_api_key = read("TMDB_API_KEY").unwrap_or_default();
        let library_name = read("PLEX_LIBRARY").unwrap_or_else(|| DEFAULT_LIBRARY.to_string());
        let port = match read("WEB_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        let debug_mode = read("DEBUG")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        if server_url.is_empty() {
            return Err(ConfigError::Missing("PLEX_URL"));
        }
        if auth_token.is_empty() {
            return Err(ConfigError::Missing("PLEX_TOKEN"));
        }
        if tmdb_api_key.is_empty() {
            return Err(ConfigError::Missing("TMDB_API_KEY"));
        }
        if library_name.is_empty() {
            return Err(ConfigError::Missing("PLEX_LIBRARY"));
        }

        Ok(Self {
            server_url,
            auth_token,
            tmdb_api_key,
            library_name,
            port,
            debug_mode,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("auth_token", &redact(&self.auth_token))
            .field("tmdb_api_key", &redact(&self.tmdb_api_key))
            .field("library_name", &self.library_name)
            .field("port", &self.port)
            .field("debug_mode", &self.debug_mode)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

/// True when `url` starts with `http://` or `https://`, ignoring case.
pub fn has_http_scheme(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Adds `http://` when no scheme is present and strips trailing slashes.
/// An empty input stays empty.
pub fn normalize_server_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if has_http_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
