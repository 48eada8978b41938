use crate::config::{has_http_scheme, Config};
use crate::models::{
    filter_added_since, sort_newest_first, ApplyChangesRequest, CatalogItem, FetchPostersRequest,
    LibrarySection, MovieSummary, PosterSelection, SearchRequest, TimeRange,
};
use crate::plex::{CatalogError, CatalogSession, MediaCatalog, PlexClient};
use crate::tmdb::{PosterLookup, TmdbClient};
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024; // 1MB safety cap
const INDEX_HTML: &str = include_str!("../templates/index.html");
const NO_SELECTION_MESSAGE: &str = "No movies selected for poster updates.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<dyn MediaCatalog>,
    pub posters: Arc<dyn PosterLookup>,
}

pub async fn run_server(config: Config) -> Result<()> {
    let catalog: Arc<dyn MediaCatalog> = Arc::new(PlexClient::new()?);
    let posters: Arc<dyn PosterLookup> = Arc::new(TmdbClient::new(config.tmdb_api_key.clone())?);
    let port = config.port;

    let state = AppState {
        config: Arc::new(config),
        catalog,
        posters,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/fetch-posters", post(handle_fetch_posters))
        .route("/search-movie", post(handle_search_movie))
        .route("/apply-changes", post(handle_apply_changes))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> &'static str {
    "OK"
}

async fn handle_fetch_posters(State(state): State<AppState>, body: Bytes) -> Response {
    let request: FetchPostersRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(res) => return res,
    };
    let range = request
        .time_range
        .as_deref()
        .map(TimeRange::parse)
        .unwrap_or_default();
    debug!("Fetching posters from Plex for {:?}", range);

    match fetch_recent(&state, range, Utc::now()).await {
        Ok(movies) => movies_response(movies),
        Err(e) => catalog_failure(e),
    }
}

async fn handle_search_movie(State(state): State<AppState>, body: Bytes) -> Response {
    let request: SearchRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(res) => return res,
    };
    let query = request.query.unwrap_or_default().trim().to_lowercase();
    debug!("Searching for movie: '{}'", query);

    match search_movies(&state, &query).await {
        Ok(movies) => movies_response(movies),
        Err(e) => catalog_failure(e),
    }
}

async fn handle_apply_changes(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ApplyChangesRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(res) => return res,
    };
    let selections = request.selected_movies.unwrap_or_default();
    let messages = apply_changes(&state, &selections).await;
    (StatusCode::OK, Json(json!({ "messages": messages }))).into_response()
}

/// Recently added movies within `range` (relative to `now`), newest first, each paired with
/// a TMDB poster lookup.
pub async fn fetch_recent(
    state: &AppState,
    range: TimeRange,
    now: DateTime<Utc>,
) -> Result<Vec<MovieSummary>, CatalogError> {
    let (session, section) = open_section(state).await?;
    let all = session.list_all(&section).await?;
    let mut recent = filter_added_since(all, range.since(now));
    debug!("Found {} movies in selected time range", recent.len());
    sort_newest_first(&mut recent);
    Ok(enrich(state.posters.as_ref(), recent).await)
}

/// `query` is matched by the catalog itself; an empty query lists the whole section.
pub async fn search_movies(
    state: &AppState,
    query: &str,
) -> Result<Vec<MovieSummary>, CatalogError> {
    let (session, section) = open_section(state).await?;
    let mut matches = session.search(&section, query).await?;
    debug!("Search '{}' matched {} movies", query, matches.len());
    sort_newest_first(&mut matches);
    Ok(enrich(state.posters.as_ref(), matches).await)
}

/// Applies each selection in order and returns one message per selection. A failure only
/// affects its own selection.
pub async fn apply_changes(state: &AppState, selections: &[PosterSelection]) -> Vec<String> {
    if selections.is_empty() {
        debug!("No movies selected for updating");
        return vec![NO_SELECTION_MESSAGE.to_string()];
    }

    let session = match state
        .catalog
        .connect(&state.config.server_url, &state.config.auth_token)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            return vec![format!("❌ Error: {e}")];
        }
    };

    let mut messages = Vec::with_capacity(selections.len());
    for selection in selections {
        let message = apply_one(session.as_ref(), selection).await;
        messages.push(message);
    }
    messages
}

async fn apply_one(session: &dyn CatalogSession, selection: &PosterSelection) -> String {
    let raw_id = &selection.catalog_id;
    let url = &selection.poster_url;
    debug!("Processing movie ID: {}", raw_id);

    if !has_http_scheme(url) {
        warn!("Invalid poster URL: {}", url);
        return format!("❌ Error: Invalid poster URL: {url}");
    }
    let Some(id) = selection.parsed_id() else {
        warn!("Invalid movie ID: {}", raw_id);
        return format!("❌ Error: Invalid movie ID: {raw_id}");
    };

    let item = match session.fetch_item(id).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            warn!("Movie ID {} not found in Plex", id);
            return format!("❌ Error: Movie ID {id} not found in Plex.");
        }
        Err(e) => {
            error!("Error updating {}: {}", id, e);
            return format!("❌ Error updating {id}: {e}");
        }
    };
    debug!("Found movie: {} (ID: {})", item.title, id);

    match session.upload_poster(&item, url).await {
        Ok(()) => format!("✅ Successfully updated poster for {}!", item.title),
        Err(e) => {
            error!("Error updating {}: {}", id, e);
            format!("❌ Error updating {id}: {e}")
        }
    }
}

async fn open_section(
    state: &AppState,
) -> Result<(Box<dyn CatalogSession>, LibrarySection), CatalogError> {
    let session = state
        .catalog
        .connect(&state.config.server_url, &state.config.auth_token)
        .await?;
    let section = session.section(&state.config.library_name).await?;
    Ok((session, section))
}

async fn enrich(posters: &dyn PosterLookup, items: Vec<CatalogItem>) -> Vec<MovieSummary> {
    let total = items.len();
    let mut movies = Vec::with_capacity(total);
    for (index, item) in items.into_iter().enumerate() {
        debug!("Processing {}/{}: {}", index + 1, total, item.title);
        let tmdb_poster = posters.lookup_poster(&item.title, item.year).await;
        movies.push(MovieSummary::from_item(item, tmdb_poster));
    }
    movies
}

fn movies_response(movies: Vec<MovieSummary>) -> Response {
    let total = movies.len();
    (StatusCode::OK, Json(json!({ "movies": movies, "total": total }))).into_response()
}

fn catalog_failure(err: CatalogError) -> Response {
    error!("Plex request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejecting request: invalid JSON body: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Invalid JSON body: {e}") })),
        )
            .into_response()
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
