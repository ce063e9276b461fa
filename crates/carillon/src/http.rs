//! Operator HTTP interface.
//!
//! Song listing and manual playback, silent-day management, plan previews
//! and health. Handlers that touch the instrument or the calendar run on
//! blocking threads.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::daemon::{CarillonDaemon, HealthReport, PlanPreview};
use crate::instrument::InstrumentError;
use crate::rules::RuleError;
use crate::song::SongSummary;

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    pub daemon: Arc<CarillonDaemon>,
}

/// Error type for HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("Playback task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Instrument(_) => StatusCode::BAD_GATEWAY,
            ApiError::Rule(_) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/songs", get(list_songs))
        .route("/songs/{id}", get(get_song))
        .route("/songs/{id}/play", axum::routing::post(play_song))
        .route("/silence", get(list_silence))
        .route("/silence/{date}", axum::routing::put(add_silence).delete(remove_silence))
        .route("/plan", get(preview_plan))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.daemon.health())
}

#[derive(Debug, Deserialize)]
struct SongQuery {
    /// Hymnal number, exact
    number: Option<String>,
    /// Title fragment, case-insensitive
    title: Option<String>,
}

async fn list_songs(
    State(state): State<AppState>,
    Query(query): Query<SongQuery>,
) -> Json<Vec<SongSummary>> {
    let catalog = state.daemon.catalog();

    let songs = match (query.number, query.title) {
        (Some(number), _) => catalog.search_number(&number).into_iter().collect(),
        (None, Some(title)) => catalog.search_title(&title),
        (None, None) => return Json(catalog.summaries()),
    };

    Json(
        songs
            .iter()
            .filter_map(|song| catalog.id_of(song).and_then(|id| catalog.summary(id)))
            .collect(),
    )
}

async fn get_song(
    State(state): State<AppState>,
    Path(id): Path<usize>,
) -> Result<Json<SongSummary>, ApiError> {
    state
        .daemon
        .catalog()
        .summary(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No song with id {}", id)))
}

/// Largest transposition accepted for manual playback, in semitones.
const MAX_TRANSPOSE: i8 = 24;

#[derive(Debug, Deserialize)]
struct PlayQuery {
    /// Semitones, -24..=24
    #[serde(default)]
    transpose: i8,
    /// Speed relative to the file, 0.25..=4
    #[serde(default = "default_tempo")]
    tempo: f64,
}

fn default_tempo() -> f64 {
    1.0
}

#[derive(Debug, Serialize)]
struct PlayResponse {
    id: usize,
    title: String,
    transpose: i8,
    tempo: f64,
    strikes: usize,
}

/// Plays the song to the end before answering. Any automatic ring in
/// progress is cut off.
async fn play_song(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Query(query): Query<PlayQuery>,
) -> Result<Json<PlayResponse>, ApiError> {
    let song = state
        .daemon
        .catalog()
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("No song with id {}", id)))?;

    if !(-MAX_TRANSPOSE..=MAX_TRANSPOSE).contains(&query.transpose) {
        return Err(ApiError::BadRequest(format!(
            "Transpose {} outside -{}..={}",
            query.transpose, MAX_TRANSPOSE, MAX_TRANSPOSE
        )));
    }
    let arranged = song
        .arranged(query.transpose, query.tempo)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    info!(
        "Manual playback: {} (transpose {}, tempo {})",
        song.title, query.transpose, query.tempo
    );
    let strikes = arranged.strike_count();
    let daemon = Arc::clone(&state.daemon);
    tokio::task::spawn_blocking(move || daemon.play(&arranged)).await??;

    Ok(Json(PlayResponse {
        id,
        title: song.title.clone(),
        transpose: query.transpose,
        tempo: query.tempo,
        strikes,
    }))
}

async fn list_silence(State(state): State<AppState>) -> Json<Vec<NaiveDate>> {
    Json(state.daemon.silent_days().dates())
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date {:?} (expected YYYY-MM-DD)", raw)))
}

async fn add_silence(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<StatusCode, ApiError> {
    let date = parse_date(&date)?;
    if state.daemon.silent_days().insert(date) {
        info!("{} marked silent", date);
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::OK)
    }
}

async fn remove_silence(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<StatusCode, ApiError> {
    let date = parse_date(&date)?;
    if state.daemon.silent_days().remove(date) {
        info!("{} no longer silent", date);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{} is not a silent day", date)))
    }
}

#[derive(Debug, Deserialize)]
struct PlanQuery {
    /// `HH:MM`
    at: String,
    /// `YYYY-MM-DD`, default today
    date: Option<String>,
}

async fn preview_plan(
    State(state): State<AppState>,
    Query(query): Query<PlanQuery>,
) -> Result<Json<PlanPreview>, ApiError> {
    let time = NaiveTime::parse_from_str(&query.at, "%H:%M")
        .map_err(|_| ApiError::BadRequest(format!("Invalid time {:?} (expected HH:MM)", query.at)))?;
    let date = match query.date {
        Some(raw) => parse_date(&raw)?,
        None => chrono::Local::now().date_naive(),
    };
    // The calendar may go online for a year it has not seen
    let daemon = Arc::clone(&state.daemon);
    let preview = tokio::task::spawn_blocking(move || daemon.preview(date.and_time(time))).await??;
    Ok(Json(preview))
}

/// Serve the operator API until SIGINT or SIGTERM.
pub async fn serve(daemon: Arc<CarillonDaemon>, addr: &str) -> anyhow::Result<()> {
    let app = router(AppState { daemon });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Carillon listening on http://{}", addr);
    info!("   Songs: GET http://{}/songs", addr);
    info!("   Health: GET http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
