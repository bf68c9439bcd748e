use crate::core::CoreEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use moodflow_proto::mood::Mood;
use moodflow_proto::protocol::{Command, PlayerSnapshot};
use moodflow_proto::state::StateManager;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state: StateManager,
    event_tx: mpsc::Sender<CoreEvent>,
}

#[derive(Serialize)]
struct MoodInfo {
    slug: &'static str,
    label: &'static str,
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

#[derive(Deserialize)]
struct CredentialBody {
    token: String,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: StateManager,
    event_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app_state = HttpState { state, event_tx };

        let app = Router::new()
            .route("/api/state", get(get_state))
            .route("/api/moods", get(get_moods))
            .route("/api/mood/:slug", post(select_mood))
            .route("/api/toggle", post(toggle_pause))
            .route("/api/stop", post(stop))
            .route("/api/credential", post(set_credential))
            .with_state(app_state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerSnapshot> {
    Json(state.state.snapshot().await)
}

async fn get_moods() -> Json<Vec<MoodInfo>> {
    Json(
        Mood::ALL
            .iter()
            .map(|m| MoodInfo {
                slug: m.slug(),
                label: m.label(),
            })
            .collect(),
    )
}

async fn select_mood(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    // Validate up front so the caller gets a 400 instead of a
    // broadcast-only error.
    if slug.parse::<Mood>().is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: format!(
                    "unknown mood '{}', valid moods: {}",
                    slug,
                    Mood::ALL
                        .iter()
                        .map(|m| m.slug())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }),
        ));
    }

    info!("HTTP API: Select mood {}", slug);
    let cmd = Command::SelectMood { mood: slug };
    if state
        .event_tx
        .send(CoreEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to send mood command");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "player core is not running".to_string(),
            }),
        ));
    }
    Ok(StatusCode::OK)
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle pause");
    if state
        .event_tx
        .send(CoreEvent::ClientCommand(Command::TogglePause))
        .await
        .is_err()
    {
        error!("Failed to send toggle command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    if state
        .event_tx
        .send(CoreEvent::ClientCommand(Command::Stop))
        .await
        .is_err()
    {
        error!("Failed to send stop command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn set_credential(
    State(state): State<HttpState>,
    Json(body): Json<CredentialBody>,
) -> StatusCode {
    // Never log the token itself.
    info!("HTTP API: Set credential");
    let cmd = Command::SetCredential { token: body.token };
    if state
        .event_tx
        .send(CoreEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to send credential command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}
