//! Polled JSON transport
//!
//! Players identify themselves with `name` and `sessionid` headers. State is
//! retrieved through `/status`, which parks the request until the next round
//! broadcast resolves it; `/status/nowait` answers immediately. All
//! responses are JSON and CORS is wide open so any page can host a client.

use crate::catalog::parse_choice;
use crate::player::TransportKind;
use crate::session::{SessionMessage, SubmitOutcome};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, info};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    session: mpsc::UnboundedSender<SessionMessage>,
}

/// Builds the polled-transport router.
pub fn router(session: mpsc::UnboundedSender<SessionMessage>) -> Router {
    Router::new()
        .route("/register-name", get(register_name).post(register_name))
        .route("/start", get(start_info).post(start_info))
        .route("/answer/{choice}", get(submit_answer).post(submit_answer))
        .route("/status", get(status_wait))
        .route("/status/nowait", get(status_nowait))
        .layer(CorsLayer::permissive())
        .with_state(AppState { session })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Creates or overwrites a polled player for the session id.
async fn register_name(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let (name, id) = match (header_str(&headers, "name"), header_str(&headers, "sessionid")) {
        (Some(name), Some(id)) => (name, id),
        _ => return Json(json!({ "success": false })),
    };

    if state
        .session
        .send(SessionMessage::RegisterName {
            id,
            name: name.clone(),
            kind: TransportKind::Polled,
        })
        .is_err()
    {
        return Json(json!({ "success": false }));
    }

    info!("{} - connected", name);
    Json(json!({ "success": true }))
}

async fn start_info(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let snapshot = snapshot(&state).await?;
    Ok(Json(json!({
        "round": snapshot.round,
        "started": snapshot.started,
    })))
}

/// Records an answer. The player is created lazily when the session id is
/// unknown, so a client that raced past registration still scores.
async fn submit_answer(
    State(state): State<AppState>,
    Path(choice): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let choice = match parse_choice(&choice) {
        Some(c) => c,
        None => return Ok(Json(json!({ "success": false }))),
    };
    let id = match header_str(&headers, "sessionid") {
        Some(id) => id,
        None => return Ok(Json(json!({ "success": false }))),
    };
    let name = header_str(&headers, "name");

    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .session
        .send(SessionMessage::SubmitAnswer {
            id,
            name: name.clone(),
            kind: TransportKind::Polled,
            choice,
            reply: reply_tx,
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let outcome = reply_rx
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let success = matches!(outcome, SubmitOutcome::Accepted { .. });

    info!(
        "{} - answer {} ({})",
        name.as_deref().unwrap_or("<anonymous>"),
        choice,
        if success { "accepted" } else { "rejected" }
    );
    Ok(Json(json!({ "success": success, "setTo": choice })))
}

/// Long-poll: parks the request until the next round event resolves it.
/// There is no server-side timeout; a dropped client is detected when the
/// engine tries to resolve the dead responder.
async fn status_wait(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    debug!(
        "{} - waiting for status",
        header_str(&headers, "name").as_deref().unwrap_or("<anonymous>")
    );

    let (responder, rx) = oneshot::channel();
    state
        .session
        .send(SessionMessage::StatusWait { responder })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let payload = rx.await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(payload))
}

async fn status_nowait(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let snapshot = snapshot(&state).await?;
    Ok(Json(json!({
        "scores": snapshot.scores,
        "round": snapshot.round,
        "started": snapshot.started,
    })))
}

async fn snapshot(state: &AppState) -> Result<crate::session::SessionSnapshot, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .session
        .send(SessionMessage::Snapshot { reply: reply_tx })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    reply_rx.await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
