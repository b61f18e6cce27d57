//! HTTP and WebSocket surface over the dispatcher, ranking, cache and notifier

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error};

use crate::core::{fixture_ref, InlineExample, RequestContext, SubmitCode};
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::notifier::Notifier;
use crate::queue::JudgeReply;
use crate::ranking::RankingEngine;
use crate::repository::ParticipantStanding;
use crate::testcase::{CacheStats, TestCaseCache};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub ranking: Arc<RankingEngine>,
    pub cache: Arc<TestCaseCache>,
    pub notifier: Arc<Notifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/judge/submit", post(submit))
        .route("/api/judge/test", post(test_run))
        .route("/api/competitions/{cid}/standings", get(standings))
        .route("/api/testcases/stats", get(cache_stats))
        .route("/api/testcases/{problem_id}", delete(invalidate_fixture))
        .route("/ws/judge", get(judge_socket))
        .with_state(state)
}

/// Error body shared by every endpoint: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Request failed: {:#}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match &e {
            DispatchError::DuplicateSubmission { .. } => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::QueueTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            DispatchError::Internal(inner) => {
                error!("Dispatch failed: {:#}", inner);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError::new(status, e.to_string())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Caller identity from the headers set by the upstream gateway
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        context_from_headers(&parts.headers)
    }
}

fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Missing or invalid X-User-Id header"))?;
    let user_name = headers
        .get(USER_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Ok(RequestContext { user_id, user_name })
}

async fn submit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<SubmitCode>,
) -> Result<Json<JudgeReply>, DispatchError> {
    state.dispatcher.submit(&ctx, body).await.map(Json)
}

#[derive(Debug, Deserialize)]
struct TestRunBody {
    #[serde(flatten)]
    submission: SubmitCode,
    example: InlineExample,
}

async fn test_run(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<TestRunBody>,
) -> Result<Json<JudgeReply>, DispatchError> {
    state
        .dispatcher
        .test_run(&ctx, body.submission, body.example)
        .await
        .map(Json)
}

async fn standings(
    State(state): State<AppState>,
    Path(cid): Path<i64>,
) -> Result<Json<Vec<ParticipantStanding>>, ApiError> {
    Ok(Json(state.ranking.standings(cid, Utc::now()).await?))
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

async fn invalidate_fixture(
    State(state): State<AppState>,
    Path(problem_id): Path<i64>,
) -> StatusCode {
    state.cache.invalidate(&fixture_ref(problem_id)).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct SocketParams {
    uid: i64,
}

async fn judge_socket(
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let notifier = state.notifier.clone();
    ws.on_upgrade(move |socket| forward_events(socket, notifier, params.uid))
}

/// Relay notifier events to one socket until either side goes away
async fn forward_events(socket: WebSocket, notifier: Arc<Notifier>, user_id: i64) {
    let (connection, mut events) = notifier.register(user_id);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(payload) = event else { break };
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    notifier.unregister(user_id, connection);
    debug!("Socket of user {} closed", user_id);
}
