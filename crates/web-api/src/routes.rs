use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::DeliverOutcome;
use domain::{Identity, PushEvent};

use crate::{error::ApiError, state::AppState, websocket};

/// 进程外生产者的事件触发请求。
#[derive(Debug, Deserialize)]
struct TriggerEventPayload {
    identity: String,
    origin: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Serialize)]
struct TriggerEventResponse {
    outcome: DeliverOutcome,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::ws_handler))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/events", post(trigger_event))
}

async fn health() -> &'static str {
    "ok"
}

/// 生产者入口：把一条事件交给目标标识。
///
/// 结果原样返回给调用方，队列满导致的丢弃在这里只是一个
/// 可记录的结果，不是错误。
async fn trigger_event(
    State(state): State<AppState>,
    Json(payload): Json<TriggerEventPayload>,
) -> Result<Json<TriggerEventResponse>, ApiError> {
    let target =
        Identity::new(payload.identity).map_err(|err| ApiError::bad_request(err.to_string()))?;

    let mut event = PushEvent::new(target, payload.payload);
    if let Some(origin) = payload.origin {
        let origin =
            Identity::new(origin).map_err(|err| ApiError::bad_request(err.to_string()))?;
        event = event.with_origin(origin);
    }

    let outcome = state.hub.deliver(event).await;
    Ok(Json(TriggerEventResponse { outcome }))
}
