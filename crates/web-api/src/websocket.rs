//! WebSocket 升级入口。
//!
//! 身份认证在到达这里之前已经完成（外部协作方职责），
//! 推送层信任入站帧携带的标识。

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::{state::AppState, ws_connection::WebSocketConnection};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state).run())
}
