//! Web API 层。
//!
//! 提供 Axum 路由，把 WebSocket 流接入推送中枢，并为进程外
//! 生产者暴露事件触发端点。

mod error;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use routes::router;
pub use state::AppState;
