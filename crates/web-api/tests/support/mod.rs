use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{HubConfig, PushHub};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn build_router() -> Router {
    let hub = Arc::new(PushHub::new(HubConfig::default()));
    web_api::router(web_api::AppState::new(hub))
}

/// 在随机端口上启动服务，返回地址和优雅关停句柄。
pub async fn start_server() -> (SocketAddr, oneshot::Sender<()>) {
    let router = build_router().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    sleep(Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}

pub async fn connect_ws(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("ws connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, frame: Value) {
    ws.send(TungsteniteMessage::text(frame.to_string()))
        .await
        .expect("send frame");
}

/// 读取下一条文本帧并解析为 JSON，忽略控制帧。
pub async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        if message.is_text() {
            return serde_json::from_str(message.to_text().expect("text")).expect("json frame");
        }
    }
}

/// 断言一段时间内没有任何文本帧到达。
pub async fn assert_silent(ws: &mut WsClient, window: Duration) {
    let result = timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(message)) if message.is_text() => return message,
                Some(_) => continue,
                None => futures_util::future::pending().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}
