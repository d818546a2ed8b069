//! 主应用程序入口
//!
//! 启动推送中枢和 Axum Web API 服务。

use std::sync::Arc;

use application::{HubConfig, PushHub};
use config::AppConfig;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();

    // 中枢状态完全在内存里，进程重启后客户端重连即可重建
    let hub = Arc::new(PushHub::new(HubConfig {
        user_queue_capacity: config.hub.user_queue_capacity,
        system_queue_capacity: config.hub.system_queue_capacity,
    }));

    let state = AppState::new(hub);
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("推送服务器启动在 http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
