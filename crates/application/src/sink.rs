use async_trait::async_trait;
use domain::PushEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink failed: {0}")]
    Failed(String),
}

impl SinkError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 投递循环写出事件的传输接缝。
///
/// Web 层用 WebSocket 写任务实现它；测试里用收集事件的
/// 假实现。返回错误意味着底层流已不可用，投递循环随之结束。
#[async_trait]
pub trait EventSink: Send + 'static {
    async fn send(&mut self, event: PushEvent) -> Result<(), SinkError>;
}
