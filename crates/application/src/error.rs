use domain::PushEvent;
use thiserror::Error;

/// 向连接句柄的出站队列投递失败的原因。
///
/// 入队永远是非阻塞的：队列满立即失败。和 mpsc 的
/// `TrySendError` 一样把事件还给调用方，由调用方决定丢弃
/// 还是回退到历史缓冲。
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full(PushEvent),
    #[error("outbound queue is closed")]
    Closed(PushEvent),
}

impl EnqueueError {
    /// 取回被拒绝的事件。
    pub fn into_event(self) -> PushEvent {
        match self {
            Self::Full(event) | Self::Closed(event) => event,
        }
    }
}
