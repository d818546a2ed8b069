//! 单槽历史缓冲。
//!
//! 为没有存活连接的标识保留最近一条未投递事件。容量固定为
//! 每标识一槽，后写覆盖先写（沿用既有语义，扩大缓冲会改变
//! 投递语义，属产品决策）。

use std::collections::HashMap;

use domain::{Identity, PushEvent};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct HistoryBuffer {
    slots: RwLock<HashMap<Identity, PushEvent>>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 存入事件，覆盖该标识已有的缓冲。O(1)。
    pub async fn store(&self, event: PushEvent) {
        let identity = event.target().clone();
        let mut slots = self.slots.write().await;
        if slots.insert(identity.clone(), event).is_some() {
            debug!(identity = %identity, "历史缓冲被新事件覆盖");
        }
    }

    /// 原子地取出并移除缓冲事件。连接建立时调用一次，保证
    /// 缓冲事件先于任何新到的实时事件投递。
    pub async fn take_if_present(&self, identity: &Identity) -> Option<PushEvent> {
        let mut slots = self.slots.write().await;
        slots.remove(identity)
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}
