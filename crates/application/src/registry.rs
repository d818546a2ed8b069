//! 连接注册表。
//!
//! 进程级的“谁在线”唯一事实来源：标识 → 连接句柄。所有
//! 变更都经过内部的同一把锁，临界区只有 map 操作，任何
//! I/O 都发生在锁外的投递循环里。

use std::collections::HashMap;

use domain::Identity;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::connection::ConnectionHandle;

#[derive(Default)]
pub struct Registry {
    connections: RwLock<HashMap<Identity, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子安装句柄，返回同一标识上被顶替的旧句柄（若有），
    /// 由调用方负责关停。不变式：任一时刻每个标识至多一个
    /// 存活句柄。
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let identity = handle.identity().clone();
        let mut connections = self.connections.write().await;
        connections.insert(identity, handle)
    }

    pub async fn lookup(&self, identity: &Identity) -> Option<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections.get(identity).cloned()
    }

    /// 条件注销：只有注册表仍指向 `connection_id` 对应的连接
    /// 才移除。迟到的拆除不会误伤随后抢注进来的新连接。
    pub async fn unregister_if_current(&self, identity: &Identity, connection_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(identity) {
            Some(current) if current.connection_id() == connection_id => {
                connections.remove(identity);
                debug!(identity = %identity, "连接已从注册表移除");
                true
            }
            Some(_) => {
                debug!(identity = %identity, "忽略过期连接的注销请求");
                false
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
