//! 推送中枢。
//!
//! 持有注册表和历史缓冲，协调连接的建立、顶替和拆除。
//! 生产者只需要 `deliver` 一个入口；新打开的流通过
//! `join_or_rejoin` 接入。

use std::sync::Arc;

use domain::{Capabilities, Identity, PushEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{spawn_delivery_loop, ConnectionHandle};
use crate::error::EnqueueError;
use crate::history::HistoryBuffer;
use crate::registry::Registry;
use crate::sink::EventSink;

/// 中枢配置。
///
/// 出站队列容量按事件类别区分：普通用户连接和系统转发连接。
/// 旧实现在不同调用点硬编码 5 和 10，这里统一成两个有文档的
/// 常量，可经配置覆盖。
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// 用户连接的出站队列槽数。
    pub user_queue_capacity: usize,
    /// 系统转发连接的出站队列槽数。
    pub system_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            user_queue_capacity: 8,
            system_queue_capacity: 16,
        }
    }
}

/// `deliver` 的结果，对生产者可见以便记录丢弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverOutcome {
    /// 已进入存活连接的出站队列。
    Enqueued,
    /// 目标离线，存入历史缓冲（覆盖旧缓冲）。
    Buffered,
    /// 队列满，事件被丢弃。非致命，不重试。
    Dropped,
}

pub struct PushHub {
    registry: Arc<Registry>,
    history: HistoryBuffer,
    config: HubConfig,
}

impl PushHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            history: HistoryBuffer::new(),
            config,
        }
    }

    pub async fn is_connected(&self, identity: &Identity) -> bool {
        self.registry.lookup(identity).await.is_some()
    }

    /// 把事件交给目标标识。
    ///
    /// 目标在线则非阻塞入队；队列满丢弃并告警（生产者的请求
    /// 处理不应因为慢消费者失败）；目标离线则进历史缓冲。
    pub async fn deliver(&self, event: PushEvent) -> DeliverOutcome {
        let target = event.target().clone();
        match self.registry.lookup(&target).await {
            Some(handle) => match handle.enqueue(event) {
                Ok(()) => DeliverOutcome::Enqueued,
                Err(EnqueueError::Full(_)) => {
                    warn!(identity = %target, "出站队列已满，事件被丢弃");
                    DeliverOutcome::Dropped
                }
                Err(err @ EnqueueError::Closed(_)) => {
                    // 连接正在拆除，等同于目标离线
                    debug!(identity = %target, "连接已关闭，事件转入历史缓冲");
                    self.history.store(err.into_event()).await;
                    DeliverOutcome::Buffered
                }
            },
            None => {
                self.history.store(event).await;
                DeliverOutcome::Buffered
            }
        }
    }

    /// 为新打开的流建立（或重建）连接。
    ///
    /// 安装新句柄并关停被顶替的旧句柄；在投递循环启动之前
    /// 回放历史缓冲事件，保证它先于任何后续实时事件到达。
    pub async fn join_or_rejoin(
        &self,
        identity: Identity,
        sink: Box<dyn EventSink>,
    ) -> ConnectionHandle {
        let capacity = if Capabilities::for_identity(&identity).can_relay() {
            self.config.system_queue_capacity
        } else {
            self.config.user_queue_capacity
        };

        let (handle, channels) = ConnectionHandle::new(identity.clone(), capacity);

        if let Some(superseded) = self.registry.register(handle.clone()).await {
            info!(
                identity = %identity,
                superseded = %superseded.connection_id(),
                "同一标识的旧连接被顶替"
            );
            superseded.close();
        }

        if let Some(pending) = self.history.take_if_present(&identity).await {
            // 新队列必然有空槽，失败只可能是容量配置成了 0
            if handle.enqueue(pending).is_err() {
                warn!(identity = %identity, "历史缓冲事件回放失败");
            }
        }

        spawn_delivery_loop(&handle, channels, sink, Arc::clone(&self.registry));

        info!(
            identity = %identity,
            connection_id = %handle.connection_id(),
            "连接加入推送中枢"
        );
        handle
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn history(&self) -> &HistoryBuffer {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    struct CollectingSink {
        tx: mpsc::UnboundedSender<PushEvent>,
    }

    #[async_trait]
    impl EventSink for CollectingSink {
        async fn send(&mut self, event: PushEvent) -> Result<(), SinkError> {
            self.tx
                .send(event)
                .map_err(|_| SinkError::failed("collector dropped"))
        }
    }

    /// 第一次写入时卡住，用于把队列填满。
    struct StallSink {
        entered: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl EventSink for StallSink {
        async fn send(&mut self, _event: PushEvent) -> Result<(), SinkError> {
            let _ = self.entered.send(());
            futures::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn send(&mut self, _event: PushEvent) -> Result<(), SinkError> {
            Err(SinkError::failed("stream is gone"))
        }
    }

    fn identity(value: &str) -> Identity {
        Identity::new(value).unwrap()
    }

    fn event(target: &str, tag: &str) -> PushEvent {
        PushEvent::new(identity(target), json!({ "tag": tag }))
    }

    fn collector() -> (Box<CollectingSink>, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(CollectingSink { tx }), rx)
    }

    async fn recv_tag(rx: &mut mpsc::UnboundedReceiver<PushEvent>) -> String {
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("sink channel closed");
        event.payload()["tag"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn live_events_are_delivered_in_order() {
        let hub = PushHub::new(HubConfig::default());
        let (sink, mut rx) = collector();
        hub.join_or_rejoin(identity("u1"), sink).await;

        for tag in ["e1", "e2", "e3"] {
            assert_eq!(hub.deliver(event("u1", tag)).await, DeliverOutcome::Enqueued);
        }

        assert_eq!(recv_tag(&mut rx).await, "e1");
        assert_eq!(recv_tag(&mut rx).await, "e2");
        assert_eq!(recv_tag(&mut rx).await, "e3");
    }

    #[tokio::test]
    async fn offline_events_are_buffered_last_write_wins_and_replayed_first() {
        let hub = PushHub::new(HubConfig::default());

        assert_eq!(hub.deliver(event("u1", "a")).await, DeliverOutcome::Buffered);
        assert_eq!(hub.deliver(event("u1", "b")).await, DeliverOutcome::Buffered);

        let (sink, mut rx) = collector();
        hub.join_or_rejoin(identity("u1"), sink).await;
        assert_eq!(hub.deliver(event("u1", "c")).await, DeliverOutcome::Enqueued);

        // 只剩最后一条缓冲事件，且先于加入后的实时事件
        assert_eq!(recv_tag(&mut rx).await, "b");
        assert_eq!(recv_tag(&mut rx).await, "c");
        assert_eq!(hub.history().len().await, 0);
    }

    #[tokio::test]
    async fn superseded_connection_is_stopped_and_discarded() {
        let hub = PushHub::new(HubConfig::default());
        let (sink1, mut rx1) = collector();
        let old = hub.join_or_rejoin(identity("u1"), sink1).await;

        assert_eq!(hub.deliver(event("u1", "e1")).await, DeliverOutcome::Enqueued);
        assert_eq!(recv_tag(&mut rx1).await, "e1");

        let (sink2, mut rx2) = collector();
        let new = hub.join_or_rejoin(identity("u1"), sink2).await;
        timeout(Duration::from_secs(1), old.stopped())
            .await
            .expect("superseded delivery loop did not stop");

        assert_eq!(hub.deliver(event("u1", "e2")).await, DeliverOutcome::Enqueued);
        assert_eq!(recv_tag(&mut rx2).await, "e2");
        assert!(rx1.try_recv().is_err());

        let current = hub.registry().lookup(&identity("u1")).await.unwrap();
        assert_eq!(current.connection_id(), new.connection_id());
        assert_eq!(hub.registry().len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_joins_leave_exactly_one_live_handle() {
        let hub = Arc::new(PushHub::new(HubConfig::default()));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let hub = Arc::clone(&hub);
            joins.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = hub
                    .join_or_rejoin(identity("u1"), Box::new(CollectingSink { tx }))
                    .await;
                (handle, rx)
            }));
        }

        let mut sessions = Vec::new();
        for join in joins {
            sessions.push(join.await.unwrap());
        }

        assert_eq!(hub.registry().len().await, 1);
        let current = hub.registry().lookup(&identity("u1")).await.unwrap();

        // 其余 7 个投递循环必须都已停止
        for (handle, _) in &sessions {
            if handle.connection_id() != current.connection_id() {
                timeout(Duration::from_secs(1), handle.stopped())
                    .await
                    .expect("losing delivery loop did not stop");
            }
        }

        assert_eq!(hub.deliver(event("u1", "only")).await, DeliverOutcome::Enqueued);
        sleep(Duration::from_millis(50)).await;

        let mut received = 0;
        for (_, rx) in sessions.iter_mut() {
            while rx.try_recv().is_ok() {
                received += 1;
            }
        }
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn teardown_falls_back_to_history() {
        let hub = PushHub::new(HubConfig::default());
        let (sink, _rx) = collector();
        let handle = hub.join_or_rejoin(identity("u1"), sink).await;

        handle.close();
        timeout(Duration::from_secs(1), handle.stopped())
            .await
            .expect("delivery loop did not stop");

        assert!(!hub.is_connected(&identity("u1")).await);
        assert_eq!(hub.deliver(event("u1", "late")).await, DeliverOutcome::Buffered);
        assert_eq!(hub.history().len().await, 1);
    }

    #[tokio::test]
    async fn events_never_leak_across_identities() {
        let hub = PushHub::new(HubConfig::default());
        let (sink_a, mut rx_a) = collector();
        let (sink_b, mut rx_b) = collector();
        hub.join_or_rejoin(identity("a"), sink_a).await;
        hub.join_or_rejoin(identity("b"), sink_b).await;

        assert_eq!(hub.deliver(event("a", "for-a")).await, DeliverOutcome::Enqueued);
        assert_eq!(recv_tag(&mut rx_a).await, "for-a");

        sleep(Duration::from_millis(20)).await;
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_events_without_blocking_producers() {
        let hub = PushHub::new(HubConfig {
            user_queue_capacity: 1,
            system_queue_capacity: 16,
        });
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        hub.join_or_rejoin(identity("u1"), Box::new(StallSink { entered: entered_tx }))
            .await;

        // 第一条事件被投递循环取走并卡在 sink 里
        assert_eq!(hub.deliver(event("u1", "e1")).await, DeliverOutcome::Enqueued);
        timeout(Duration::from_secs(1), entered_rx.recv())
            .await
            .expect("sink was never entered");

        // 第二条占满唯一的队列槽，第三条被丢弃
        assert_eq!(hub.deliver(event("u1", "e2")).await, DeliverOutcome::Enqueued);
        assert_eq!(hub.deliver(event("u1", "e3")).await, DeliverOutcome::Dropped);
    }

    #[tokio::test]
    async fn sink_failure_tears_the_connection_down() {
        let hub = PushHub::new(HubConfig::default());
        hub.join_or_rejoin(identity("u1"), Box::new(FailingSink)).await;

        assert_eq!(hub.deliver(event("u1", "boom")).await, DeliverOutcome::Enqueued);

        for _ in 0..100 {
            if !hub.is_connected(&identity("u1")).await {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!hub.is_connected(&identity("u1")).await);
    }

    #[tokio::test]
    async fn system_identity_gets_the_larger_queue() {
        let hub = PushHub::new(HubConfig {
            user_queue_capacity: 1,
            system_queue_capacity: 4,
        });
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        hub.join_or_rejoin(Identity::system(), Box::new(StallSink { entered: entered_tx }))
            .await;

        assert_eq!(
            hub.deliver(PushEvent::new(Identity::system(), json!({})))
                .await,
            DeliverOutcome::Enqueued
        );
        timeout(Duration::from_secs(1), entered_rx.recv())
            .await
            .expect("sink was never entered");

        // 用户容量只有 1，但系统连接仍能排进 4 条
        for _ in 0..4 {
            assert_eq!(
                hub.deliver(PushEvent::new(Identity::system(), json!({})))
                    .await,
                DeliverOutcome::Enqueued
            );
        }
        assert_eq!(
            hub.deliver(PushEvent::new(Identity::system(), json!({})))
                .await,
            DeliverOutcome::Dropped
        );
    }
}
