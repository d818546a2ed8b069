//! 连接句柄与投递循环。
//!
//! 每条存活连接对应一个句柄和一个投递任务。句柄持有有界
//! 出站队列的发送端、关停信号和任务句柄；投递循环持有
//! 接收端，把事件写到 `EventSink`，直到流关闭或被顶替。

use std::sync::{Arc, Mutex};

use domain::{Identity, PushEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EnqueueError;
use crate::registry::Registry;
use crate::sink::EventSink;

/// 存活连接的句柄。
///
/// 克隆开销很小（内部是 Arc）；注册表中保存一份，传输层
/// 保存一份用于在流结束时主动关停。
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    identity: Identity,
    connection_id: Uuid,
    queue: mpsc::Sender<PushEvent>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// 投递循环一侧的通道端，`spawn_delivery_loop` 消费。
pub(crate) struct DeliveryChannels {
    queue: mpsc::Receiver<PushEvent>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// 创建句柄和配套的投递端通道。`capacity` 是出站队列槽数。
    pub(crate) fn new(identity: Identity, capacity: usize) -> (Self, DeliveryChannels) {
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(HandleInner {
                identity,
                connection_id: Uuid::new_v4(),
                queue: queue_tx,
                shutdown: shutdown_tx,
                task: Mutex::new(None),
            }),
        };
        (
            handle,
            DeliveryChannels {
                queue: queue_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn connection_id(&self) -> Uuid {
        self.inner.connection_id
    }

    /// 非阻塞入队。队列满或已关闭立即失败，不会阻塞生产者。
    pub fn enqueue(&self, event: PushEvent) -> Result<(), EnqueueError> {
        self.inner.queue.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(event) => EnqueueError::Full(event),
            mpsc::error::TrySendError::Closed(event) => EnqueueError::Closed(event),
        })
    }

    /// 发出关停信号。投递循环在下一个调度点观察到并退出。
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// 等待关停信号（顶替或主动关闭）。传输层用它在连接被
    /// 顶替时及时关闭底层 socket。
    pub async fn closed(&self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            if *shutdown.borrow() {
                return;
            }
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    /// 等待投递任务结束。关停后用于确认资源已释放。
    pub async fn stopped(&self) {
        let task = self
            .inner
            .task
            .lock()
            .expect("task slot lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn attach_task(&self, task: JoinHandle<()>) {
        *self.inner.task.lock().expect("task slot lock poisoned") = Some(task);
    }
}

/// 启动连接的投递循环。
///
/// 循环体只做两件事：等下一个队列事件或关停信号，把事件写到
/// sink。写失败、流关闭或收到关停都会结束循环，随后做条件
/// 注销（只会移除仍指向本连接的注册表项）并丢弃队列余量。
pub(crate) fn spawn_delivery_loop(
    handle: &ConnectionHandle,
    channels: DeliveryChannels,
    sink: Box<dyn EventSink>,
    registry: Arc<Registry>,
) {
    let identity = handle.identity().clone();
    let connection_id = handle.connection_id();
    let task = tokio::spawn(run_delivery_loop(
        identity,
        connection_id,
        channels,
        sink,
        registry,
    ));
    handle.attach_task(task);
}

async fn run_delivery_loop(
    identity: Identity,
    connection_id: Uuid,
    mut channels: DeliveryChannels,
    mut sink: Box<dyn EventSink>,
    registry: Arc<Registry>,
) {
    loop {
        tokio::select! {
            // 关停优先于排队事件，被顶替的连接不再写任何东西
            biased;
            changed = channels.shutdown.changed() => {
                if changed.is_err() || *channels.shutdown.borrow() {
                    debug!(identity = %identity, "投递循环收到关停信号");
                    break;
                }
            }
            maybe_event = channels.queue.recv() => {
                match maybe_event {
                    Some(event) => {
                        if let Err(err) = sink.send(event).await {
                            warn!(identity = %identity, error = %err, "写出事件失败，结束投递循环");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    registry.unregister_if_current(&identity, connection_id).await;
    channels.queue.close();
    debug!(identity = %identity, connection_id = %connection_id, "投递循环结束");
}
