//! 推送中枢应用层。
//!
//! 这里实现实时事件中继的核心：注册表（标识 → 连接句柄）、
//! 单槽历史缓冲、按连接的投递循环，以及生产者调用的
//! `deliver` / `join_or_rejoin` 入口。对外部传输层只暴露
//! `EventSink` 这一个接缝。

pub mod connection;
pub mod error;
pub mod history;
pub mod hub;
pub mod registry;
pub mod sink;

pub use connection::ConnectionHandle;
pub use error::EnqueueError;
pub use history::HistoryBuffer;
pub use hub::{DeliverOutcome, HubConfig, PushHub};
pub use registry::Registry;
pub use sink::{EventSink, SinkError};
