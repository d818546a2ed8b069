//! WebSocket 连接会话。
//!
//! 封装单个 WebSocket 连接的状态和逻辑：入站帧解析、
//! 加入/重入推送中枢、系统连接的转发，以及断开时的清理。
//! 所有对 socket 写端的访问都收拢到一个命令任务里。

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use application::{ConnectionHandle, DeliverOutcome, EventSink, SinkError};
use domain::{Capabilities, Identity, PushEvent};

use crate::state::AppState;

/// 入站帧。每一帧都声明自己的标识；`target` 只在持有转发
/// 能力的连接上生效。`payload` 对推送层不透明。
#[derive(Debug, Deserialize)]
struct InboundFrame {
    identity: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// 出站帧：来源（可选）加原样载荷。
#[derive(Debug, Serialize)]
struct OutboundFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<Identity>,
    payload: Value,
}

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Vec<u8>),
}

/// 中枢投递循环写出事件的 sink：序列化成出站帧后交给
/// 命令任务。命令通道关闭意味着写端已不可用。
struct WsEventSink {
    cmd_tx: mpsc::Sender<WsCommand>,
}

#[async_trait]
impl EventSink for WsEventSink {
    async fn send(&mut self, event: PushEvent) -> Result<(), SinkError> {
        let frame = OutboundFrame {
            origin: event.origin().cloned(),
            payload: event.payload().clone(),
        };
        let text = serde_json::to_string(&frame).map_err(|err| SinkError::failed(err.to_string()))?;
        self.cmd_tx
            .send(WsCommand::SendText(text))
            .await
            .map_err(|_| SinkError::failed("websocket writer task is gone"))
    }
}

/// 会话建立前永远挂起，建立后跟随句柄的关停信号。
async fn wait_closed(session: Option<&Session>) {
    match session {
        Some(session) => session.handle.closed().await,
        None => futures_util::future::pending().await,
    }
}

/// 一条连接加入中枢后的会话状态。
struct Session {
    identity: Identity,
    capabilities: Capabilities,
    handle: ConnectionHandle,
}

pub struct WebSocketConnection {
    socket: Option<WebSocket>,
    state: AppState,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        Self {
            socket: Some(socket),
            state,
        }
    }

    /// 运行 WebSocket 连接的主循环。
    ///
    /// 第一条合法帧把连接接入中枢；之后的帧只用于系统连接的
    /// 转发。socket 读端结束后关停连接句柄，投递循环随之退出
    /// 并完成注销。
    pub async fn run(mut self) {
        let socket = self.socket.take().expect("socket should be available");
        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let send_task = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WsCommand::SendText(text) => {
                        if sender.send(WsMessage::Text(text.into())).await.is_err() {
                            tracing::warn!("Failed to send text message");
                            break;
                        }
                    }
                    WsCommand::SendPong(data) => {
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            tracing::warn!("Failed to send pong message");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        let mut session: Option<Session> = None;
        loop {
            tokio::select! {
                maybe = incoming.next() => {
                    match maybe {
                        Some(Ok(message)) => {
                            if self
                                .handle_incoming(message, &cmd_tx, &mut session)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        _ => break,
                    }
                }
                // 句柄被顶替（或中枢侧关停）时关闭这条 socket
                _ = wait_closed(session.as_ref()) => {
                    tracing::info!("连接句柄已关停，关闭 WebSocket");
                    break;
                }
            }
        }

        if let Some(session) = session {
            session.handle.close();
            tracing::info!(identity = %session.identity, "WebSocket连接已断开，连接句柄已关停");
        }

        // 丢掉本地的命令发送端；投递循环退出后写任务自然结束
        drop(cmd_tx);
        let _ = send_task.await;
    }

    /// 处理来自客户端的单条消息。
    async fn handle_incoming(
        &mut self,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
        session: &mut Option<Session>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {
                tracing::debug!("收到pong消息");
            }
            WsMessage::Binary(_) => {
                // 协议只接受 JSON 文本帧
                tracing::debug!("忽略二进制帧");
            }
            WsMessage::Text(text) => {
                let frame: InboundFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(error = %err, "入站帧解析失败，已忽略");
                        return Ok(());
                    }
                };
                self.handle_frame(frame, cmd_tx, session).await;
            }
        }
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: InboundFrame,
        cmd_tx: &mpsc::Sender<WsCommand>,
        session: &mut Option<Session>,
    ) {
        let identity = match Identity::new(frame.identity) {
            Ok(identity) => identity,
            Err(err) => {
                tracing::warn!(error = %err, "入站帧标识非法，已忽略");
                return;
            }
        };

        match session {
            None => {
                let capabilities = Capabilities::for_identity(&identity);
                let sink = Box::new(WsEventSink {
                    cmd_tx: cmd_tx.clone(),
                });
                let handle = self
                    .state
                    .hub
                    .join_or_rejoin(identity.clone(), sink)
                    .await;
                tracing::info!(identity = %identity, "WebSocket 连接已建立");
                *session = Some(Session {
                    identity,
                    capabilities,
                    handle,
                });
            }
            Some(session) if session.identity != identity => {
                tracing::warn!(
                    claimed = %identity,
                    joined = %session.identity,
                    "帧声明的标识与连接不符，已忽略"
                );
                return;
            }
            Some(_) => {}
        }

        if let Some(target) = frame.target {
            let session = session.as_ref().expect("session was just established");
            self.relay(session, target, frame.payload).await;
        }
    }

    /// 系统连接的扇出：把携带 `target` 的帧作为事件投递出去。
    async fn relay(&mut self, session: &Session, target: String, payload: Value) {
        if !session.capabilities.can_relay() {
            tracing::warn!(identity = %session.identity, "无转发能力的连接指定了 target，已忽略");
            return;
        }

        let target = match Identity::new(target) {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(error = %err, "转发目标非法，已忽略");
                return;
            }
        };

        let event = PushEvent::new(target.clone(), payload).with_origin(session.identity.clone());
        match self.state.hub.deliver(event).await {
            DeliverOutcome::Dropped => {
                tracing::warn!(target = %target, "转发事件被丢弃（队列满）");
            }
            outcome => {
                tracing::debug!(target = %target, ?outcome, "转发事件已交付中枢");
            }
        }
    }
}
