use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// 保留的系统标识，用于管理端广播/转发连接。
pub const SYSTEM_IDENTITY: &str = "system";

/// 事件接收方的唯一标识。
///
/// 对推送层来说这只是一个不透明的字符串键（通常是用户ID，
/// 或保留的 `system` 转发标识）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// 创建一个标识，空字符串视为非法。
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::invalid_identity("identity must not be empty"));
        }
        Ok(Self(value))
    }

    /// 保留的系统标识。
    pub fn system() -> Self {
        Self(SYSTEM_IDENTITY.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_IDENTITY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 连接能力。
///
/// 每个连接始终是自身标识的接收方；只有保留的系统标识
/// 额外持有转发能力，可以把携带 `target` 的入站帧分发给
/// 其他标识。用显式能力建模，避免魔法字符串比较散落各处。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    relay: bool,
}

impl Capabilities {
    /// 普通接收方能力。
    pub fn recipient() -> Self {
        Self { relay: false }
    }

    /// 接收方 + 转发能力。
    pub fn relayer() -> Self {
        Self { relay: true }
    }

    /// 根据标识推导连接能力。
    pub fn for_identity(identity: &Identity) -> Self {
        if identity.is_system() {
            Self::relayer()
        } else {
            Self::recipient()
        }
    }

    pub fn can_relay(&self) -> bool {
        self.relay
    }
}
