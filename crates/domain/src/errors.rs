//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 接收方标识错误
    #[error("标识无效: {reason}")]
    InvalidIdentity { reason: String },
}

impl DomainError {
    pub fn invalid_identity(reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            reason: reason.into(),
        }
    }
}
