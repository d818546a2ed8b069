//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 推送中枢队列容量

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 推送中枢配置
    pub hub: HubConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 推送中枢配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// 用户连接出站队列容量
    pub user_queue_capacity: usize,
    /// 系统连接出站队列容量
    pub system_queue_capacity: usize,
}

impl AppConfig {
    /// 从环境变量加载配置。
    /// 所有项都有安全的默认值：推送中枢不持有任何密钥或外部
    /// 存储连接，重启后状态从零重建。
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8080),
            },
            hub: HubConfig {
                user_queue_capacity: env::var("HUB_USER_QUEUE_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8),
                system_queue_capacity: env::var("HUB_SYSTEM_QUEUE_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(16),
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            hub: HubConfig {
                user_queue_capacity: 8,
                system_queue_capacity: 16,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capacities_match_documented_constants() {
        let config = AppConfig::default();
        assert_eq!(config.hub.user_queue_capacity, 8);
        assert_eq!(config.hub.system_queue_capacity, 16);
    }
}
