use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::Identity;

/// 推送事件。
///
/// 创建后不可变：`target` 指明接收方，`origin` 指明来源
/// （可选），`payload` 对推送层完全不透明，原样转发。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    target: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<Identity>,
    payload: Value,
}

impl PushEvent {
    pub fn new(target: Identity, payload: Value) -> Self {
        Self {
            target,
            origin: None,
            payload,
        }
    }

    pub fn with_origin(mut self, origin: Identity) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn target(&self) -> &Identity {
        &self.target
    }

    pub fn origin(&self) -> Option<&Identity> {
        self.origin.as_ref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}
