//! 推送系统核心领域模型
//!
//! 包含接收方标识、推送事件等核心类型，以及连接能力的定义。

pub mod errors;
pub mod event;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use event::*;
pub use value_objects::*;
