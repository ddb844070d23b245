//! # Session Broker
//!
//! 连接协商：在消费者与机器人实例的生产者之间中继握手消息。
//!
//! ## 状态机
//!
//! `REQUESTED → OFFERED → ANSWERED → ICE_EXCHANGING → CONNECTED`，
//! 校验失败、超时或对端拒绝进入 `FAILED`，拆除进入 `CLOSED`。
//!
//! - 每个连接尝试在 `REQUESTED` 时预留注册表容量，`CONNECTED` 时提交
//! - 终止状态释放预留或连接，并从 broker 中移除
//! - 每个推进握手的消息都会重置握手超时

mod broker;
mod error;
mod mailbox;
mod state;

pub use broker::{ConnectionEvent, LivenessReport, SessionBroker};
pub use error::BrokerError;
pub use mailbox::PeerMailbox;
pub use state::{ConnectionState, FailureReason};
