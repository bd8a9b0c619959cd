//! 网络模块
//!
//! 分区标识、线上报文、核心与传输层之间的车道，以及基于 TCP 的传输适配器。

mod id;
mod lanes;
mod message;
mod transport;

pub use id::PeerId;
pub use lanes::{Arrival, Inbound, InboundSenders, Outgoing, inbound_lanes};
pub use message::{Message, MessageKind};
pub use transport::{TcpTransport, broadcast_kill, drain, send_message, wait_for_peers};

#[cfg(test)]
pub(crate) use transport::read_message;
