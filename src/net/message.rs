//! 线上报文
//!
//! 每条报文独占一条 TCP 连接：发送方写入一个 JSON 信封后关闭连接，无确认。
//! 零长度连接是可达性探测，不是报文。

use super::id::PeerId;
use crate::sim::{Clock, Event};
use serde::{Deserialize, Serialize};

/// 报文种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Event,
    LookAheadRequest,
    LookAhead,
    Kill,
}

/// 报文信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// 边界事件，`event.transition` 已解码为接收方的本地（全局）id
    Event { sender: PeerId, event: Event },
    /// lookahead 请求，携带请求方自身的最坏发射时间
    LookAheadRequest { sender: PeerId, time: Clock },
    /// lookahead 应答
    LookAhead { sender: PeerId, time: Clock },
    Kill { sender: PeerId },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Event { .. } => MessageKind::Event,
            Message::LookAheadRequest { .. } => MessageKind::LookAheadRequest,
            Message::LookAhead { .. } => MessageKind::LookAhead,
            Message::Kill { .. } => MessageKind::Kill,
        }
    }

    pub fn sender(&self) -> PeerId {
        match self {
            Message::Event { sender, .. }
            | Message::LookAheadRequest { sender, .. }
            | Message::LookAhead { sender, .. }
            | Message::Kill { sender } => *sender,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 解码一条连接上的全部字节；空负载（探测）返回 `Ok(None)`
    pub fn decode(bytes: &[u8]) -> Result<Option<Message>, serde_json::Error> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(bytes).map(Some)
    }
}
