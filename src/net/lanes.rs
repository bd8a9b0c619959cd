//! 核心与传输适配器之间的类型化通道
//!
//! 入站报文按到达顺序进入同一条 [`Arrival`] 车道，由吸收任务依次处理：
//! 事件先写入事件表，之后到达的 lookahead 请求/应答才会转交协调任务。
//! 出站方向是一条 [`Outgoing`] 通道。核心只看得到这些通道。

use super::id::PeerId;
use crate::sim::{Clock, Event, LookAhead};
use tokio::sync::mpsc;

/// 核心交给传输层的出站动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// 边界事件；`transition` 为已解码的全局 id，由传输层找到其所属分区
    Event(Event),
    /// 向 `to` 请求 lookahead，`time` 为本 LP 的最坏发射时间
    Request { to: PeerId, time: Clock },
    Reply { to: PeerId, time: Clock },
    /// 广播给其他所有分区
    Kill,
}

/// 传输层交给核心的入站报文（`Kill` 由传输层直接处理）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    Event { from: PeerId, event: Event },
    /// `time` 为请求方的最坏发射时间
    Request(LookAhead),
    Reply(LookAhead),
}

/// 入站车道的接收端（核心持有）
#[derive(Debug)]
pub struct Inbound {
    pub arrivals: mpsc::UnboundedReceiver<Arrival>,
}

/// 入站车道的发送端（传输层持有）
#[derive(Debug, Clone)]
pub struct InboundSenders {
    pub arrivals: mpsc::UnboundedSender<Arrival>,
}

impl InboundSenders {
    /// 核心已停止时返回 `false`
    pub fn deliver(&self, arrival: Arrival) -> bool {
        self.arrivals.send(arrival).is_ok()
    }
}

/// 建立入站车道
pub fn inbound_lanes() -> (InboundSenders, Inbound) {
    let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
    (
        InboundSenders {
            arrivals: arrivals_tx,
        },
        Inbound {
            arrivals: arrivals_rx,
        },
    )
}
