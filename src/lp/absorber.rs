//! 入站报文吸收任务
//!
//! 按到达顺序处理其他 LP 送来的报文。边界事件在锁内直接写入事件表，
//! 主循环空闲等待时将其唤醒；lookahead 请求和应答转交协调任务。
//! 同一车道上先到的事件总是先于后到的应答生效。

use super::process::Shared;
use crate::net::Arrival;
use crate::sim::LookAhead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// 转交协调任务的两条内部通道
#[derive(Debug)]
pub(crate) struct CoordinatorLanes {
    pub(crate) requests: mpsc::UnboundedSender<LookAhead>,
    pub(crate) replies: mpsc::UnboundedSender<LookAhead>,
}

pub(crate) async fn absorb_arrivals(
    shared: Arc<Shared>,
    mut arrivals: mpsc::UnboundedReceiver<Arrival>,
    coordinator: CoordinatorLanes,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            next = arrivals.recv() => {
                let Some(arrival) = next else { break };
                let forwarded = match arrival {
                    Arrival::Event { from, event } => {
                        let mut state = shared.state.lock();
                        debug!(
                            lp = %state.id(),
                            from = %from,
                            transition = %event.transition,
                            time = %event.time,
                            constant = event.constant,
                            "📥 收到边界事件"
                        );
                        state.insert_inbound(from, event);
                        shared.wake_if_waiting(&mut state);
                        true
                    }
                    Arrival::Request(req) => coordinator.requests.send(req).is_ok(),
                    Arrival::Reply(rep) => coordinator.replies.send(rep).is_ok(),
                };
                if !forwarded {
                    trace!("协调任务已停止");
                    break;
                }
            }
        }
    }
}
