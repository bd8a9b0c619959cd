//! 本地仿真核心
//!
//! 拥有权威的本地时钟与事件表：把敏化变迁转换为新事件和触发记录，
//! 推进时钟，应用到期事件，并把边界事件交给传输层。

use super::process::Shared;
use super::protocol::LookaheadClient;
use crate::error::{LpResult, SyncError};
use crate::net::{Outgoing, PeerId};
use crate::sim::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// 单步结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Progressed,
    /// 空闲且没有祖先：不会再有任何工作
    Exhausted,
    Killed,
}

/// 周期结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodEnd {
    Completed,
    Killed,
}

pub(crate) struct Engine {
    id: PeerId,
    shared: Arc<Shared>,
    lookahead: LookaheadClient,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    idle_timeout: Option<Duration>,
}

impl Engine {
    pub(crate) fn new(
        shared: Arc<Shared>,
        lookahead: LookaheadClient,
        outgoing: mpsc::UnboundedSender<Outgoing>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let id = shared.state.lock().id();
        Self {
            id,
            shared,
            lookahead,
            outgoing,
            idle_timeout,
        }
    }

    fn clock(&self) -> Clock {
        self.shared.state.lock().clock()
    }

    /// 当 `clock < end` 时重复执行 [`Engine::step`]
    #[tracing::instrument(skip(self), fields(lp = %self.id))]
    pub(crate) async fn run_period(&self, start: Clock, end: Clock) -> LpResult<PeriodEnd> {
        info!("▶️  开始仿真周期");
        self.shared.state.lock().advance_to(start);

        let mut steps: u64 = 0;
        while self.clock() < end {
            steps += 1;
            match self.step().await? {
                StepOutcome::Progressed => {}
                StepOutcome::Exhausted => {
                    // 没有祖先意味着 lookahead 为 +∞，可以直接跳到周期末尾
                    debug!(steps, "子网已无工作且无上游，直接结束周期");
                    self.shared.state.lock().advance_to(end);
                }
                StepOutcome::Killed => {
                    info!(steps, clock = %self.clock(), "🛑 收到 Kill，停止仿真");
                    return Ok(PeriodEnd::Killed);
                }
            }
        }
        info!(steps, clock = %self.clock(), "周期结束");
        Ok(PeriodEnd::Completed)
    }

    /// 仿真一步
    pub(crate) async fn step(&self) -> LpResult<StepOutcome> {
        // 1-2. 求值；无事可做时挂起等待新事件
        let (idle, orphan) = {
            let mut st = self.shared.state.lock();
            st.refresh_enabled();
            let idle = st.is_idle();
            if idle {
                st.waiting_for_work = true;
            }
            (idle, st.lookaheads().is_empty())
        };
        if idle {
            if orphan {
                return Ok(StepOutcome::Exhausted);
            }
            return self.wait_for_work().await;
        }

        // 3. 刷新过期的邻居下界（不持锁）
        let stale = self.shared.state.lock().stale_peers();
        if !stale.is_empty() && self.refresh(stale).await? == StepOutcome::Killed {
            return Ok(StepOutcome::Killed);
        }

        // 4-6. 触发、推进、应用
        let mut st = self.shared.state.lock();
        st.refresh_enabled();
        let fired = st.fire_enabled()?;
        st.advance_clock();
        let outbound = st.apply_due()?;
        trace!(clock = %st.clock(), fired, outbound = outbound.len(), pending = st.events().len(), "步骤完成");
        // 持锁入队：之后算出的 lookahead 应答一定排在这些事件之后
        for event in outbound {
            if self.outgoing.send(Outgoing::Event(event)).is_err() {
                warn!(transition = %event.transition, "传输层已关闭，丢弃边界事件");
            }
        }
        Ok(StepOutcome::Progressed)
    }

    async fn wait_for_work(&self) -> LpResult<StepOutcome> {
        let clock = self.clock();
        debug!(clock = %clock, "💤 等待新事件");
        let woken = async {
            tokio::select! {
                _ = self.shared.work.notified() => StepOutcome::Progressed,
                _ = self.shared.shutdown.cancelled() => StepOutcome::Killed,
            }
        };
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, woken).await.map_err(|_| {
                SyncError::IdleTimeout {
                    clock,
                    waited_ms: limit.as_millis() as u64,
                }
                .into()
            }),
            None => Ok(woken.await),
        }
    }

    /// 向所有过期邻居并发请求 lookahead，等待全部应答
    async fn refresh(&self, peers: Vec<PeerId>) -> LpResult<StepOutcome> {
        let mut pending = Vec::with_capacity(peers.len());
        for peer in peers {
            pending.push((peer, self.lookahead.begin(peer)?));
        }
        for (peer, reply) in pending {
            tokio::select! {
                r = reply => {
                    let bound = r.map_err(|_| SyncError::CoordinatorGone)??;
                    trace!(peer = %peer, bound = %bound, "lookahead 已刷新");
                }
                _ = self.shared.shutdown.cancelled() => return Ok(StepOutcome::Killed),
            }
        }
        Ok(StepOutcome::Progressed)
    }
}
