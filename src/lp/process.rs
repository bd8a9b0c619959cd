//! 逻辑进程
//!
//! 把本地仿真核心、入站报文吸收任务和 lookahead 协调任务连接到同一份共享状态上。
//! 三者通过同一把互斥锁串行访问子网、事件表和 lookahead 表；任何路径都不会在持锁时等待。

use super::absorber::{CoordinatorLanes, absorb_arrivals};
use super::engine::{Engine, PeriodEnd};
use super::protocol::LookaheadCoordinator;
use super::state::LpState;
use crate::config::{Deployment, RunSettings};
use crate::error::LpResult;
use crate::net::{Inbound, Outgoing};
use crate::petri::LefEvaluator;
use crate::sim::{Clock, FiringLog, LookaheadTable, Throughput};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 三个任务共享的状态
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<LpState>,
    /// "有新工作" 信号：每次满足条件的到达最多释放一次空闲等待
    pub(crate) work: Notify,
    /// Kill 广播
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    pub(crate) fn new(state: LpState) -> Self {
        Self {
            state: Mutex::new(state),
            work: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// 主循环正在空闲等待时唤醒它（调用方持有锁）
    pub(crate) fn wake_if_waiting(&self, state: &mut LpState) {
        if state.waiting_for_work {
            state.waiting_for_work = false;
            self.work.notify_one();
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub firings: FiringLog,
    pub throughput: Throughput,
    pub final_clock: Clock,
    /// 是否因收到 Kill 而提前结束
    pub killed: bool,
}

#[derive(Debug)]
pub struct LogicalProcess {
    shared: Arc<Shared>,
    settings: RunSettings,
}

impl LogicalProcess {
    pub fn new(state: LpState, settings: RunSettings) -> Self {
        Self {
            shared: Arc::new(Shared::new(state)),
            settings,
        }
    }

    /// 按部署描述建立：祖先以配置的初值入表，使用 LEF 求值器
    pub fn from_deployment(dep: &Deployment) -> Self {
        let part = dep.partition();
        let table = LookaheadTable::new(part.ancestors.iter().copied(), part.initial_lookahead);
        let state = LpState::new(
            dep.me,
            dep.subnet.clone(),
            Box::new(LefEvaluator),
            table,
            dep.idle_lookahead,
        );
        Self::new(state, dep.settings().clone())
    }

    /// 收到 Kill 时由传输层取消
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// 在锁内读取状态
    pub fn with_state<R>(&self, f: impl FnOnce(&LpState) -> R) -> R {
        f(&self.shared.state.lock())
    }

    /// 运行 `[start, end)` 周期，直到时钟到达 `end` 或收到 Kill
    pub async fn run(
        &self,
        start: Clock,
        end: Clock,
        inbound: Inbound,
        outgoing: mpsc::UnboundedSender<Outgoing>,
    ) -> LpResult<RunReport> {
        let Inbound { arrivals } = inbound;
        let stop = self.shared.shutdown.child_token();

        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (replies_tx, replies) = mpsc::unbounded_channel();
        let (client, coordinator) = LookaheadCoordinator::new(
            self.shared.clone(),
            requests,
            replies,
            outgoing.clone(),
            &self.settings,
        );
        let coordinator = tokio::spawn(coordinator.run(stop.clone()));
        let absorber = tokio::spawn(absorb_arrivals(
            self.shared.clone(),
            arrivals,
            CoordinatorLanes {
                requests: requests_tx,
                replies: replies_tx,
            },
            stop.clone(),
        ));

        let engine = Engine::new(
            self.shared.clone(),
            client,
            outgoing,
            self.settings.idle_timeout(),
        );
        let started = Instant::now();
        let result = engine.run_period(start, end).await;
        let elapsed = started.elapsed();
        drop(engine);

        stop.cancel();
        coordinator.await?;
        absorber.await?;
        let end_state = result?;

        let mut state = self.shared.state.lock();
        let report = RunReport {
            firings: state.take_firings(),
            throughput: Throughput {
                events: state.processed_events(),
                elapsed,
            },
            final_clock: state.clock(),
            killed: end_state == PeriodEnd::Killed,
        };
        info!(
            lp = %state.id(),
            firings = report.firings.len(),
            events = report.throughput.events,
            final_clock = %report.final_clock,
            killed = report.killed,
            "✅ 仿真完成"
        );
        Ok(report)
    }
}
