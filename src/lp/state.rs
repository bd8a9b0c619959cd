//! 逻辑进程的本地状态
//!
//! 子网、本地时钟、事件表、lookahead 表和触发记录。所有字段都在同一把锁下访问，
//! 这里的方法是一个仿真步骤中各阶段的同步实现。

use crate::error::ModelError;
use crate::net::PeerId;
use crate::petri::{Evaluator, Subnet};
use crate::sim::{Clock, Event, EventList, FiringLog, LookaheadTable, MergeOutcome};
use tracing::{debug, trace, warn};

#[derive(Debug)]
pub struct LpState {
    id: PeerId,
    clock: Clock,
    subnet: Subnet,
    evaluator: Box<dyn Evaluator>,
    /// 当前时刻敏化的变迁下标（栈）
    enabled: Vec<usize>,
    events: EventList,
    lookaheads: LookaheadTable,
    idle_lookahead: i64,
    firings: FiringLog,
    processed_events: u64,
    /// 主循环是否在空闲等待（由吸收任务负责唤醒）
    pub(crate) waiting_for_work: bool,
}

impl LpState {
    pub fn new(
        id: PeerId,
        subnet: Subnet,
        evaluator: Box<dyn Evaluator>,
        lookaheads: LookaheadTable,
        idle_lookahead: i64,
    ) -> Self {
        Self {
            id,
            clock: Clock::ZERO,
            subnet,
            evaluator,
            enabled: Vec::new(),
            events: EventList::new(),
            lookaheads,
            idle_lookahead,
            firings: FiringLog::default(),
            processed_events: 0,
            waiting_for_work: false,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// 把时钟推进到 `clock`（不会回退）
    pub fn advance_to(&mut self, clock: Clock) {
        self.clock = self.clock.max(clock);
    }

    pub fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    pub fn events(&self) -> &EventList {
        &self.events
    }

    pub fn lookaheads(&self) -> &LookaheadTable {
        &self.lookaheads
    }

    pub fn firings(&self) -> &FiringLog {
        &self.firings
    }

    pub fn take_firings(&mut self) -> FiringLog {
        std::mem::take(&mut self.firings)
    }

    pub fn processed_events(&self) -> u64 {
        self.processed_events
    }

    /// 步骤 1：按当前时钟重新计算敏化集合
    pub fn refresh_enabled(&mut self) {
        let clock = self.clock;
        let subnet = &self.subnet;
        self.enabled = self
            .evaluator
            .enabled(subnet, clock)
            .into_iter()
            .filter(|&i| !subnet.get(i).fired_at(clock))
            .collect();
        trace!(clock = %self.clock, enabled = self.enabled.len(), "刷新敏化集合");
    }

    /// 步骤 2 的条件：没有敏化变迁且事件表为空
    pub fn is_idle(&self) -> bool {
        self.enabled.is_empty() && self.events.is_empty()
    }

    /// 步骤 3：下界不晚于最早待处理事件的邻居。事件表为空时时钟不会推进，无需刷新。
    pub fn stale_peers(&self) -> Vec<PeerId> {
        if self.events.is_empty() {
            return Vec::new();
        }
        self.lookaheads.stale_peers(self.events.earliest_time())
    }

    /// 入站事件写入事件表
    pub fn insert_inbound(&mut self, from: PeerId, event: Event) {
        if event.time < self.clock {
            warn!(
                lp = %self.id,
                from = %from,
                event_time = %event.time,
                clock = %self.clock,
                "⚠️ 迟到事件：时间早于本地时钟，将在当前时钟应用"
            );
        }
        self.events.insert(event);
    }

    /// 步骤 4：触发所有敏化变迁，直到不再有变迁被敏化。返回触发次数。
    pub fn fire_enabled(&mut self) -> Result<usize, ModelError> {
        let mut fired = 0;
        loop {
            while let Some(idx) = self.enabled.pop() {
                if self.fire(idx)? {
                    fired += 1;
                }
            }
            // 触发可能在同一时刻敏化更多变迁
            self.refresh_enabled();
            if self.enabled.is_empty() {
                break;
            }
        }
        Ok(fired)
    }

    /// 触发单个变迁：先零延迟传播，再生成延迟事件，最后记录。
    /// 已被同一时刻先触发的冲突变迁禁用的，跳过。
    fn fire(&mut self, idx: usize) -> Result<bool, ModelError> {
        let clock = self.clock;
        if !self.evaluator.is_enabled(&self.subnet, idx, clock) {
            return Ok(false);
        }
        let t = self.subnet.get(idx);
        let id = t.id;
        let completion = clock.after(t.duration);
        let immediate = t.immediate.clone();
        let delayed = t.delayed.clone();

        for p in immediate {
            self.subnet.resolve_mut(p.target())?.add_constant(p.constant());
        }
        for p in delayed {
            self.events
                .insert(Event::new(completion, p.target(), p.constant()));
        }
        self.subnet.get_mut(idx).mark_fired(clock);
        self.firings.push(id, clock);
        debug!(lp = %self.id, transition = %id, clock = %clock, "🔥 触发变迁");
        Ok(true)
    }

    /// 步骤 5：事件表非空时把时钟推进到 `min(最早事件, 最小 lookahead)`，从不回退
    pub fn advance_clock(&mut self) -> Option<(Clock, Clock)> {
        if self.events.is_empty() {
            return None;
        }
        let next = self
            .events
            .earliest_time()
            .min(self.lookaheads.min_bound());
        if next > self.clock {
            let from = self.clock;
            self.clock = next;
            debug!(lp = %self.id, from = %from, to = %next, "⏩ 推进时钟");
            Some((from, next))
        } else {
            None
        }
    }

    /// 步骤 6：应用所有到期事件。本地事件更新累加值与时间；
    /// 负 id 事件解码后返回给调用方交由传输层转发。
    pub fn apply_due(&mut self) -> Result<Vec<Event>, ModelError> {
        let mut outbound = Vec::new();
        while let Some(ev) = self.events.pop_due(self.clock) {
            match ev.transition.decode_remote() {
                Some(global) => {
                    trace!(lp = %self.id, transition = %global, time = %ev.time, "外发边界事件");
                    outbound.push(Event::new(ev.time, global, ev.constant));
                }
                None => {
                    let clock = self.clock;
                    let t = self.subnet.resolve_mut(ev.transition)?;
                    t.add_constant(ev.constant);
                    t.set_time(clock);
                    trace!(lp = %self.id, transition = %ev.transition, value = t.value, "应用本地事件");
                }
            }
            self.processed_events += 1;
        }
        Ok(outbound)
    }

    /// 本 LP 对邻居的承诺：空闲时 `clock + idle_lookahead`，否则 `clock + 1`；
    /// 不晚于最早待发的边界事件。
    ///
    /// 因此只有事件表里没有更早的远程事件时，返回值才恰好等于
    /// `clock + idle_lookahead`（或 `clock + 1`）。
    pub fn lookahead_reply(&self) -> Clock {
        let idle = !self.evaluator.any_enabled(&self.subnet, self.clock);
        let horizon = if idle { self.idle_lookahead } else { 1 };
        self.clock
            .after(horizon)
            .min(self.events.earliest_remote_time())
    }

    /// 单调合并邻居的 lookahead
    pub fn merge_lookahead(&mut self, peer: PeerId, time: Clock) -> MergeOutcome {
        let outcome = self.lookaheads.merge(peer, time);
        trace!(lp = %self.id, peer = %peer, time = %time, ?outcome, "合并 lookahead");
        outcome
    }

    /// 机会推进：没有变迁在当前时刻敏化时，把时钟推进到
    /// `min(最小 lookahead, 最早事件)`；空表时不动。
    pub fn opportunistic_advance(&mut self) -> Option<Clock> {
        if self.lookaheads.is_empty() || self.evaluator.any_enabled(&self.subnet, self.clock) {
            return None;
        }
        let target = self
            .lookaheads
            .min_bound()
            .min(self.events.earliest_time());
        if target > self.clock && !target.is_infinite() {
            debug!(lp = %self.id, from = %self.clock, to = %target, "⏩ 机会推进时钟");
            self.clock = target;
            Some(target)
        } else {
            None
        }
    }
}
