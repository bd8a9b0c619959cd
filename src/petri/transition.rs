//! 变迁
//!
//! 每个变迁携带使能函数累加值、最近更新时间、触发时长和两类传播列表。

use crate::sim::{Clock, TransitionId};
use serde::{Deserialize, Serialize};

/// 传播对：目标变迁 + 常量，JSON 中写作 `[target, constant]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Propagation(pub TransitionId, pub i64);

impl Propagation {
    pub fn target(&self) -> TransitionId {
        self.0
    }

    pub fn constant(&self) -> i64 {
        self.1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    /// 使能函数累加值（LEF），<= 0 表示已满足
    #[serde(default)]
    pub value: i64,
    /// 最近一次被事件更新的时间
    #[serde(default)]
    pub time: Clock,
    /// 触发时长（tick）
    pub duration: i64,
    /// 零延迟更新：触发瞬间作用于目标变迁
    #[serde(default)]
    pub immediate: Vec<Propagation>,
    /// 延迟更新：在 `time + duration` 生成新事件
    #[serde(default)]
    pub delayed: Vec<Propagation>,
    #[serde(default)]
    pub boundary: bool,
    /// 仅边界变迁：以"当前使能变迁"为下标的最小穿越时间
    #[serde(default)]
    pub traversal_times: Vec<i64>,
    #[serde(skip)]
    last_fired: Option<Clock>,
}

impl Transition {
    pub fn new(id: i64, duration: i64) -> Self {
        Self {
            id: TransitionId(id),
            value: 0,
            time: Clock::ZERO,
            duration,
            immediate: Vec::new(),
            delayed: Vec::new(),
            boundary: false,
            traversal_times: Vec::new(),
            last_fired: None,
        }
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    pub fn with_time(mut self, time: Clock) -> Self {
        self.time = time;
        self
    }

    pub fn with_immediate(mut self, target: i64, constant: i64) -> Self {
        self.immediate
            .push(Propagation(TransitionId(target), constant));
        self
    }

    pub fn with_delayed(mut self, target: i64, constant: i64) -> Self {
        self.delayed.push(Propagation(TransitionId(target), constant));
        self
    }

    pub fn as_boundary(mut self, traversal_times: Vec<i64>) -> Self {
        self.boundary = true;
        self.traversal_times = traversal_times;
        self
    }

    /// 累加常量（注意：是增量，不是新值）
    pub fn add_constant(&mut self, constant: i64) {
        self.value = self.value.saturating_add(constant);
    }

    pub fn set_time(&mut self, time: Clock) {
        self.time = time;
    }

    pub fn mark_fired(&mut self, clock: Clock) {
        self.last_fired = Some(clock);
    }

    pub fn fired_at(&self, clock: Clock) -> bool {
        self.last_fired == Some(clock)
    }
}
