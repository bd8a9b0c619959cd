//! 触发记录与吞吐统计
//!
//! 触发记录是只追加的审计轨迹，时钟值单调不减。

use super::event::TransitionId;
use super::time::Clock;
use std::time::Duration;

/// 一次变迁触发
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiringRecord {
    pub transition: TransitionId,
    pub clock: Clock,
}

/// 触发记录
#[derive(Debug, Default, Clone)]
pub struct FiringLog {
    records: Vec<FiringRecord>,
}

impl FiringLog {
    pub fn push(&mut self, transition: TransitionId, clock: Clock) {
        debug_assert!(
            self.records.last().is_none_or(|last| last.clock <= clock),
            "firing clock went backwards"
        );
        self.records.push(FiringRecord { transition, clock });
    }

    pub fn records(&self) -> &[FiringRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按 (变迁, 时钟) 对导出，测试与输出使用
    pub fn pairs(&self) -> Vec<(i64, i64)> {
        self.records
            .iter()
            .map(|r| (r.transition.0, r.clock.0))
            .collect()
    }
}

/// 吞吐统计：处理事件数 / 墙钟耗时
#[derive(Debug, Default, Clone, Copy)]
pub struct Throughput {
    pub events: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn events_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events as f64 / secs
        } else {
            0.0
        }
    }
}
