//! 使能集合求值
//!
//! 求值器决定某一时钟下哪些变迁被敏化。核心只通过 [`Evaluator`] 使用它。

use super::subnet::Subnet;
use super::transition::Transition;
use crate::sim::Clock;

/// 使能求值器抽象
pub trait Evaluator: Send + std::fmt::Debug + 'static {
    /// 返回在 `clock` 时被敏化的变迁下标（按子网顺序）
    fn enabled(&self, subnet: &Subnet, clock: Clock) -> Vec<usize>;

    fn any_enabled(&self, subnet: &Subnet, clock: Clock) -> bool {
        !self.enabled(subnet, clock).is_empty()
    }

    /// 单个变迁此刻是否仍敏化（同一时刻先触发的变迁可能已将其禁用）
    fn is_enabled(&self, subnet: &Subnet, idx: usize, clock: Clock) -> bool {
        self.enabled(subnet, clock).contains(&idx)
    }
}

/// LEF 规则：`value <= 0` 且 `time == clock`，并且本时刻尚未触发过。
///
/// 触发时长至少为 1，同一变迁在同一时刻最多触发一次。
#[derive(Debug, Default, Clone, Copy)]
pub struct LefEvaluator;

impl Evaluator for LefEvaluator {
    fn enabled(&self, subnet: &Subnet, clock: Clock) -> Vec<usize> {
        subnet
            .transitions()
            .iter()
            .enumerate()
            .filter(|(_, t)| lef_enabled(t, clock))
            .map(|(i, _)| i)
            .collect()
    }

    fn any_enabled(&self, subnet: &Subnet, clock: Clock) -> bool {
        subnet.transitions().iter().any(|t| lef_enabled(t, clock))
    }

    fn is_enabled(&self, subnet: &Subnet, idx: usize, clock: Clock) -> bool {
        lef_enabled(subnet.get(idx), clock)
    }
}

fn lef_enabled(t: &Transition, clock: Clock) -> bool {
    t.value <= 0 && t.time == clock && !t.fired_at(clock)
}
