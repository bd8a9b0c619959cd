//! 逻辑时钟类型
//!
//! 定义仿真时钟（整数 tick）及其饱和运算。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 逻辑时钟（tick）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Clock(pub i64);

impl Clock {
    pub const ZERO: Clock = Clock(0);
    /// 空事件表 / 空 lookahead 表的最早时间（+∞）。
    pub const INFINITY: Clock = Clock(i64::MAX);

    pub fn after(self, ticks: i64) -> Clock {
        Clock(self.0.saturating_add(ticks))
    }

    pub fn is_infinite(self) -> bool {
        self == Clock::INFINITY
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "∞")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
