//! 定时事件
//!
//! 事件由变迁触发或网络送达产生，在时钟等于其时间时被消费一次。

use super::time::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 变迁标识符。
///
/// 非负值指向本子网内的变迁；负值 `-(id + 1)` 编码属于其他 LP 的变迁，
/// 这是区分"本地应用"与"向外转发"的唯一依据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionId(pub i64);

impl TransitionId {
    /// 是否为外部（边界）编码
    pub fn is_remote(self) -> bool {
        self.0 < 0
    }

    /// 把负编码还原成全局 id；本地 id 返回 `None`
    pub fn decode_remote(self) -> Option<TransitionId> {
        if self.is_remote() {
            Some(TransitionId(-(self.0 + 1)))
        } else {
            None
        }
    }

    /// 把全局 id 编码为外部引用
    pub fn encode_remote(global: TransitionId) -> TransitionId {
        TransitionId(-(global.0 + 1))
    }
}

impl fmt::Display for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// 事件：在 `time` 时刻把 `constant` 加到变迁 `transition` 的使能函数上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub time: Clock,
    pub transition: TransitionId,
    pub constant: i64,
}

impl Event {
    pub fn new(time: Clock, transition: TransitionId, constant: i64) -> Self {
        Self {
            time,
            transition,
            constant,
        }
    }
}
