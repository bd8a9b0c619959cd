//! 标识符类型
//!
//! 定义逻辑进程（分区）的唯一标识符。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 逻辑进程标识符，等于其在拓扑文件 `partitions` 中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub usize);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LP{}", self.0)
    }
}
