//! 仿真核心数据模块
//!
//! 此模块包含逻辑时钟、定时事件、事件表、lookahead 表与触发记录。

// 子模块声明
mod event;
mod event_list;
mod firing;
mod lookahead;
mod time;

// 重新导出公共接口
pub use event::{Event, TransitionId};
pub use event_list::EventList;
pub use firing::{FiringLog, FiringRecord, Throughput};
pub use lookahead::{LookAhead, LookaheadTable, MergeOutcome};
pub use time::Clock;
