//! 逻辑进程模块
//!
//! 本地仿真核心、lookahead 协议处理和入站报文吸收任务，以及把它们组装起来的 [`LogicalProcess`]。

mod absorber;
mod engine;
mod process;
mod protocol;
mod state;

#[cfg(test)]
pub(crate) use process::Shared;
#[cfg(test)]
pub(crate) use protocol::LookaheadCoordinator;

pub use engine::{PeriodEnd, StepOutcome};
pub use process::{LogicalProcess, RunReport};
pub use protocol::LookaheadClient;
pub use state::LpState;
