//! 时间 Petri 子网模型
//!
//! 变迁、子网加载与校验，以及使能集合求值器。

mod evaluator;
mod subnet;
mod transition;

pub use evaluator::{Evaluator, LefEvaluator};
pub use subnet::{Subnet, SubnetSpec};
pub use transition::{Propagation, Transition};
