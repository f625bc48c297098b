//! 执行模块:将预检、重试、回退与流水线组合成单一执行入口。
//!
//! The resilient executor: one logical request in, one outcome out. For
//! each target in the fallback chain it runs preflight, compiles the wire
//! request, drives the transport and pipeline, classifies failures, and
//! applies retry within the target before advancing the chain. It is the
//! only component that mutates [`CallStats`](crate::types::stats::CallStats).

pub mod executor;
pub mod options;
pub mod outcome;

pub use executor::ResilientExecutor;
pub use options::ExecOptions;
pub use outcome::ChatOutcome;
