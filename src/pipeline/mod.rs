//! 批次处理引擎
//!
//! ```text
//! Vec<WorkItem>
//!     ↓ chunker
//! Chunk ── retry(invoker) ──→ RetryOutcome
//!     ↓ aggregator
//! 切片 ──→ sink
//! ```
//!
//! 具体任务只需要实现 `Invoker`（或 `ItemOperation`）和 `Sink`，
//! 由 `runner::Pipeline` 负责分块、重试、汇总、取消和进度日志。

pub mod aggregator;
pub mod chunker;
pub mod invoker;
pub mod retry;
pub mod runner;
pub mod sink;

pub use aggregator::{AggregateReport, Aggregator, ItemRecord, Summary};
pub use chunker::{chunk_items, chunk_size_for_workers, Chunk};
pub use invoker::{
    AttemptResult, Failure, FailureKind, Invoker, InvokerFactory, ItemOperation, ItemResult,
    PerItem,
};
pub use retry::{run_with_retry, RetryOutcome, RetryPolicy, RetryState};
pub use runner::{ExecutionMode, Pipeline, RunReport};
pub use sink::{NullSink, Sink, Slice};
