//! 编排层（Orchestration Layer）
//!
//! ## 层次关系
//!
//! ```text
//! app (Job 分发、Ctrl+C、日志文件)
//!     ↓
//! jobs (加载条目，装配 invoker / sink)
//!     ↓
//! pipeline::Pipeline (分块、重试、汇总、并发)
//!     ↓
//! services (b-flow / 图片 / CJ / 表格写入 / 报告)
//!     ↓
//! infrastructure (JsExecutor) + clients (HTTP)
//! ```
//!
//! 只有编排层创建 Browser 和 HTTP 客户端。

pub mod app;
pub mod jobs;

pub use app::{App, Job};
pub use jobs::JobOutcome;
