//! # deal_batch
//!
//! 딜 상품 운영용批处理工具：b-flow 导出同步、商品图片提取、CJ 价格批量变更、마켓상품생성。
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - `JsExecutor` 持有页面，只暴露执行 JS 和有上限的等待
//! - `browser/` - 连接/启动浏览器、下载目录与下载完成检测
//! - `clients/` - CJ 价格 API、Google Sheets values API
//!
//! ### ② 批处理引擎（Pipeline）
//! - `pipeline/` - 分块、重试、汇总、写入、顺序/并行运行、取消
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 各任务的调用方和写入方
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/` - 任务装配和分发
//!
//! 另有 `models/`（条目与加载）、`sheets/`（表格抽象与 A1 记法）、`workbook/`（xlsx 读取）。

pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod services;
pub mod sheets;
pub mod utils;
pub mod workbook;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::JsExecutor;
pub use models::WorkItem;
pub use orchestrator::{App, Job};
pub use pipeline::{Pipeline, RetryPolicy};
