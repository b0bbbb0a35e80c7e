//! 业务能力层：各任务的调用方（Invoker / ItemOperation）和结果写入（Sink）
//!
//! 只处理单个批次或单个条目，不关心分块、重试和并发。

pub mod bflow;
pub mod cj_price;
pub mod cj_split;
pub mod image_extractor;
pub mod market;
pub mod report_writer;
pub mod sheet_writer;

pub use bflow::{BflowExportInvoker, BflowSession, ExistingExportInvoker};
pub use cj_price::{CjPriceFactory, CjPriceOperation, PriceChange};
pub use image_extractor::{ImagePageFactory, ImageUrlOperation};
pub use market::{MarketPage, MarketRun};
pub use report_writer::{CsvReportSink, FailureLog, PriceStats};
pub use sheet_writer::{ImageColumnSink, ProductColumns, StatusSheetSink};
