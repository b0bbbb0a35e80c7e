//! 下载的 xlsx 文件读取
//!
//! - `reader`：calamine 读取第一个工作表
//! - `header`：表头同义词解析，找不到时退回固定列
//! - `export`：按商品编号（名称兜底）查找下载的商品数据

pub mod export;
pub mod header;
pub mod reader;

pub use export::{ExportIndex, MatchKind};
pub use header::{ColumnSpec, HeaderMap};
pub use reader::read_first_sheet;
