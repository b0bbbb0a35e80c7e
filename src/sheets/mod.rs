//! 在线表格访问
//!
//! `SheetStore` 代表一个工作表：按 A1 区间读取，按单元格批量写入。
//! 生产环境用 `clients::GoogleSheetsClient`，测试和演练用 `MemorySheet`。

pub mod a1;
pub mod memory;

use async_trait::async_trait;

use crate::error::AppResult;

pub use memory::MemorySheet;

/// 一次单元格写入（行列从 1 开始）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub row: u32,
    pub column: u32,
    pub value: String,
}

impl CellUpdate {
    pub fn new(row: u32, column: u32, value: impl Into<String>) -> Self {
        Self {
            row,
            column,
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait SheetStore: Send + Sync {
    /// 读取区间内的值；行尾的空单元格可能被省略
    async fn read_range(&self, range: &str) -> AppResult<Vec<Vec<String>>>;

    /// 一次调用写入所有更新，返回写入的单元格数
    async fn batch_update(&self, updates: &[CellUpdate]) -> AppResult<usize>;
}
