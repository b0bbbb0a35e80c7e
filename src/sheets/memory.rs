use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult, SheetError};
use crate::sheets::a1;
use crate::sheets::{CellUpdate, SheetStore};

/// 内存工作表
#[derive(Debug, Default)]
pub struct MemorySheet {
    cells: Mutex<BTreeMap<(u32, u32), String>>,
    /// 每次 `batch_update` 的内容
    writes: Mutex<Vec<Vec<CellUpdate>>>,
    fail_writes: AtomicBool,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从第 `start_row` 行、第 1 列开始填入若干行
    pub fn from_rows(start_row: u32, rows: &[Vec<&str>]) -> Self {
        let mut cells = BTreeMap::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    cells.insert((start_row + r as u32, c as u32 + 1), value.to_string());
                }
            }
        }
        Self {
            cells: Mutex::new(cells),
            ..Self::default()
        }
    }

    pub fn with_cell(mut self, row: u32, column: u32, value: impl Into<String>) -> Self {
        self.cells.get_mut().insert((row, column), value.into());
        self
    }

    /// 之后的写入全部失败
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn cell(&self, row: u32, column: u32) -> Option<String> {
        self.cells.lock().await.get(&(row, column)).cloned()
    }

    pub async fn writes(&self) -> Vec<Vec<CellUpdate>> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl SheetStore for MemorySheet {
    async fn read_range(&self, range: &str) -> AppResult<Vec<Vec<String>>> {
        let bounds = a1::parse_range(range).ok_or_else(|| SheetError::NoData {
            range: range.to_string(),
        })?;
        let cells = self.cells.lock().await;

        let last_row = match bounds.end_row {
            Some(row) => row,
            None => cells
                .keys()
                .filter(|(_, c)| (bounds.start_column..=bounds.end_column).contains(c))
                .map(|(r, _)| *r)
                .max()
                .unwrap_or(0),
        };

        let mut rows = Vec::new();
        for row in bounds.start_row..=last_row {
            let mut values: Vec<String> = (bounds.start_column..=bounds.end_column)
                .map(|column| cells.get(&(row, column)).cloned().unwrap_or_default())
                .collect();
            while values.last().is_some_and(String::is_empty) {
                values.pop();
            }
            rows.push(values);
        }
        while rows.last().is_some_and(Vec::is_empty) {
            rows.pop();
        }
        Ok(rows)
    }

    async fn batch_update(&self, updates: &[CellUpdate]) -> AppResult<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Other("memory sheet rejects writes".to_string()));
        }
        for update in updates {
            if update.row == 0 || update.column == 0 {
                return Err(SheetError::InvalidCell {
                    row: update.row,
                    column: update.column,
                }
                .into());
            }
        }

        let mut cells = self.cells.lock().await;
        for update in updates {
            cells.insert((update.row, update.column), update.value.clone());
        }
        self.writes.lock().await.push(updates.to_vec());
        Ok(updates.len())
    }
}
