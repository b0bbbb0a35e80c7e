use std::path::Path;

use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use tracing::info;

use crate::error::{AppResult, FileError};

/// 读取 xlsx 第一个工作表的所有行，单元格转成文本
pub fn read_first_sheet(path: &Path) -> AppResult<Vec<Vec<String>>> {
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(FileError::NotFound { path: shown }.into());
    }

    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|e: calamine::XlsxError| FileError::SpreadsheetOpenFailed {
            path: shown.clone(),
            source: Box::new(e),
        })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| FileError::EmptyWorkbook {
            path: shown.clone(),
        })?
        .map_err(|e| FileError::SpreadsheetOpenFailed {
            path: shown.clone(),
            source: Box::new(e),
        })?;

    let rows = range_to_rows(&range);
    info!("📊 엑셀 파일 정보: {} ({}행)", shown, rows.len());
    Ok(rows)
}

pub fn range_to_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect()
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}
