//! CJ 할인 원본表拆分
//!
//! 原表第 2 行是表头，第 3 行起是数据。每行取第 3 列（CJ 商品代码）、第 2 列（售价）、
//! 第 5 列（上传用毛利），按固定行数复制 CJ 上传模板并从 A5 开始填写，
//! 输出 `YYYY-MM-DD_<n>.xlsx`。

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};
use umya_spreadsheet::{reader, writer, Worksheet};

use crate::error::{AppError, AppResult, ConfigError, FileError};
use crate::workbook::read_first_sheet;

/// 表头所在行（从 0 开始）
pub const SPLIT_HEADER_ROW_INDEX: usize = 1;
const ITEM_CODE_COLUMN: usize = 2;
const SALE_PRICE_COLUMN: usize = 1;
const MARGIN_COLUMN: usize = 4;

/// 模板中第一条数据所在行
pub const TEMPLATE_FIRST_ROW: u32 = 5;
const SALE_PRICE_FORMAT: &str = "#,##0";
const MARGIN_FORMAT: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRow {
    pub item_code: String,
    pub sale_price: String,
    pub upload_margin: String,
}

/// 三列都为空的行丢弃
pub fn split_rows(rows: &[Vec<String>]) -> Vec<SplitRow> {
    rows.iter()
        .skip(SPLIT_HEADER_ROW_INDEX + 1)
        .map(|row| {
            let cell = |i: usize| row.get(i).map(|v| v.trim().to_string()).unwrap_or_default();
            SplitRow {
                item_code: cell(ITEM_CODE_COLUMN),
                sale_price: cell(SALE_PRICE_COLUMN),
                upload_margin: cell(MARGIN_COLUMN),
            }
        })
        .filter(|r| !(r.item_code.is_empty() && r.sale_price.is_empty() && r.upload_margin.is_empty()))
        .collect()
}

/// 数字写成数字单元格，其余写成文本
fn put(sheet: &mut Worksheet, column: u32, row: u32, value: &str, format: Option<&str>) {
    let cell = sheet.get_cell_mut((column, row));
    match value.replace(',', "").parse::<f64>() {
        Ok(number) => {
            cell.set_value_number(number);
        }
        Err(_) => {
            cell.set_value(value.to_string());
        }
    }
    if let Some(format) = format {
        sheet
            .get_style_mut((column, row))
            .get_number_format_mut()
            .set_format_code(format);
    }
}

fn fill_template(template: &Path, path: &Path, rows: &[SplitRow]) -> AppResult<()> {
    let mut book = reader::xlsx::read(template).map_err(|e| FileError::SpreadsheetOpenFailed {
        path: template.display().to_string(),
        source: e.to_string().into(),
    })?;

    let sheet = book.get_active_sheet_mut();
    for (offset, row) in rows.iter().enumerate() {
        let at = TEMPLATE_FIRST_ROW + offset as u32;
        put(sheet, 1, at, &row.item_code, None);
        put(sheet, 2, at, &row.sale_price, Some(SALE_PRICE_FORMAT));
        put(sheet, 3, at, &row.upload_margin, Some(MARGIN_FORMAT));
    }

    writer::xlsx::write(&book, path).map_err(|e| {
        AppError::File(FileError::WriteFailed {
            path: path.display().to_string(),
            source: e.to_string().into(),
        })
    })
}

/// 按模板写出 `<date>_<n>.xlsx`，n 从 1 开始
///
/// 单个文件失败时记日志并继续，返回成功写出的文件
pub fn write_split(
    rows: &[SplitRow],
    template: &Path,
    output_dir: &Path,
    chunk_size: usize,
    date: &str,
) -> AppResult<Vec<PathBuf>> {
    if chunk_size == 0 {
        return Err(ConfigError::InvalidValue {
            name: "cj_split_chunk_size".to_string(),
            reason: "必须大于 0".to_string(),
        }
        .into());
    }
    if !template.exists() {
        return Err(FileError::NotFound {
            path: template.display().to_string(),
        }
        .into());
    }
    std::fs::create_dir_all(output_dir)
        .map_err(|e| AppError::file_write_failed(output_dir.display().to_string(), e))?;

    let total = rows.len().div_ceil(chunk_size);
    let mut written = Vec::with_capacity(total);
    for (i, chunk) in rows.chunks(chunk_size).enumerate() {
        let path = output_dir.join(format!("{}_{}.xlsx", date, i + 1));
        match fill_template(template, &path, chunk) {
            Ok(()) => {
                info!("[{}/{}] '{}' 생성 ({}개 행)", i + 1, total, path.display(), chunk.len());
                written.push(path);
            }
            Err(e) => warn!("[{}/{}] ❌ '{}' 생성 실패: {}", i + 1, total, path.display(), e),
        }
    }
    Ok(written)
}

/// 读取原表并按今天的日期拆分
pub async fn split_source_file(
    source: &Path,
    template: &Path,
    output_dir: &Path,
    chunk_size: usize,
) -> AppResult<Vec<PathBuf>> {
    info!("📖 원본 파일 읽기: {}", source.display());
    let path = source.to_path_buf();
    let sheet = tokio::task::spawn_blocking(move || read_first_sheet(&path))
        .await
        .map_err(|e| AppError::Other(format!("读取原表的任务异常: {}", e)))??;

    let rows = split_rows(&sheet);
    if rows.is_empty() {
        warn!("⚠️ 가공할 데이터가 없습니다");
        return Err(FileError::EmptyWorkbook {
            path: source.display().to_string(),
        }
        .into());
    }
    info!(
        "📦 총 {}개 행을 {}개씩 {}개 파일로 나눕니다",
        rows.len(),
        chunk_size,
        rows.len().div_ceil(chunk_size.max(1))
    );

    let today = Local::now().format("%Y-%m-%d").to_string();
    let template = template.to_path_buf();
    let output_dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        write_split(&rows, &template, &output_dir, chunk_size, &today)
    })
    .await
    .map_err(|e| AppError::Other(format!("写出拆分文件的任务异常: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(n: usize) -> Vec<Vec<String>> {
        let mut rows = vec![
            vec!["CJ 할인 원본".to_string()],
            ["B.상품코드", "판매가K", "CJ상품코드", "외부할인", "할인판매가"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ];
        for i in 0..n {
            rows.push(vec![
                format!("B{}", i),
                format!("{}", 10_000 + i),
                format!("{}", 20_000_000 + i),
                "5".to_string(),
                "10".to_string(),
            ]);
        }
        rows.push(vec![String::new(); 5]);
        rows
    }

    /// A1 有标题、第 4 行是表头的上传模板
    fn template(dir: &Path) -> PathBuf {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_active_sheet_mut();
        sheet.get_cell_mut("A1").set_value("CJ 할인 시트");
        sheet.get_cell_mut("A4").set_value("CJ상품코드");
        sheet.get_cell_mut("B4").set_value("판매가K");
        sheet.get_cell_mut("C4").set_value("업로드용마진");
        let path = dir.join("CJ 할인 시트_0.xlsx");
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        path
    }

    #[test]
    fn rows_are_projected_and_blank_rows_dropped() {
        let rows = split_rows(&sheet(2));
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            SplitRow {
                item_code: "20000000".into(),
                sale_price: "10000".into(),
                upload_margin: "10".into(),
            }
        );
    }

    #[test]
    fn files_fill_the_template_from_row_five() {
        let dir = tempfile::tempdir().unwrap();
        let template = template(dir.path());
        let out = dir.path().join("out");
        let rows = split_rows(&sheet(5));

        let files = write_split(&rows, &template, &out, 2, "2025-03-01").unwrap();

        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["2025-03-01_1.xlsx", "2025-03-01_2.xlsx", "2025-03-01_3.xlsx"]
        );

        let first = read_first_sheet(&files[0]).unwrap();
        assert_eq!(first[0][0], "CJ 할인 시트");
        assert_eq!(first[3], vec!["CJ상품코드", "판매가K", "업로드용마진"]);
        assert_eq!(first[4], vec!["20000000", "10000", "10"]);
        assert_eq!(first[5], vec!["20000001", "10001", "10"]);

        let last = read_first_sheet(&files[2]).unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(last[4], vec!["20000004", "10004", "10"]);
    }

    #[test]
    fn missing_template_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let rows = split_rows(&sheet(1));
        let result = write_split(&rows, &dir.path().join("none.xlsx"), dir.path(), 2, "2025-03-01");
        assert!(matches!(result, Err(AppError::File(FileError::NotFound { .. }))));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            write_split(&[], dir.path(), dir.path(), 0, "2025-03-01"),
            Err(AppError::Config(_))
        ));
    }
}
