use crate::error::{AppResult, FileError};
use crate::models::product::{normalize_code, CjProduct};
use crate::workbook::reader;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// CJ 价格表的表头在第 3 行，第 4 行开始是数据
pub const CJ_HEADER_ROW_INDEX: usize = 2;

/// 单个文件的加载结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_name: String,
    pub total_rows: usize,
    pub valid_products: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 解析一个 CJ 价格表
///
/// 列顺序：itemCode, salePrice, commissionRate, supplyPrice, applyDate, applyTime。
/// 没有商品编码或售价的行跳过；返回（有效商品, 非空数据行数）
pub fn parse_cj_rows(rows: &[Vec<String>], file_name: &str) -> (Vec<CjProduct>, usize) {
    let mut products = Vec::new();
    let mut total_rows = 0;

    for (index, row) in rows.iter().enumerate().skip(CJ_HEADER_ROW_INDEX + 1) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        total_rows += 1;

        let cell = |idx: usize| row.get(idx).map(|c| c.trim()).unwrap_or("");
        let item_code = normalize_code(cell(0));
        let Some(sale_price) = parse_number(cell(1)) else {
            continue;
        };
        if item_code.is_empty() {
            continue;
        }
        let sale_price = sale_price as i64;
        let commission_rate = parse_number(cell(2));
        let supply_price = parse_number(cell(3)).map(|v| v as i64);

        products.push(CjProduct {
            item_code,
            sale_price,
            commission_rate,
            supply_price: CjProduct::resolve_supply_price(sale_price, commission_rate, supply_price),
            file_name: file_name.to_string(),
            source_row: index as u32 + 1,
        });
    }

    (products, total_rows)
}

/// 读取单个文件
pub fn load_cj_file(path: &Path) -> AppResult<(Vec<CjProduct>, FileSummary)> {
    let file_name = file_name_of(path);
    let rows = reader::read_first_sheet(path)?;
    let (products, total_rows) = parse_cj_rows(&rows, &file_name);
    let summary = FileSummary {
        file_name,
        total_rows,
        valid_products: products.len(),
        error: None,
    };
    Ok((products, summary))
}

/// 加载文件夹中所有 `.xlsx` 文件（按文件名排序）
///
/// 单个文件失败时记入摘要并继续
pub async fn load_cj_folder(folder_path: &str) -> AppResult<(Vec<CjProduct>, Vec<FileSummary>)> {
    let folder = PathBuf::from(folder_path);
    if !folder.is_dir() {
        return Err(FileError::DirectoryNotFound {
            path: folder_path.to_string(),
        }
        .into());
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&folder)
        .await
        .map_err(|e| crate::error::AppError::file_read_failed(folder_path, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| crate::error::AppError::file_read_failed(folder_path, e))?
    {
        let path = entry.path();
        let is_xlsx = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
        let is_lock_file = file_name_of(&path).starts_with("~$");
        if is_xlsx && !is_lock_file {
            files.push(path);
        }
    }
    files.sort();
    tracing::info!("📊 발견된 엑셀 파일: {}개", files.len());

    let mut all_products = Vec::new();
    let mut summaries = Vec::new();
    for (i, path) in files.iter().enumerate() {
        tracing::info!("[{}/{}] 처리 중: {}", i + 1, files.len(), file_name_of(path));
        let read = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || load_cj_file(&path)).await
        };
        match read {
            Ok(Ok((products, summary))) => {
                if products.is_empty() {
                    tracing::warn!("  ⚠️ 유효한 데이터가 없습니다.");
                } else {
                    tracing::info!("  ✅ {}개 상품 로드 완료", products.len());
                }
                all_products.extend(products);
                summaries.push(summary);
            }
            Ok(Err(e)) => {
                tracing::warn!("  ❌ 오류: {}", e);
                summaries.push(FileSummary {
                    file_name: file_name_of(path),
                    error: Some(e.to_string()),
                    ..FileSummary::default()
                });
            }
            Err(e) => {
                tracing::warn!("  ❌ 오류: {}", e);
                summaries.push(FileSummary {
                    file_name: file_name_of(path),
                    error: Some(e.to_string()),
                    ..FileSummary::default()
                });
            }
        }
    }

    Ok((all_products, summaries))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// `19,900`、`19900.0` 都能解析
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
