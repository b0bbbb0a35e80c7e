//! 文件输出：CJ 上传报告、dry-run 商品清单与价格统计、失败记录
//!
//! 报告按切片追加写入，中途取消也能保留已完成的部分。

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::loaders::cj_loader::FileSummary;
use crate::models::CjProduct;
use crate::pipeline::{AggregateReport, Failure, Sink, Slice};
use crate::services::cj_price::PriceChange;

const SHOWN_FAILURES: usize = 10;
const SHOWN_SUCCESSES: usize = 5;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow<'a> {
    item_code: &'a str,
    sale_price: Option<i64>,
    commission_rate: Option<f64>,
    file_name: &'a str,
    success: bool,
    error: &'a str,
    status_code: u16,
}

/// `cj_upload_report_YYYYmmdd_HHMMSS.csv`
pub fn report_file_name() -> String {
    format!("cj_upload_report_{}.csv", Local::now().format("%Y%m%d_%H%M%S"))
}

/// CJ 上传结果报告
pub struct CsvReportSink {
    path: PathBuf,
    products: HashMap<String, CjProduct>,
    header_written: Mutex<bool>,
}

impl CsvReportSink {
    /// 报告文件建在 `folder` 下，目录不存在时创建
    pub fn create(folder: &Path, products: &[CjProduct]) -> AppResult<Self> {
        std::fs::create_dir_all(folder)
            .map_err(|e| AppError::file_write_failed(folder.display().to_string(), e))?;
        Ok(Self::at(folder.join(report_file_name()), products))
    }

    pub fn at(path: PathBuf, products: &[CjProduct]) -> Self {
        Self {
            path,
            products: products
                .iter()
                .map(|p| (p.work_id(), p.clone()))
                .collect(),
            header_written: Mutex::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, slice: &Slice<PriceChange>) -> AppResult<usize> {
        let mut header_written = self
            .header_written
            .lock()
            .map_err(|_| AppError::Other("报告写入锁已损坏".to_string()))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppError::file_write_failed(self.path.display().to_string(), e))?;
        let mut writer = WriterBuilder::new()
            .has_headers(!*header_written)
            .from_writer(file);

        for (id, record) in slice {
            let product = self.products.get(id);
            let row = match &record.result {
                Ok(change) => ReportRow {
                    item_code: &change.product.item_code,
                    sale_price: Some(change.product.sale_price),
                    commission_rate: change.product.commission_rate,
                    file_name: &change.product.file_name,
                    success: true,
                    error: "",
                    status_code: change.status_code,
                },
                Err(failure) => ReportRow {
                    item_code: product.map(|p| p.item_code.as_str()).unwrap_or(id),
                    sale_price: product.map(|p| p.sale_price),
                    commission_rate: product.and_then(|p| p.commission_rate),
                    file_name: product.map(|p| p.file_name.as_str()).unwrap_or_default(),
                    success: false,
                    error: &failure.reason,
                    status_code: 0,
                },
            };
            writer.serialize(&row)?;
        }
        writer
            .flush()
            .map_err(|e| AppError::file_write_failed(self.path.display().to_string(), e))?;
        *header_written = true;
        Ok(slice.len())
    }
}

#[async_trait]
impl Sink<PriceChange> for CsvReportSink {
    fn name(&self) -> &str {
        "CJ 업로드 리포트"
    }

    async fn write(&self, slice: &Slice<PriceChange>) -> anyhow::Result<usize> {
        let written = self.append(slice)?;
        debug!("리포트 {}행 추가: {}", written, self.path.display());
        Ok(written)
    }

    async fn finish(&self, report: &AggregateReport<PriceChange>) -> anyhow::Result<()> {
        let failures = report.failures();
        if !failures.is_empty() {
            warn!("❌ 실패 상품 (최대 {}개):", SHOWN_FAILURES);
            for (id, failure) in failures.iter().take(SHOWN_FAILURES) {
                warn!("   - {}: {}", id, failure);
            }
        }
        let successes = report.successes();
        if !successes.is_empty() {
            info!("✅ 성공 상품 (최대 {}개):", SHOWN_SUCCESSES);
            for (id, change) in successes.iter().take(SHOWN_SUCCESSES) {
                info!(
                    "   - {} ({}): {}원",
                    change.product.item_code, id, change.product.sale_price
                );
            }
        }
        info!("📄 리포트 저장: {}", self.path.display());
        Ok(())
    }
}

/// dry-run 的价格统计
#[derive(Debug, Clone, PartialEq)]
pub struct PriceStats {
    pub count: usize,
    pub min: i64,
    pub max: i64,
    pub average: f64,
    /// (区间, 数量)
    pub bands: Vec<(&'static str, usize)>,
}

const PRICE_BANDS: [(&str, i64, i64); 5] = [
    ("1만원 미만", i64::MIN, 10_000),
    ("1만~2만원", 10_000, 20_000),
    ("2만~3만원", 20_000, 30_000),
    ("3만~5만원", 30_000, 50_000),
    ("5만원 이상", 50_000, i64::MAX),
];

impl PriceStats {
    pub fn from_products(products: &[CjProduct]) -> Option<Self> {
        let prices: Vec<i64> = products.iter().map(|p| p.sale_price).collect();
        let min = *prices.iter().min()?;
        let max = *prices.iter().max()?;
        let average = prices.iter().sum::<i64>() as f64 / prices.len() as f64;
        let bands = PRICE_BANDS
            .iter()
            .map(|(label, low, high)| {
                (
                    *label,
                    prices.iter().filter(|p| **p >= *low && **p < *high).count(),
                )
            })
            .collect();

        Some(Self {
            count: prices.len(),
            min,
            max,
            average,
            bands,
        })
    }
}

/// dry-run 时打印文件汇总和价格统计
pub fn log_dry_run(summaries: &[FileSummary], stats: Option<&PriceStats>) {
    info!("{}", "=".repeat(60));
    info!("🧪 DRY RUN - API 호출 없음");
    info!("{}", "=".repeat(60));
    for summary in summaries {
        match &summary.error {
            Some(error) => warn!("   ❌ {}: {}", summary.file_name, error),
            None => info!(
                "   📄 {}: 전체 {}행, 유효 {}개",
                summary.file_name, summary.total_rows, summary.valid_products
            ),
        }
    }

    let Some(stats) = stats else {
        warn!("⚠️ 유효한 상품이 없습니다");
        return;
    };
    info!("{}", "─".repeat(60));
    info!("💰 가격 통계 ({}개)", stats.count);
    info!("   최저가: {}원", stats.min);
    info!("   최고가: {}원", stats.max);
    info!("   평균가: {:.0}원", stats.average);
    for (label, count) in &stats.bands {
        info!("   {}: {}개", label, count);
    }
    info!("{}", "=".repeat(60));
}

/// dry-run 的商品清单
pub fn write_products_csv(path: &Path, products: &[CjProduct]) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::file_write_failed(parent.display().to_string(), e))?;
    }
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for product in products {
        writer.serialize(product)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
    info!("📄 상품 목록 저장: {} ({}개)", path.display(), products.len());
    Ok(())
}

/// 失败条目追加写入文本文件
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 每个失败一行：`[job] id | reason`，没有失败时不创建文件
    pub fn append(&self, job: &str, failures: &[(&str, &Failure)]) -> AppResult<usize> {
        if failures.is_empty() {
            return Ok(0);
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppError::file_write_failed(self.path.display().to_string(), e))?;

        let mut text = String::new();
        for (id, failure) in failures {
            text.push_str(&format!("[{}] {} | {}\n", job, id, failure.reason));
        }
        file.write_all(text.as_bytes())
            .map_err(|e| AppError::file_write_failed(self.path.display().to_string(), e))?;
        debug!("실패 기록 {}건 추가: {}", failures.len(), self.path.display());
        Ok(failures.len())
    }
}
