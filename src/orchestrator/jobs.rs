//! 各任务的装配：加载条目 → 选择调用方和写入方 → 交给 `Pipeline`
//!
//! 浏览器和 HTTP 客户端只在这里创建，生命周期覆盖整次运行。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::browser::{configure_downloads, open_browser, DirListing, DownloadWatcher};
use crate::clients::CjClient;
use crate::config::Config;
use crate::infrastructure::JsExecutor;
use crate::models::loaders::{load_cj_folder, load_image_items, load_product_items};
use crate::pipeline::{chunk_size_for_workers, Failure, Pipeline, RetryPolicy, RunReport, Summary};
use crate::services::market::{append_creations, create_market_products, MarketPage};
use crate::services::report_writer::{log_dry_run, write_products_csv};
use crate::services::sheet_writer::row_index;
use crate::services::{
    cj_split, BflowExportInvoker, BflowSession, CjPriceFactory, CsvReportSink,
    ExistingExportInvoker, FailureLog, ImageColumnSink, ImagePageFactory, PriceStats,
    ProductColumns, StatusSheetSink,
};
use crate::sheets::SheetStore;
use crate::workbook::ExportIndex;

/// 失败明细追加到这个文件
pub const FAILURE_LOG_FILE: &str = "failed_items.txt";

/// 一个任务的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: String,
    pub summary: Summary,
    pub cancelled: bool,
    pub sink_failures: usize,
}

impl JobOutcome {
    pub fn empty(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            ..Default::default()
        }
    }

    pub fn from_run<O>(job: impl Into<String>, run: &RunReport<O>) -> Self {
        Self {
            job: job.into(),
            summary: run.report.summary,
            cancelled: run.cancelled,
            sink_failures: run.sink_failures,
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.summary.failed == 0 && self.sink_failures == 0
    }
}

fn record_failures<O>(job: &str, run: &RunReport<O>) {
    let log = FailureLog::with_path(FAILURE_LOG_FILE);
    match log.append(job, &run.report.failures()) {
        Ok(0) => {}
        Ok(n) => info!("📝 실패 {}건 기록: {}", n, log.path().display()),
        Err(e) => warn!("⚠️ 실패 기록 저장 실패: {}", e),
    }
}

fn element_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.element_timeout_secs)
}

/// b-flow 导出并写回表格
pub async fn download(
    config: &Config,
    store: Arc<dyn SheetStore>,
    cancel: &CancellationToken,
) -> Result<JobOutcome> {
    const JOB: &str = "download";
    let items = load_product_items(store.as_ref(), config).await?;
    if items.is_empty() {
        warn!("⚠️ 처리할 상품이 없습니다");
        return Ok(JobOutcome::empty(JOB));
    }
    let policy = RetryPolicy::from_config(config)?;
    let id = Config::require("BFLOW_ID", &config.bflow_id)?;
    let password = Config::require("BFLOW_PW", &config.bflow_pw)?;

    let (browser, page) = open_browser(config, &config.bflow_login_url).await?;
    let folder = configure_downloads(&browser, Path::new(&config.download_folder)).await?;

    let session = BflowSession::new(
        JsExecutor::new(page, element_timeout(config)),
        config.bflow_products_url.clone(),
    );
    session
        .login(&config.bflow_login_url, id, password)
        .await
        .context("b-flow 로그인 실패")?;
    session.open_products().await?;

    let watcher = DownloadWatcher::new(
        DirListing::new(folder),
        Duration::from_millis(config.download_poll_interval_ms),
        config.download_max_polls,
    );
    let invoker = BflowExportInvoker::new(session, watcher, config.sheet_name.clone());
    let sink = StatusSheetSink::new(
        store,
        row_index(&items),
        ProductColumns::with_status(config.status_column),
    );

    let run = Pipeline::sequential("b-flow 다운로드", policy, config.chunk_size)
        .run_sequential(items, &invoker, &sink, cancel)
        .await?;
    record_failures(JOB, &run);
    drop(browser);
    Ok(JobOutcome::from_run(JOB, &run))
}

/// 默认的已下载文件：`<download_folder>/<sheet_name>.xlsx`
pub fn default_export_file(config: &Config) -> PathBuf {
    Path::new(&config.download_folder).join(format!("{}.xlsx", config.sheet_name))
}

/// 用已下载的文件写回表格
pub async fn sync_file(
    config: &Config,
    store: Arc<dyn SheetStore>,
    file: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<JobOutcome> {
    const JOB: &str = "sync-file";
    let path = file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_export_file(config));
    info!("📄 기존 파일 사용: {}", path.display());
    let index = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || ExportIndex::load(&path)).await??
    };
    info!("✅ 파일에서 상품 {}개를 읽었습니다", index.len());

    let items = load_product_items(store.as_ref(), config).await?;
    if items.is_empty() {
        warn!("⚠️ 처리할 상품이 없습니다");
        return Ok(JobOutcome::empty(JOB));
    }

    let sink = StatusSheetSink::new(
        store,
        row_index(&items),
        ProductColumns::with_status(config.status_column),
    );
    let invoker = ExistingExportInvoker::new(index);
    let run = Pipeline::sequential("기존 파일 동기화", RetryPolicy::new(1)?, config.chunk_size)
        .run_sequential(items, &invoker, &sink, cancel)
        .await?;
    record_failures(JOB, &run);
    Ok(JobOutcome::from_run(JOB, &run))
}

/// 商品页面大图地址，多页面并行
pub async fn images(
    config: &Config,
    store: Arc<dyn SheetStore>,
    cancel: &CancellationToken,
) -> Result<JobOutcome> {
    const JOB: &str = "images";
    let items = load_image_items(store.as_ref(), config).await?;
    if items.is_empty() {
        warn!("⚠️ 처리할 URL이 없습니다");
        return Ok(JobOutcome::empty(JOB));
    }
    let policy = RetryPolicy::from_config(config)?;

    let (browser, page) = open_browser(config, "about:blank").await?;
    // worker 各自开页面
    drop(page);
    let browser = Arc::new(browser);
    let factory = Arc::new(ImagePageFactory::new(
        browser.clone(),
        element_timeout(config),
        policy.clone(),
    ));
    let sink = ImageColumnSink::new(store, config.image_column);

    let chunk_size = chunk_size_for_workers(items.len(), config.max_workers);
    let run = Pipeline::parallel("이미지 추출", policy, chunk_size, config.max_workers)
        .run_parallel(items, factory, &sink, cancel)
        .await?;
    record_failures(JOB, &run);
    Ok(JobOutcome::from_run(JOB, &run))
}

/// CJ 价格批量变更；`dry_run` 时只统计并输出商品清单
pub async fn cj_upload(config: &Config, dry_run: bool, cancel: &CancellationToken) -> Result<JobOutcome> {
    const JOB: &str = "cj-upload";
    let (products, summaries) = load_cj_folder(&config.cj_excel_folder).await?;

    if dry_run {
        let stats = PriceStats::from_products(&products);
        log_dry_run(&summaries, stats.as_ref());
        if !products.is_empty() {
            let path = Path::new(&config.cj_report_folder).join(format!(
                "cj_dry_run_products_{}.csv",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            ));
            write_products_csv(&path, &products)?;
        }
        return Ok(JobOutcome {
            job: JOB.to_string(),
            summary: Summary {
                total: products.len(),
                succeeded: 0,
                failed: 0,
            },
            ..Default::default()
        });
    }

    if products.is_empty() {
        warn!("⚠️ 업로드할 상품이 없습니다");
        return Ok(JobOutcome::empty(JOB));
    }
    let policy = RetryPolicy::from_config(config)?;
    let client = Arc::new(CjClient::from_config(config)?);
    let sink = CsvReportSink::create(Path::new(&config.cj_report_folder), &products)?;
    let items = products.iter().map(|p| p.to_work_item()).collect();

    let factory = Arc::new(CjPriceFactory::new(client, policy.clone()));

    let run = Pipeline::parallel("CJ 업로드", policy, config.cj_batch_size, config.max_workers)
        .with_chunk_pause(Duration::from_millis(config.cj_batch_delay_ms))
        .run_parallel(items, factory, &sink, cancel)
        .await?;
    record_failures(JOB, &run);
    Ok(JobOutcome::from_run(JOB, &run))
}

/// 对「판매중」商品逐个生成마켓상품，结果追加到 `store`
///
/// `confirmed` 为 false 时登录后先在终端确认
pub async fn market(
    config: &Config,
    store: Arc<dyn SheetStore>,
    confirmed: bool,
    cancel: &CancellationToken,
) -> Result<JobOutcome> {
    const JOB: &str = "market";
    let policy = RetryPolicy::from_config(config)?;
    let id = Config::require("BFLOW_ID", &config.bflow_id)?;
    let password = Config::require("BFLOW_PW", &config.bflow_pw)?;

    let (browser, page) = open_browser(config, &config.bflow_login_url).await?;
    let session = BflowSession::new(
        JsExecutor::new(page, element_timeout(config)),
        config.bflow_master_products_url.clone(),
    );
    session
        .login(&config.bflow_login_url, id, password)
        .await
        .context("b-flow 로그인 실패")?;
    session.js().goto(&config.bflow_master_products_url).await?;

    if !confirmed && !confirm_start().await? {
        info!("⏹️ 사용자 요청에 따라 작업을 종료합니다");
        return Ok(JobOutcome::empty(JOB));
    }

    let listing = MarketPage::new(session);
    listing.search_on_sale().await?;
    let run = create_market_products(&listing, &config.market_excluded_sellers, &policy, cancel).await;
    drop(browser);

    info!("{}", "=".repeat(60));
    info!(
        "📊 상품 {}개에서 마켓상품 {}개 생성 (제외 {} | 입점사 불명 {} | 실패 {} | {}페이지)",
        run.creations.len(),
        run.total_created(),
        run.excluded,
        run.unidentified,
        run.failures.len(),
        run.pages
    );
    info!("{}", "=".repeat(60));

    let mut sink_failures = 0;
    if let Err(e) = append_creations(store.as_ref(), &run.creations).await {
        warn!("❌ 시트 업데이트 실패: {}", e);
        sink_failures = run.creations.len();
    }

    let log = FailureLog::with_path(FAILURE_LOG_FILE);
    let failures: Vec<(&str, &Failure)> = run
        .failures
        .iter()
        .map(|(label, failure)| (label.as_str(), failure))
        .collect();
    if let Err(e) = log.append(JOB, &failures) {
        warn!("⚠️ 실패 기록 저장 실패: {}", e);
    }

    Ok(JobOutcome {
        job: JOB.to_string(),
        summary: Summary {
            total: run.creations.len() + run.failures.len(),
            succeeded: run.creations.len(),
            failed: run.failures.len(),
        },
        cancelled: run.cancelled,
        sink_failures,
    })
}

/// 终端输入 y/yes 才开始
async fn confirm_start() -> Result<bool> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all("자동화 작업을 시작하시겠습니까? (Y/N): ".as_bytes())
        .await?;
    stdout.flush().await?;
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut answer).await?;
    Ok(is_affirmative(&answer))
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// 拆分 CJ 原表
pub async fn cj_split(config: &Config) -> Result<JobOutcome> {
    const JOB: &str = "cj-split";
    let files = cj_split::split_source_file(
        Path::new(&config.cj_source_file),
        Path::new(&config.cj_template_file),
        Path::new(&config.cj_output_dir),
        config.cj_split_chunk_size,
    )
    .await?;
    info!("🎉 {}개 파일 생성 완료: {}", files.len(), config.cj_output_dir);
    Ok(JobOutcome {
        job: JOB.to_string(),
        summary: Summary {
            total: files.len(),
            succeeded: files.len(),
            failed: 0,
        },
        ..Default::default()
    })
}

/// 下载（或使用已有文件）后再提取图片
pub async fn all(
    config: &Config,
    store: Arc<dyn SheetStore>,
    skip_download: bool,
    skip_images: bool,
    cancel: &CancellationToken,
) -> Result<Vec<JobOutcome>> {
    let mut outcomes = Vec::new();
    let first = if skip_download {
        sync_file(config, store.clone(), None, cancel).await?
    } else {
        download(config, store.clone(), cancel).await?
    };
    outcomes.push(first);

    if skip_images {
        info!("⏭️ 이미지 추출 건너뜀");
    } else if cancel.is_cancelled() {
        warn!("⏹️ 중단되어 이미지 추출을 시작하지 않습니다");
    } else {
        outcomes.push(images(config, store, cancel).await?);
    }
    Ok(outcomes)
}
