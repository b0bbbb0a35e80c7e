//! 应用入口 - 编排层
//!
//! 初始化日志文件、注册 Ctrl+C、按任务创建表格客户端并分发。
//! 取消只阻止新批次开始，已汇总的结果照常写出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::GoogleSheetsClient;
use crate::config::Config;
use crate::orchestrator::jobs::{self, JobOutcome};
use crate::sheets::SheetStore;
use crate::utils::logging;

/// 可运行的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Download,
    SyncFile { file: Option<PathBuf> },
    Images,
    CjUpload { dry_run: bool },
    CjSplit,
    Market { yes: bool },
    All { skip_download: bool, skip_images: bool },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Download => "download",
            Job::SyncFile { .. } => "sync-file",
            Job::Images => "images",
            Job::CjUpload { .. } => "cj-upload",
            Job::CjSplit => "cj-split",
            Job::Market { .. } => "market",
            Job::All { .. } => "all",
        }
    }

    /// 需要主工作表的任务（market 写入自己的工作表）
    pub fn uses_sheet(&self) -> bool {
        !matches!(self, Job::CjUpload { .. } | Job::CjSplit | Job::Market { .. })
    }
}

/// 应用主结构
pub struct App {
    config: Config,
    cancel: CancellationToken,
}

impl App {
    /// 初始化应用
    pub fn initialize(config: Config, config_source: &str, job: &Job) -> Result<Self> {
        logging::init_log_file(&config.output_log_file, job.name())?;
        logging::log_startup(job.name(), config_source);

        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 第一次 Ctrl+C 取消运行，第二次立即退出
    pub fn watch_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut presses = 0;
            while tokio::signal::ctrl_c().await.is_ok() {
                presses += 1;
                if let Some(code) = handle_interrupt(presses, &cancel) {
                    error!("⏹️ 다시 중단 요청을 받아 즉시 종료합니다");
                    std::process::exit(code);
                }
                warn!("⏹️ 중단 요청을 받았습니다. 진행 중인 배치가 끝나면 종료합니다... (한 번 더 누르면 즉시 종료)");
            }
        });
    }

    fn sheet_store(&self) -> Result<Arc<dyn SheetStore>> {
        Ok(Arc::new(GoogleSheetsClient::from_config(&self.config)?))
    }

    /// 运行任务，返回每个子任务的结果
    pub async fn run(&self, job: Job) -> Result<Vec<JobOutcome>> {
        let store = if job.uses_sheet() {
            Some(self.sheet_store()?)
        } else {
            None
        };
        let config = &self.config;
        let cancel = &self.cancel;

        let outcomes = match (job, store) {
            (Job::Download, Some(store)) => vec![jobs::download(config, store, cancel).await?],
            (Job::SyncFile { file }, Some(store)) => {
                vec![jobs::sync_file(config, store, file.as_deref(), cancel).await?]
            }
            (Job::Images, Some(store)) => vec![jobs::images(config, store, cancel).await?],
            (
                Job::All {
                    skip_download,
                    skip_images,
                },
                Some(store),
            ) => jobs::all(config, store, skip_download, skip_images, cancel).await?,
            (Job::CjUpload { dry_run }, _) => vec![jobs::cj_upload(config, dry_run, cancel).await?],
            (Job::CjSplit, _) => vec![jobs::cj_split(config).await?],
            (Job::Market { yes }, _) => {
                let store: Arc<dyn SheetStore> = Arc::new(GoogleSheetsClient::for_sheet(
                    config,
                    &config.market_sheet_name,
                )?);
                vec![jobs::market(config, store, yes, cancel).await?]
            }
            (job, None) => anyhow::bail!("任务 {} 缺少表格客户端", job.name()),
        };

        log_outcomes(&outcomes);
        Ok(outcomes)
    }
}

/// 第 `presses` 次中断：第一次只取消，之后返回退出码
fn handle_interrupt(presses: u32, cancel: &CancellationToken) -> Option<i32> {
    if presses <= 1 {
        cancel.cancel();
        None
    } else {
        Some(INTERRUPTED_EXIT_CODE)
    }
}

/// 128 + SIGINT
const INTERRUPTED_EXIT_CODE: i32 = 130;

fn log_outcomes(outcomes: &[JobOutcome]) {
    info!("{}", "=".repeat(60));
    for outcome in outcomes {
        let mark = if outcome.is_clean() { "✅" } else { "⚠️" };
        info!(
            "{} {}: 성공 {}/{} | 실패 {}{}",
            mark,
            outcome.job,
            outcome.summary.succeeded,
            outcome.summary.total,
            outcome.summary.failed,
            if outcome.cancelled { " | 중단됨" } else { "" }
        );
    }
    info!("{}", "=".repeat(60));
}
