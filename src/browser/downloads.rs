//! 下载完成检测
//!
//! 先记录下载目录的基线，再按固定间隔轮询，出现基线之外的完整文件即视为下载完成。
//! 未完成的临时文件（`.crdownload`、`.tmp`）不计入。轮询次数有上限。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{AppError, AppResult, BrowserError};

const PARTIAL_EXTENSIONS: [&str; 2] = ["crdownload", "tmp"];

/// 一个已完成的输出文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// 列出当前已完成的输出
#[async_trait]
pub trait OutputListing: Send + Sync {
    fn location(&self) -> String;

    async fn list(&self) -> AppResult<Vec<OutputFile>>;
}

/// 目录实现
#[derive(Debug, Clone)]
pub struct DirListing {
    folder: PathBuf,
}

impl DirListing {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| PARTIAL_EXTENSIONS.iter().any(|p| ext.eq_ignore_ascii_case(p)))
}

#[async_trait]
impl OutputListing for DirListing {
    fn location(&self) -> String {
        self.folder.display().to_string()
    }

    async fn list(&self) -> AppResult<Vec<OutputFile>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.folder)
            .await
            .map_err(|e| AppError::file_read_failed(self.location(), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::file_read_failed(self.location(), e))?
        {
            let path = entry.path();
            if is_partial(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            files.push(OutputFile {
                path,
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(files)
    }
}

pub struct DownloadWatcher<L: OutputListing> {
    listing: L,
    poll_interval: Duration,
    max_polls: u32,
}

impl<L: OutputListing> DownloadWatcher<L> {
    pub fn new(listing: L, poll_interval: Duration, max_polls: u32) -> Self {
        Self {
            listing,
            poll_interval,
            max_polls,
        }
    }

    /// 触发下载之前调用
    pub async fn snapshot(&self) -> AppResult<HashSet<PathBuf>> {
        Ok(self
            .listing
            .list()
            .await?
            .into_iter()
            .map(|f| f.path)
            .collect())
    }

    /// 等待基线之外的新文件，有多个时取最新的
    pub async fn wait_for_new(&self, baseline: &HashSet<PathBuf>) -> AppResult<PathBuf> {
        for poll in 1..=self.max_polls {
            let newest = self
                .listing
                .list()
                .await?
                .into_iter()
                .filter(|f| !baseline.contains(&f.path))
                .max_by_key(|f| f.modified);
            if let Some(file) = newest {
                info!("✅ 下载完成: {}", file.path.display());
                return Ok(file.path);
            }
            debug!("等待下载中... ({}/{})", poll, self.max_polls);
            sleep(self.poll_interval).await;
        }

        Err(BrowserError::DownloadNotDetected {
            folder: self.listing.location(),
            polls: self.max_polls,
        }
        .into())
    }
}

/// 把下载文件改名为 `<folder>/<stem>.<原扩展名>`，已存在的同名文件会被替换
pub async fn rename_download(downloaded: &Path, stem: &str) -> AppResult<PathBuf> {
    let folder = downloaded.parent().unwrap_or_else(|| Path::new("."));
    let ext = downloaded
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("xlsx");
    let target = folder.join(format!("{}.{}", stem, ext));
    if target == downloaded {
        return Ok(target);
    }

    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| AppError::file_write_failed(target.display().to_string(), e))?;
    }
    tokio::fs::rename(downloaded, &target)
        .await
        .map_err(|e| AppError::file_write_failed(target.display().to_string(), e))?;
    info!("📄 文件已改名: {}", target.display());
    Ok(target)
}
