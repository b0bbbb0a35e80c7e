use std::path::Path;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig, Page};
use tracing::{debug, error, info};

use crate::browser::connection::drive_events;
use crate::error::{AppError, BrowserError};

/// 启动无头浏览器并导航到指定 URL
///
/// `chrome_executable` 为空时由 chromiumoxide 自动查找本机的 Chrome/Chromium
pub async fn launch_headless_browser(
    url: &str,
    chrome_executable: Option<&str>,
) -> Result<(Browser, Page)> {
    info!("🚀 启动无头浏览器...");
    debug!("目标 URL: {}", url);

    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--window-size=1920,1080",
    ]);
    if let Some(path) = chrome_executable {
        builder = builder.chrome_executable(Path::new(path));
    }
    let config = builder.build().map_err(|reason| {
        error!("配置无头浏览器失败: {}", reason);
        BrowserError::LaunchFailed { reason }
    })?;

    let (browser, handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        BrowserError::LaunchFailed {
            reason: e.to_string(),
        }
    })?;
    debug!("无头浏览器启动成功");

    drive_events(handler).await;

    let page = browser.new_page(url).await.map_err(|e| {
        error!("创建页面失败: {}", e);
        AppError::from(e)
    })?;

    info!("✅ 无头浏览器已导航到: {}", url);
    Ok((browser, page))
}
