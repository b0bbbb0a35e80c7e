use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, Handler, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::browser::headless::launch_headless_browser;
use crate::config::Config;
use crate::error::{AppError, BrowserError};

/// 按配置打开浏览器：`headless` 时自行启动，否则连接调试端口上已打开的浏览器
pub async fn open_browser(config: &Config, target_url: &str) -> Result<(Browser, Page)> {
    if config.headless {
        launch_headless_browser(target_url, config.chrome_executable.as_deref()).await
    } else {
        connect_to_browser_and_page(config.browser_debug_port, Some(target_url), None).await
    }
}

/// 连接到浏览器并获取页面
pub async fn connect_to_browser_and_page(
    port: u16,
    target_url: Option<&str>,
    target_title: Option<&str>,
) -> Result<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);
    debug!("目标 URL: {:?}, 目标标题: {:?}", target_url, target_title);

    let (browser, handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        AppError::browser_connection_failed(port, e)
    })?;
    debug!("浏览器连接成功");

    drive_events(handler).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    // 如果指定了目标标题，尝试查找匹配的页面
    if let Some(title) = target_title {
        for p in pages.iter() {
            if let Ok(Some(page_title)) = p.get_title().await {
                if page_title.contains(title) {
                    info!("✓ 找到目标页面: {}", page_title);
                    return Ok((browser, p.clone()));
                }
            }
        }
        debug!("未找到匹配的页面，将创建新页面");
    }

    let new_page = browser
        .new_page(target_url.unwrap_or("about:blank"))
        .await
        .map_err(|e| {
            error!("创建新页面失败: {}", e);
            AppError::from(e)
        })?;
    if let Some(url) = target_url {
        info!("已导航到: {}", url);
    }

    Ok((browser, new_page))
}

/// 后台消费浏览器事件，稍等页面状态同步
pub(crate) async fn drive_events(mut handler: Handler) {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });
    sleep(Duration::from_millis(300)).await;
}

/// 把下载目录设为 `folder`（不存在时创建），返回绝对路径
pub async fn configure_downloads(browser: &Browser, folder: &Path) -> Result<std::path::PathBuf> {
    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("无法创建下载目录: {}", folder.display()))?;
    let absolute = tokio::fs::canonicalize(folder)
        .await
        .with_context(|| format!("无法解析下载目录: {}", folder.display()))?;

    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(absolute.to_string_lossy().to_string())
        .build()
        .map_err(|reason| BrowserError::LaunchFailed { reason })?;
    browser.execute(params).await.map_err(AppError::from)?;

    info!("📁 下载目录: {}", absolute.display());
    Ok(absolute)
}
