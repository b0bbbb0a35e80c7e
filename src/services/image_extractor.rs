/// 商品详情页大图地址提取
///
/// 每个 worker 一个页面。依次尝试：当前激活的轮播图 → 第一个图片 div → 所有图片 div，
/// 取第一个带 `background-image` 的 style 中的 url。
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Browser;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::infrastructure::{JsExecutor, Locator};
use crate::models::work_item::FIELD_URL;
use crate::models::WorkItem;
use crate::pipeline::{AttemptResult, Failure, InvokerFactory, ItemOperation, PerItem, RetryPolicy};

const ACTIVE_SLIDE: &str = "div.swiper-slide-active div.product-image-swipe";
const IMAGE_DIV: &str = "div.product-image-swipe";
/// 激活轮播图的等待上限，超过后走兜底
const ACTIVE_SLIDE_WAIT: Duration = Duration::from_secs(5);

/// 候选 style，按优先级排列
const COLLECT_STYLES_JS: &str = r#"(() => {
    const styles = [];
    const active = document.querySelector("div.swiper-slide-active div.product-image-swipe");
    if (active) styles.push(active.getAttribute("style") || "");
    for (const el of document.querySelectorAll("div.product-image-swipe")) {
        styles.push(el.getAttribute("style") || "");
    }
    return styles;
})()"#;

/// 从 style 属性中取出 `background-image` 的 url
pub fn extract_background_url(style: &str) -> Option<String> {
    if !style.contains("background-image") {
        return None;
    }
    let Ok(re) = Regex::new(r#"url\(["']?([^"')]+)["']?\)"#) else {
        return None;
    };
    re.captures(style)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|url| !url.is_empty())
}

/// 第一个能取到 url 的 style
pub fn first_image_url<'a>(styles: impl IntoIterator<Item = &'a str>) -> Option<String> {
    styles.into_iter().find_map(extract_background_url)
}

pub struct ImageUrlOperation {
    js: JsExecutor,
}

impl ImageUrlOperation {
    pub fn new(js: JsExecutor) -> Self {
        Self { js }
    }

    async fn extract(&self, url: &str) -> AppResult<Option<String>> {
        self.js.goto(url).await?;
        if self
            .js
            .wait_for_within(&Locator::css(ACTIVE_SLIDE), ACTIVE_SLIDE_WAIT)
            .await
            .is_err()
        {
            debug!("활성 슬라이드 없음, 대체 셀렉터 사용: {}", IMAGE_DIV);
        }
        let styles: Vec<String> = self.js.eval_as(COLLECT_STYLES_JS).await?;
        Ok(first_image_url(styles.iter().map(String::as_str)))
    }
}

#[async_trait]
impl ItemOperation for ImageUrlOperation {
    type Output = String;

    fn name(&self) -> &str {
        "이미지 URL 추출"
    }

    async fn call(&self, item: &WorkItem) -> AttemptResult<String> {
        let url = item
            .field(FIELD_URL)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Failure::permanent(format!("{}행: URL 없음", item.id())))?;

        match self.extract(url).await? {
            Some(image) => {
                debug!("🖼️ {}행 → {}", item.id(), image);
                Ok(image)
            }
            None => {
                warn!("⚠️ 이미지 URL을 찾을 수 없습니다: {}", url);
                Err(Failure::permanent(format!("이미지 URL 없음: {}", url)))
            }
        }
    }

    async fn recover(&self) -> anyhow::Result<()> {
        self.js.goto("about:blank").await?;
        Ok(())
    }
}

/// 每个 worker 在同一个浏览器里开一个新页面
///
/// `policy` 用于逐条 URL 的重试和限时
pub struct ImagePageFactory {
    browser: Arc<Browser>,
    element_timeout: Duration,
    policy: RetryPolicy,
}

impl ImagePageFactory {
    pub fn new(browser: Arc<Browser>, element_timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            browser,
            element_timeout,
            policy,
        }
    }
}

#[async_trait]
impl InvokerFactory for ImagePageFactory {
    type Invoker = PerItem<ImageUrlOperation>;

    async fn create(&self, worker: usize) -> anyhow::Result<Self::Invoker> {
        let page = self.browser.new_page("about:blank").await?;
        info!("[워커 {}] 🧭 새 페이지 준비 완료", worker + 1);
        let operation = ImageUrlOperation::new(JsExecutor::new(page, self.element_timeout));
        Ok(PerItem::new(operation, self.policy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_url_is_extracted_with_any_quoting() {
        assert_eq!(
            extract_background_url(r#"background-image: url("https://img.brich.co.kr/a.jpg");"#),
            Some("https://img.brich.co.kr/a.jpg".to_string())
        );
        assert_eq!(
            extract_background_url("width: 100%; background-image: url('//cdn/b.png')"),
            Some("//cdn/b.png".to_string())
        );
        assert_eq!(
            extract_background_url("background-image: url(https://cdn/c.webp)"),
            Some("https://cdn/c.webp".to_string())
        );
    }

    #[test]
    fn styles_without_background_are_skipped() {
        assert_eq!(extract_background_url("width: 100%"), None);
        assert_eq!(extract_background_url("background-image: none"), None);
        assert_eq!(
            first_image_url(["", "height: 10px", "background-image: url(\"x.jpg\")"]),
            Some("x.jpg".to_string())
        );
        assert_eq!(first_image_url(Vec::<&str>::new()), None);
    }
}
