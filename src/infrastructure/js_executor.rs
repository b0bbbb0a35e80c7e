//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS / 等待元素 / 点击 / 输入 / 刷新"的能力。
//! 所有等待都有上限，超时返回 `BrowserError::ElementNotFound` 或 `AppError::Timeout`。

use std::time::Duration;

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::error::{AppError, AppResult, BrowserError};

/// 元素等待时的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 页面元素定位方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Locator::XPath(expr.into())
    }

    /// 求值为元素或 null 的 JS 表达式
    pub fn js_find(&self) -> String {
        match self {
            Locator::Css(selector) => {
                format!("document.querySelector({})", js_string(selector))
            }
            Locator::XPath(expr) => format!(
                "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                js_string(expr)
            ),
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            Locator::Css(s) | Locator::XPath(s) => s,
        }
    }
}

/// 转成 JS 字符串字面量
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力和有上限的元素等待
/// - 不认识商品 / 批次
pub struct JsExecutor {
    page: Page,
    element_timeout: Duration,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page, element_timeout: Duration) -> Self {
        Self {
            page,
            element_timeout,
        }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn element_timeout(&self) -> Duration {
        self.element_timeout
    }

    /// 执行 JS 代码并返回 JSON 结果
    ///
    /// # 参数
    /// - `js_code`: 要执行的 JavaScript 代码
    ///
    /// # 返回
    /// 返回 JSON 值
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value().unwrap_or(JsonValue::Null);
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    ///
    /// # 参数
    /// - `js_code`: 要执行的 JavaScript 代码
    ///
    /// # 返回
    /// 返回反序列化后的类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 导航到 URL，超过元素等待上限视为超时
    pub async fn goto(&self, url: &str) -> AppResult<()> {
        debug!("导航到: {}", url);
        timeout(self.element_timeout, self.page.goto(url))
            .await
            .map_err(|_| AppError::timeout(format!("打开 {}", url), self.element_timeout))??;
        Ok(())
    }

    /// 刷新当前页面
    pub async fn reload(&self) -> AppResult<()> {
        timeout(self.element_timeout, self.page.reload())
            .await
            .map_err(|_| AppError::timeout("刷新页面", self.element_timeout))??;
        Ok(())
    }

    pub async fn exists(&self, locator: &Locator) -> AppResult<bool> {
        let script = format!("(() => {{ return !!({}); }})()", locator.js_find());
        self.eval_as(script).await
    }

    /// 等待元素出现
    pub async fn wait_for(&self, locator: &Locator) -> AppResult<()> {
        self.wait_for_within(locator, self.element_timeout).await
    }

    pub async fn wait_for_within(&self, locator: &Locator, limit: Duration) -> AppResult<()> {
        let deadline = Instant::now() + limit;
        loop {
            // 页面跳转中执行脚本可能失败，继续等
            if let Ok(true) = self.exists(locator).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound {
                    selector: locator.describe().to_string(),
                }
                .into());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// 等待元素消失（例如弹窗关闭）
    pub async fn wait_until_gone(&self, locator: &Locator, limit: Duration) -> AppResult<()> {
        let deadline = Instant::now() + limit;
        while self.exists(locator).await.unwrap_or(true) {
            if Instant::now() >= deadline {
                return Err(AppError::timeout(
                    format!("等待 {} 消失", locator.describe()),
                    limit,
                ));
            }
            sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// 等待元素出现后点击
    pub async fn click(&self, locator: &Locator) -> AppResult<()> {
        self.wait_for(locator).await?;
        let script = format!(
            r#"(() => {{
                const el = {};
                if (!el) return false;
                el.scrollIntoView({{ block: "center" }});
                el.click();
                return true;
            }})()"#,
            locator.js_find()
        );
        if self.eval_as::<bool>(script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: locator.describe().to_string(),
            }
            .into())
        }
    }

    /// 向输入框写入文本并触发 input/change 事件
    pub async fn type_text(&self, locator: &Locator, text: &str) -> AppResult<()> {
        self.wait_for(locator).await?;
        let script = format!(
            r#"(() => {{
                const el = {};
                if (!el) return false;
                el.focus();
                const proto = el.tagName === "TEXTAREA"
                    ? window.HTMLTextAreaElement.prototype
                    : window.HTMLInputElement.prototype;
                const setter = Object.getOwnPropertyDescriptor(proto, "value").set;
                setter.call(el, {});
                el.dispatchEvent(new Event("input", {{ bubbles: true }}));
                el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                return true;
            }})()"#,
            locator.js_find(),
            js_string(text)
        );
        if self.eval_as::<bool>(script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: locator.describe().to_string(),
            }
            .into())
        }
    }

    /// 页面上的 confirm/alert 自动确认（页面刷新后需要重新调用）
    pub async fn auto_accept_dialogs(&self) -> AppResult<()> {
        self.eval(
            r#"(() => {
                window.confirm = () => true;
                window.alert = () => {};
                return true;
            })()"#,
        )
        .await?;
        Ok(())
    }
}
