/// CJ 온스타일 协力社价格变更 API 客户端
///
/// 每次请求只变更一个商品的价格。HTTP 200 也可能是业务失败：
/// 响应里 `error: true` 或 `failList` 非空都按失败处理。
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use reqwest::{Client, Proxy, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult, ConfigError};
use crate::models::CjProduct;

const PRICE_CHANGE_REASON_CODE: &str = "50";
const ACCESS_LEVEL: &str = "01";
const APPLY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// 生效时间默认比当前晚 10 秒
const APPLY_DELAY_SECS: i64 = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PriceChangeRequest<'a> {
    price_change_name: String,
    price_change_reason_code: &'a str,
    access_level: &'a str,
    sale_price_information_list: Vec<SalePriceInformation<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SalePriceInformation<'a> {
    item_code: &'a str,
    sale_price: i64,
    commission_rate: Option<f64>,
    apply_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceChangeBody {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    return_message: Option<String>,
    #[serde(default)]
    fail_list: Vec<FailEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FailEntry {
    #[serde(default)]
    error_message: Option<String>,
}

/// 一次成功的价格变更
#[derive(Debug, Clone, PartialEq)]
pub struct CjResponse {
    pub status_code: u16,
    pub data: Value,
}

pub struct CjClient {
    client: Client,
    api_url: String,
    vendor_code: String,
    auth_key: String,
}

impl CjClient {
    /// 从配置创建，`cj_auth_key` 为必填；配置了代理时所有请求走代理
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let auth_key = Config::require("CJ_AUTH_KEY", &config.cj_auth_key)?;

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.cj_request_timeout_secs))
            .connect_timeout(Duration::from_secs(10));
        if let Some(proxy) = config.cj_proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = Proxy::all(proxy).map_err(|e| {
                AppError::Config(ConfigError::InvalidValue {
                    name: "HTTPS_PROXY".to_string(),
                    reason: e.to_string(),
                })
            })?;
            builder = builder.proxy(proxy);
            info!("🌐 CJ API 使用代理");
        }

        Ok(Self {
            client: builder.build()?,
            api_url: config.cj_api_url.clone(),
            vendor_code: config.cj_vendor_code.clone(),
            auth_key: auth_key.to_string(),
        })
    }

    /// 指定接口地址（测试时指向 mock server）
    pub fn with_api_url(api_url: &str, vendor_code: &str, auth_key: &str) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            vendor_code: vendor_code.to_string(),
            auth_key: auth_key.to_string(),
        })
    }

    /// 变更单个商品价格，生效时间为当前时间 + 10 秒
    pub async fn change_price(&self, product: &CjProduct) -> AppResult<CjResponse> {
        let apply_at = Local::now().naive_local() + chrono::Duration::seconds(APPLY_DELAY_SECS);
        self.change_price_at(product, apply_at).await
    }

    pub async fn change_price_at(
        &self,
        product: &CjProduct,
        apply_at: NaiveDateTime,
    ) -> AppResult<CjResponse> {
        let request = PriceChangeRequest {
            price_change_name: format!("CJ일괄업로드-{}-{}", product.file_name, product.item_code),
            price_change_reason_code: PRICE_CHANGE_REASON_CODE,
            access_level: ACCESS_LEVEL,
            sale_price_information_list: vec![SalePriceInformation {
                item_code: &product.item_code,
                sale_price: product.sale_price,
                commission_rate: product.commission_rate,
                apply_date: apply_at.format(APPLY_DATE_FORMAT).to_string(),
            }],
        };
        debug!("CJ 改价请求: {} → {}", product.item_code, product.sale_price);

        let response = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json;charset=UTF-8")
            .header("vendorCode", &self.vendor_code)
            .header("authentication", &self.auth_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
                    endpoint: self.api_url.clone(),
                },
                _ => ApiError::BadStatus {
                    endpoint: self.api_url.clone(),
                    status: status.as_u16(),
                    body: text,
                },
            }
            .into());
        }

        let data: Value = if text.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&text)?
        };
        let body: PriceChangeBody = serde_json::from_value(data.clone()).unwrap_or_default();
        if let Some(message) = rejection_message(&body) {
            return Err(ApiError::Rejected {
                endpoint: self.api_url.clone(),
                message,
            }
            .into());
        }

        Ok(CjResponse {
            status_code: status.as_u16(),
            data,
        })
    }
}

fn rejection_message(body: &PriceChangeBody) -> Option<String> {
    if body.error {
        return Some(
            body.return_message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
        );
    }
    body.fail_list.first().map(|entry| {
        entry
            .error_message
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string())
    })
}
