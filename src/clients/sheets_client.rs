/// Google Sheets values API 客户端
///
/// 只用到两个接口：`values/{range}` 读取和 `values:batchUpdate` 批量写入
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult, ConfigError};
use crate::sheets::{a1, CellUpdate, SheetStore};

/// 绑定到一个工作表的客户端
pub struct GoogleSheetsClient {
    client: Client,
    base_url: Url,
    token: String,
    spreadsheet_id: String,
    sheet_name: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateResponse {
    #[serde(default)]
    total_updated_cells: Option<usize>,
}

impl GoogleSheetsClient {
    /// 从配置创建，`sheets_token` 和 `spreadsheet_id` 为必填
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::for_sheet(config, &config.sheet_name)
    }

    /// 同一表格文件中的另一个工作表
    pub fn for_sheet(config: &Config, sheet_name: &str) -> AppResult<Self> {
        let token = Config::require("SHEETS_TOKEN", &config.sheets_token)?;
        let spreadsheet_id = Config::require("SPREADSHEET_ID", &config.spreadsheet_id)?;
        Self::with_base_url(
            &config.sheets_api_base_url,
            token,
            spreadsheet_id,
            sheet_name,
            config.cj_request_timeout_secs,
        )
    }

    /// 指定 API 根地址（测试时指向 mock server）
    pub fn with_base_url(
        base_url: &str,
        token: &str,
        spreadsheet_id: &str,
        sheet_name: &str,
        timeout_secs: u64,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let base_url = Url::parse(base_url).map_err(|e| {
            AppError::Config(ConfigError::InvalidValue {
                name: "sheets_api_base_url".to_string(),
                reason: e.to_string(),
            })
        })?;

        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_name: sheet_name.to_string(),
        })
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// `{base}/v4/spreadsheets/{id}/{tail...}`，每段单独编码
    fn endpoint(&self, tail: &[&str]) -> AppResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Other(format!("无效的 API 地址: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> AppResult<reqwest::Response> {
        let endpoint = response.url().path().to_string();
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ApiError::Unauthorized { endpoint }.into())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::BadStatus {
                    endpoint,
                    status: status.as_u16(),
                    body,
                }
                .into())
            }
        }
    }
}

#[async_trait]
impl SheetStore for GoogleSheetsClient {
    async fn read_range(&self, range: &str) -> AppResult<Vec<Vec<String>>> {
        let qualified = a1::qualified(&self.sheet_name, range);
        let url = self.endpoint(&["values", &qualified])?;
        debug!("读取表格区间: {}", qualified);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: ValueRange = Self::check(response).await?.json().await?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn batch_update(&self, updates: &[CellUpdate]) -> AppResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut data = Vec::with_capacity(updates.len());
        for update in updates {
            let range = a1::qualified(&self.sheet_name, &a1::cell(update.row, update.column)?);
            data.push(json!({
                "range": range,
                "values": [[update.value]],
            }));
        }
        let payload = json!({
            "valueInputOption": "USER_ENTERED",
            "data": data,
        });

        let url = self.endpoint(&["values:batchUpdate"])?;
        debug!("批量写入 {} 个单元格", updates.len());
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let body: BatchUpdateResponse = Self::check(response).await?.json().await?;

        Ok(body.total_updated_cells.unwrap_or(updates.len()))
    }
}

/// 数字等非字符串单元格按显示文本处理
fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
