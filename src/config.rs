//! 程序配置
//!
//! 加载顺序：默认值 → TOML 配置文件（可选）→ 环境变量（`.env` 会先被加载）。

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "deal_batch.toml";

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 批处理 ---
    /// b-flow 每次搜索的商品数量
    pub chunk_size: usize,
    /// 每个批次最多尝试次数
    pub retry_count: u32,
    /// 两次尝试之间的等待（毫秒）
    pub retry_delay_ms: u64,
    /// 单次尝试的超时（秒）
    pub attempt_timeout_secs: u64,
    /// 并行模式的 worker 数量
    pub max_workers: usize,
    /// 永久错误是否也重试
    pub retry_permanent: bool,

    // --- 浏览器 ---
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    /// 是否启动无头浏览器（否则连接已打开的浏览器）
    pub headless: bool,
    /// 浏览器可执行文件路径
    pub chrome_executable: Option<String>,
    /// 等待页面元素的上限（秒）
    pub element_timeout_secs: u64,

    // --- b-flow ---
    pub bflow_login_url: String,
    pub bflow_products_url: String,
    pub bflow_id: String,
    pub bflow_pw: String,
    /// 마켓상품생성用的商品列表页
    pub bflow_master_products_url: String,
    /// 不生成마켓상품的입점사
    pub market_excluded_sellers: Vec<String>,
    /// 生成结果追加到的工作表
    pub market_sheet_name: String,
    /// 下载文件保存目录
    pub download_folder: String,
    /// 轮询下载目录的间隔（毫秒）
    pub download_poll_interval_ms: u64,
    /// 轮询下载目录的最大次数
    pub download_max_polls: u32,

    // --- Google Sheets ---
    pub sheets_api_base_url: String,
    pub sheets_token: String,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// 商品编号所在列（A=1）
    pub product_id_column: u32,
    /// 商品名所在列
    pub product_name_column: u32,
    /// 状态写入列
    pub status_column: u32,
    /// 数据起始行
    pub start_row: u32,
    /// 商品链接列（优先）
    pub primary_url_column: u32,
    /// 商品链接列（备用）
    pub fallback_url_column: u32,
    /// 图片地址写入列
    pub image_column: u32,

    // --- CJ ---
    pub cj_api_url: String,
    pub cj_vendor_code: String,
    pub cj_auth_key: String,
    pub cj_proxy: Option<String>,
    pub cj_request_timeout_secs: u64,
    pub cj_batch_size: usize,
    /// 批次之间的等待（毫秒）
    pub cj_batch_delay_ms: u64,
    pub cj_excel_folder: String,
    pub cj_report_folder: String,
    pub cj_source_file: String,
    /// 拆分用的 CJ 上传表格模板
    pub cj_template_file: String,
    pub cj_output_dir: String,
    pub cj_split_chunk_size: usize,

    // --- 日志 ---
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            retry_count: 3,
            retry_delay_ms: 3000,
            attempt_timeout_secs: 300,
            max_workers: 4,
            retry_permanent: false,
            browser_debug_port: 9222,
            headless: false,
            chrome_executable: None,
            element_timeout_secs: 20,
            bflow_login_url: "https://b-flow.co.kr/login?".to_string(),
            bflow_products_url: "https://b-flow.co.kr/products/new#/".to_string(),
            bflow_id: String::new(),
            bflow_pw: String::new(),
            bflow_master_products_url: "https://b-flow.co.kr/products-v2#/".to_string(),
            market_excluded_sellers: ["애경생활", "애경뷰티통합", "애경티슬로", "롯데웰푸드", "아이허브(iHerb)"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            market_sheet_name: "2.0 마스터상품".to_string(),
            download_folder: "downloads".to_string(),
            download_poll_interval_ms: 1000,
            download_max_polls: 60,
            sheets_api_base_url: "https://sheets.googleapis.com".to_string(),
            sheets_token: String::new(),
            spreadsheet_id: String::new(),
            sheet_name: String::new(),
            product_id_column: 2,
            product_name_column: 3,
            status_column: 4,
            start_row: 5,
            primary_url_column: 61,
            fallback_url_column: 60,
            image_column: 62,
            cj_api_url: "https://ingress-api.cjoshopping.com/item/setItemPriceMod".to_string(),
            cj_vendor_code: "456988".to_string(),
            cj_auth_key: String::new(),
            cj_proxy: None,
            cj_request_timeout_secs: 30,
            cj_batch_size: 50,
            cj_batch_delay_ms: 2000,
            cj_excel_folder: "data/cj_discount_excel".to_string(),
            cj_report_folder: "output/cj_upload_reports".to_string(),
            cj_source_file: "data/CJ할인원본.xlsx".to_string(),
            cj_template_file: "data/CJ 할인 시트_0.xlsx".to_string(),
            cj_output_dir: "output/cj_discount".to_string(),
            cj_split_chunk_size: 500,
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
        }
    }
}

impl Config {
    /// 加载配置：默认值 → 配置文件 → 环境变量
    ///
    /// 显式指定的配置文件不存在时报错；默认配置文件不存在则跳过。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取，缺失的字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileParseFailed {
                path: path.display().to_string(),
                source: Box::new(e),
            })?;
        toml::from_str(&content).map_err(|e| ConfigError::FileParseFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })
    }

    /// 用环境变量覆盖配置
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("CHUNK_SIZE", &mut self.chunk_size)?;
        env_override("RETRY_COUNT", &mut self.retry_count)?;
        env_override("RETRY_DELAY_MS", &mut self.retry_delay_ms)?;
        env_override("ATTEMPT_TIMEOUT_SECS", &mut self.attempt_timeout_secs)?;
        env_override("MAX_WORKERS", &mut self.max_workers)?;
        env_override("RETRY_PERMANENT", &mut self.retry_permanent)?;

        env_override("BROWSER_DEBUG_PORT", &mut self.browser_debug_port)?;
        env_override("HEADLESS", &mut self.headless)?;
        env_override_opt("CHROME_EXECUTABLE", &mut self.chrome_executable);
        env_override("ELEMENT_TIMEOUT_SECS", &mut self.element_timeout_secs)?;

        env_override("BFLOW_LOGIN_URL", &mut self.bflow_login_url)?;
        env_override("BFLOW_PRODUCTS_URL", &mut self.bflow_products_url)?;
        env_override("BFLOW_ID", &mut self.bflow_id)?;
        env_override("BFLOW_PW", &mut self.bflow_pw)?;
        env_override("BFLOW_MASTER_PRODUCTS_URL", &mut self.bflow_master_products_url)?;
        env_override_list("MARKET_EXCLUDED_SELLERS", &mut self.market_excluded_sellers);
        env_override("MARKET_SHEET_NAME", &mut self.market_sheet_name)?;
        env_override("DOWNLOAD_FOLDER", &mut self.download_folder)?;
        env_override("DOWNLOAD_POLL_INTERVAL_MS", &mut self.download_poll_interval_ms)?;
        env_override("DOWNLOAD_MAX_POLLS", &mut self.download_max_polls)?;

        env_override("SHEETS_API_BASE_URL", &mut self.sheets_api_base_url)?;
        env_override("SHEETS_TOKEN", &mut self.sheets_token)?;
        env_override("SPREADSHEET_ID", &mut self.spreadsheet_id)?;
        env_override("SHEET_NAME", &mut self.sheet_name)?;
        env_override("PRODUCT_ID_COLUMN", &mut self.product_id_column)?;
        env_override("PRODUCT_NAME_COLUMN", &mut self.product_name_column)?;
        env_override("STATUS_COLUMN", &mut self.status_column)?;
        env_override("START_ROW", &mut self.start_row)?;
        env_override("PRIMARY_URL_COLUMN", &mut self.primary_url_column)?;
        env_override("FALLBACK_URL_COLUMN", &mut self.fallback_url_column)?;
        env_override("IMAGE_COLUMN", &mut self.image_column)?;

        env_override("CJ_API_URL", &mut self.cj_api_url)?;
        env_override("CJ_VENDOR_CODE", &mut self.cj_vendor_code)?;
        env_override("CJ_AUTH_KEY", &mut self.cj_auth_key)?;
        env_override_opt("HTTPS_PROXY", &mut self.cj_proxy);
        env_override("CJ_REQUEST_TIMEOUT_SECS", &mut self.cj_request_timeout_secs)?;
        env_override("CJ_BATCH_SIZE", &mut self.cj_batch_size)?;
        env_override("CJ_BATCH_DELAY_MS", &mut self.cj_batch_delay_ms)?;
        env_override("CJ_EXCEL_FOLDER", &mut self.cj_excel_folder)?;
        env_override("CJ_REPORT_FOLDER", &mut self.cj_report_folder)?;
        env_override("CJ_SOURCE_FILE", &mut self.cj_source_file)?;
        env_override("CJ_TEMPLATE_FILE", &mut self.cj_template_file)?;
        env_override("CJ_OUTPUT_DIR", &mut self.cj_output_dir)?;
        env_override("CJ_CHUNK_SIZE", &mut self.cj_split_chunk_size)?;

        env_override("VERBOSE_LOGGING", &mut self.verbose_logging)?;
        env_override("OUTPUT_LOG_FILE", &mut self.output_log_file)?;
        Ok(())
    }

    /// 检查数值配置的取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("chunk_size", self.chunk_size)?;
        positive("cj_batch_size", self.cj_batch_size)?;
        positive("cj_split_chunk_size", self.cj_split_chunk_size)?;
        positive("max_workers", self.max_workers)?;
        positive("retry_count", self.retry_count as usize)?;
        positive("download_max_polls", self.download_max_polls as usize)?;
        for (name, column) in [
            ("product_id_column", self.product_id_column),
            ("product_name_column", self.product_name_column),
            ("status_column", self.status_column),
            ("primary_url_column", self.primary_url_column),
            ("fallback_url_column", self.fallback_url_column),
            ("image_column", self.image_column),
            ("start_row", self.start_row),
        ] {
            positive(name, column as usize)?;
        }
        Ok(())
    }

    /// 确认某项必填配置非空
    pub fn require<'a>(name: &str, value: &'a str) -> Result<&'a str, ConfigError> {
        if value.trim().is_empty() {
            Err(ConfigError::Missing {
                name: name.to_string(),
            })
        } else {
            Ok(value)
        }
    }
}

fn positive(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "必须大于 0".to_string(),
        });
    }
    Ok(())
}

fn env_override<T: FromStr>(var_name: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(var_name) {
        *target = value.parse().map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value: value.clone(),
            expected_type: std::any::type_name::<T>().to_string(),
        })?;
    }
    Ok(())
}

fn env_override_opt(var_name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(var_name) {
        if !value.trim().is_empty() {
            *target = Some(value);
        }
    }
}

/// 逗号分隔的列表
fn env_override_list(var_name: &str, target: &mut Vec<String>) {
    if let Ok(value) = std::env::var(var_name) {
        *target = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk_size = 100\nsheet_name = \"251122 서브딜\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.sheet_name, "251122 서브딜");
        // 未出现的字段保持默认值
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.image_column, 62);
    }

    #[test]
    fn malformed_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk_size = \"many\"").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::FileParseFailed { .. })
        ));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name, .. }) if name == "chunk_size"
        ));
    }

    #[test]
    fn require_rejects_blank_values() {
        assert!(Config::require("CJ_AUTH_KEY", "  ").is_err());
        assert_eq!(Config::require("CJ_AUTH_KEY", "abc").unwrap(), "abc");
    }

    #[test]
    fn env_parse_failure_names_the_variable() {
        std::env::set_var("DEAL_BATCH_TEST_WORKERS", "four");
        let mut workers = 4usize;
        let err = env_override("DEAL_BATCH_TEST_WORKERS", &mut workers).unwrap_err();
        std::env::remove_var("DEAL_BATCH_TEST_WORKERS");
        assert!(err.to_string().contains("DEAL_BATCH_TEST_WORKERS"));
        assert_eq!(workers, 4);
    }

    #[test]
    fn seller_list_is_comma_separated() {
        std::env::set_var("DEAL_BATCH_TEST_SELLERS", "애경생활, 롯데웰푸드,,");
        let mut sellers = Config::default().market_excluded_sellers;
        assert_eq!(sellers.len(), 5);
        env_override_list("DEAL_BATCH_TEST_SELLERS", &mut sellers);
        std::env::remove_var("DEAL_BATCH_TEST_SELLERS");
        assert_eq!(sellers, vec!["애경생활", "롯데웰푸드"]);
    }
}
