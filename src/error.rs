use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// API 调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 表格读写错误
    #[error("表格错误: {0}")]
    Sheet(#[from] SheetError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 外部等待超过上限
    #[error("等待超时: {what} (上限 {limit_ms}ms)")]
    Timeout { what: String, limit_ms: u64 },
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: BoxError,
    },
    /// 启动浏览器失败
    #[error("启动浏览器失败: {reason}")]
    LaunchFailed { reason: String },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: BoxError,
    },
    /// 页面上找不到元素
    #[error("找不到元素: {selector}")]
    ElementNotFound { selector: String },
    /// 页面脚本返回了失败结果
    #[error("页面操作失败: {message}")]
    ScriptRejected { message: String },
    /// 下载目录中没有出现新文件
    #[error("未检测到下载文件 ({folder}, 已轮询 {polls} 次)")]
    DownloadNotDetected { folder: String, polls: u32 },
}

/// API 调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络请求失败
    #[error("API请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: BoxError,
    },
    /// 非 2xx 状态码
    #[error("API返回错误状态 ({endpoint}): status={status}, body={body}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// HTTP 200 但业务层面失败
    #[error("API拒绝请求 ({endpoint}): {message}")]
    Rejected { endpoint: String, message: String },
    /// 认证失败
    #[error("API认证失败: {endpoint}")]
    Unauthorized { endpoint: String },
    /// JSON 解析失败
    #[error("JSON解析失败: {source}")]
    JsonParseFailed {
        #[source]
        source: BoxError,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 目录不存在
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: BoxError,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: BoxError,
    },
    /// 打开表格文件失败
    #[error("无法打开表格文件 ({path}): {source}")]
    SpreadsheetOpenFailed {
        path: String,
        #[source]
        source: BoxError,
    },
    /// 表格中没有工作表或数据
    #[error("表格文件为空: {path}")]
    EmptyWorkbook { path: String },
}

/// 表格读写错误
#[derive(Debug, Error)]
pub enum SheetError {
    /// 单元格坐标非法（行列从 1 开始）
    #[error("非法的单元格坐标: row={row}, column={column}")]
    InvalidCell { row: u32, column: u32 },
    /// 指定范围没有数据
    #[error("范围内没有数据: {range}")]
    NoData { range: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 必填项缺失
    #[error("缺少必填配置: {name}")]
    Missing { name: String },
    /// 配置值不合法
    #[error("配置 {name} 不合法: {reason}")]
    InvalidValue { name: String, reason: String },
    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {source}")]
    FileParseFailed {
        path: String,
        #[source]
        source: BoxError,
    },
}

impl AppError {
    /// 是否属于可重试的临时错误
    ///
    /// 超时、浏览器/CDP 错误、网络错误、5xx 与限流视为临时错误；
    /// 配置、认证、解析和业务拒绝视为永久错误。
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Browser(_) | AppError::Timeout { .. } => true,
            AppError::Api(ApiError::RequestFailed { .. }) => true,
            AppError::Api(ApiError::BadStatus { status, .. }) => *status >= 500 || *status == 429,
            AppError::Api(_)
            | AppError::File(_)
            | AppError::Sheet(_)
            | AppError::Config(_)
            | AppError::Other(_) => false,
        }
    }

    /// 创建浏览器连接错误
    pub fn browser_connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Browser(BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        })
    }

    /// 创建API请求失败错误
    pub fn api_request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Api(ApiError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建超时错误
    pub fn timeout(what: impl Into<String>, limit: std::time::Duration) -> Self {
        AppError::Timeout {
            what: what.into(),
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err.url().map(|u| u.to_string()).unwrap_or_default();
        if let Some(status) = err.status() {
            return AppError::Api(ApiError::BadStatus {
                endpoint,
                status: status.as_u16(),
                body: err.to_string(),
            });
        }
        AppError::api_request_failed(endpoint, err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::FileParseFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<calamine::XlsxError> for AppError {
    fn from(err: calamine::XlsxError) -> Self {
        AppError::File(FileError::SpreadsheetOpenFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::file_write_failed(String::new(), err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::file_read_failed(String::new(), err)
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timeouts_and_browser_errors_are_transient() {
        assert!(AppError::timeout("下载", Duration::from_secs(60)).is_transient());
        assert!(AppError::Browser(BrowserError::ElementNotFound {
            selector: "button.br-btn-purple".into()
        })
        .is_transient());
    }

    #[test]
    fn server_errors_are_transient_but_client_errors_are_not() {
        let server = AppError::Api(ApiError::BadStatus {
            endpoint: "/price".into(),
            status: 503,
            body: String::new(),
        });
        let client = AppError::Api(ApiError::BadStatus {
            endpoint: "/price".into(),
            status: 400,
            body: String::new(),
        });
        assert!(server.is_transient());
        assert!(!client.is_transient());
    }

    #[test]
    fn business_rejections_are_permanent() {
        let err = AppError::Api(ApiError::Rejected {
            endpoint: "/price".into(),
            message: "상품코드 오류".into(),
        });
        assert!(!err.is_transient());
        assert!(!AppError::Config(ConfigError::Missing {
            name: "CJ_AUTH_KEY".into()
        })
        .is_transient());
    }

    #[test]
    fn timeout_message_includes_limit() {
        let err = AppError::timeout("等待表格", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "等待超时: 等待表格 (上限 1500ms)");
    }
}
