//! 待处理条目
//!
//! 一条 `WorkItem` = 一个不透明的标识 + 若干命名字段（来源行号、商品名、链接等）。
//! 创建后不可修改。

use indexmap::IndexMap;
use serde::Serialize;

/// 来源表格中的行号（从 1 开始）
pub const FIELD_ROW: &str = "row";
/// 商品名
pub const FIELD_NAME: &str = "name";
/// 商品页面链接
pub const FIELD_URL: &str = "url";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    id: String,
    fields: IndexMap<String, String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: IndexMap::new(),
        }
    }

    /// 追加一个字段（构造阶段使用）
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    /// 来源行号
    pub fn row(&self) -> Option<u32> {
        self.field(FIELD_ROW).and_then(|v| v.parse().ok())
    }
}
