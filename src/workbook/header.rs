//! 表头解析
//!
//! 先在表头行里按同义词查找列（不区分大小写，包含即可），
//! 找不到时退回固定列位置并打印警告，让表格结构变化能被看到。

use indexmap::IndexMap;
use tracing::warn;

use crate::sheets::a1;

/// 一列的查找规则
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub key: &'static str,
    pub synonyms: &'static [&'static str],
    /// 找不到表头时使用的列号（从 1 开始）
    pub fallback: u32,
}

pub const PRODUCT_ID: ColumnSpec = ColumnSpec {
    key: "product_id",
    synonyms: &["상품번호", "product_id", "productid"],
    fallback: 2,
};

pub const PRODUCT_NAME: ColumnSpec = ColumnSpec {
    key: "product_name",
    synonyms: &["상품명", "product_name", "productname"],
    fallback: 3,
};

pub const PRICE: ColumnSpec = ColumnSpec {
    key: "price",
    synonyms: &["판매가", "price", "selling_price"],
    fallback: 4,
};

pub const OPTION: ColumnSpec = ColumnSpec {
    key: "option",
    synonyms: &["옵션값"],
    fallback: 50,
};

/// 下载的商品表需要的四列
pub const EXPORT_COLUMNS: [ColumnSpec; 4] = [PRODUCT_ID, PRODUCT_NAME, PRICE, OPTION];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    Header,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// 列号（从 1 开始）
    pub column: u32,
    pub source: ColumnSource,
}

impl ResolvedColumn {
    /// 行内下标（从 0 开始）
    pub fn index(&self) -> usize {
        self.column as usize - 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    columns: IndexMap<&'static str, ResolvedColumn>,
}

impl HeaderMap {
    pub fn get(&self, key: &str) -> Option<ResolvedColumn> {
        self.columns.get(key).copied()
    }

    /// 取一行中某列的值，越界或未解析时为空串
    pub fn value<'a>(&self, row: &'a [String], key: &str) -> &'a str {
        self.get(key)
            .and_then(|c| row.get(c.index()))
            .map(|v| v.trim())
            .unwrap_or("")
    }

    /// 使用了固定位置的列
    pub fn fallbacks(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|(_, c)| c.source == ColumnSource::Fallback)
            .map(|(k, _)| *k)
            .collect()
    }
}

/// 在表头行中按同义词查找列
pub fn find_column(header: &[String], synonyms: &[&str]) -> Option<u32> {
    header.iter().enumerate().find_map(|(idx, cell)| {
        let cell = cell.trim().to_lowercase();
        synonyms
            .iter()
            .any(|s| cell.contains(&s.to_lowercase()))
            .then_some(idx as u32 + 1)
    })
}

/// 解析所有列，找不到的列退回固定位置
pub fn resolve(header: &[String], specs: &[ColumnSpec]) -> HeaderMap {
    let mut columns = IndexMap::new();
    for spec in specs {
        let resolved = match find_column(header, spec.synonyms) {
            Some(column) => ResolvedColumn {
                column,
                source: ColumnSource::Header,
            },
            None => {
                let letter = a1::column_letter(spec.fallback).unwrap_or_default();
                warn!(
                    "⚠️ {} 열({})을 찾을 수 없어 {}열({})을 사용합니다",
                    spec.key,
                    spec.synonyms.join("/"),
                    letter,
                    spec.fallback
                );
                ResolvedColumn {
                    column: spec.fallback,
                    source: ColumnSource::Fallback,
                }
            }
        };
        columns.insert(spec.key, resolved);
    }
    HeaderMap { columns }
}
