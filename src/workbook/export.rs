//! 下载的商品表索引
//!
//! 按商品编号建立索引；编号查不到时再按商品名精确匹配。

use std::path::Path;

use indexmap::IndexMap;
use tracing::info;

use crate::error::AppResult;
use crate::models::product::{normalize_code, ProductRecord};
use crate::workbook::header::{self, HeaderMap};
use crate::workbook::reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    ById,
    ByName,
}

#[derive(Debug, Clone, Default)]
pub struct ExportIndex {
    by_id: IndexMap<String, ProductRecord>,
    header: HeaderMap,
}

impl ExportIndex {
    /// 读取下载文件（第 1 行为表头）
    pub fn load(path: &Path) -> AppResult<Self> {
        let rows = reader::read_first_sheet(path)?;
        let index = Self::from_rows(&rows);
        info!("📊 엑셀에서 {}개 상품 데이터를 로드했습니다.", index.len());
        Ok(index)
    }

    pub fn from_rows(rows: &[Vec<String>]) -> Self {
        let Some((head, data)) = rows.split_first() else {
            return Self::default();
        };
        let header = header::resolve(head, &header::EXPORT_COLUMNS);

        let mut by_id = IndexMap::new();
        for (offset, row) in data.iter().enumerate() {
            let id = normalize_code(header.value(row, header::PRODUCT_ID.key));
            if id.is_empty() {
                continue;
            }
            by_id.insert(
                id,
                ProductRecord {
                    name: header.value(row, header::PRODUCT_NAME.key).to_string(),
                    price: header.value(row, header::PRICE.key).to_string(),
                    option: header.value(row, header::OPTION.key).to_string(),
                    source_row: offset as u32 + 2,
                },
            );
        }
        Self { by_id, header }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    /// 先按编号查；查不到且给了商品名时按名称精确匹配
    pub fn lookup(&self, id: &str, name: Option<&str>) -> Option<(&ProductRecord, MatchKind)> {
        if let Some(record) = self.by_id.get(normalize_code(id).as_str()) {
            return Some((record, MatchKind::ById));
        }
        let name = name.map(str::trim).filter(|n| !n.is_empty())?;
        self.by_id
            .values()
            .find(|r| r.name.trim() == name)
            .map(|r| (r, MatchKind::ByName))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sample() -> ExportIndex {
        ExportIndex::from_rows(&rows(&[
            &["", "상품번호", "상품명", "판매가"],
            &["", "1001.0", "아이미마인 세럼", "19900"],
            &["", "", "빈 행", "0"],
            &["", "1002", "수분 크림", "25000"],
        ]))
    }

    #[test]
    fn rows_are_indexed_by_product_id() {
        let index = sample();
        assert_eq!(index.len(), 2);

        let (record, kind) = index.lookup("1001", None).unwrap();
        assert_eq!(kind, MatchKind::ById);
        assert_eq!(record.name, "아이미마인 세럼");
        assert_eq!(record.price, "19900");
        assert_eq!(record.option, "");
        assert_eq!(record.source_row, 2);
    }

    #[test]
    fn name_fallback_only_applies_when_the_id_misses() {
        let index = sample();

        let (record, kind) = index.lookup("9999", Some(" 수분 크림 ")).unwrap();
        assert_eq!(kind, MatchKind::ByName);
        assert_eq!(record.source_row, 4);

        // 编号命中时不看名称
        let (record, kind) = index.lookup("1001", Some("수분 크림")).unwrap();
        assert_eq!(kind, MatchKind::ById);
        assert_eq!(record.name, "아이미마인 세럼");

        assert!(index.lookup("9999", Some("없는 상품")).is_none());
        assert!(index.lookup("9999", Some("")).is_none());
    }

    #[test]
    fn empty_sheet_gives_empty_index() {
        assert!(ExportIndex::from_rows(&[]).is_empty());
    }
}
