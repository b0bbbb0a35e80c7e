/// 结果写回 Google 表格
///
/// 每个切片只发一次 batch_update。条目 id 与表格行号的对应关系在加载时确定，
/// 同一商品编号出现在多行时每行都写。
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::product::ProductRecord;
use crate::models::work_item::{WorkItem, FIELD_ROW};
use crate::pipeline::{ItemRecord, Sink, Slice};
use crate::sheets::{CellUpdate, SheetStore};

pub const STATUS_DONE: &str = "다운로드 완료";

/// 商品数据写入列（A=1）：F / H / I
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductColumns {
    pub status: u32,
    pub name: u32,
    pub price: u32,
    pub option: u32,
}

impl ProductColumns {
    pub fn with_status(status: u32) -> Self {
        Self {
            status,
            name: 6,
            price: 8,
            option: 9,
        }
    }
}

/// id → 行号；没有 row 字段的条目忽略
pub fn row_index(items: &[WorkItem]) -> HashMap<String, Vec<u32>> {
    let mut rows: HashMap<String, Vec<u32>> = HashMap::new();
    for item in items {
        if let Some(row) = item.field(FIELD_ROW).and_then(|r| r.parse::<u32>().ok()) {
            rows.entry(item.id().to_string()).or_default().push(row);
        }
    }
    rows
}

pub fn failure_status(reason: &str) -> String {
    format!("실패: {}", reason)
}

/// 商品下载结果：状态列 + 商品名/价格/选项
pub struct StatusSheetSink {
    store: Arc<dyn SheetStore>,
    rows: HashMap<String, Vec<u32>>,
    columns: ProductColumns,
}

impl StatusSheetSink {
    pub fn new(store: Arc<dyn SheetStore>, rows: HashMap<String, Vec<u32>>, columns: ProductColumns) -> Self {
        Self {
            store,
            rows,
            columns,
        }
    }

    fn updates(&self, slice: &Slice<ProductRecord>) -> Vec<CellUpdate> {
        let mut updates = Vec::new();
        for (id, record) in slice {
            let Some(rows) = self.rows.get(id) else {
                debug!("행 번호를 알 수 없어 건너뜁니다: {}", id);
                continue;
            };
            for &row in rows {
                match &record.result {
                    Ok(product) => {
                        updates.push(CellUpdate::new(row, self.columns.status, STATUS_DONE));
                        updates.push(CellUpdate::new(row, self.columns.name, &product.name));
                        updates.push(CellUpdate::new(row, self.columns.price, &product.price));
                        updates.push(CellUpdate::new(row, self.columns.option, &product.option));
                    }
                    Err(failure) => {
                        updates.push(CellUpdate::new(
                            row,
                            self.columns.status,
                            failure_status(&failure.reason),
                        ));
                    }
                }
            }
        }
        updates
    }
}

#[async_trait]
impl Sink<ProductRecord> for StatusSheetSink {
    fn name(&self) -> &str {
        "시트 상태 업데이트"
    }

    async fn write(&self, slice: &Slice<ProductRecord>) -> anyhow::Result<usize> {
        let updates = self.updates(slice);
        let written = self.store.batch_update(&updates).await?;
        info!("📝 시트 업데이트: {}개 셀", written);
        Ok(written)
    }
}

/// 图片地址写入一列（BJ），失败的条目不写
pub struct ImageColumnSink {
    store: Arc<dyn SheetStore>,
    column: u32,
}

impl ImageColumnSink {
    pub fn new(store: Arc<dyn SheetStore>, column: u32) -> Self {
        Self { store, column }
    }
}

fn image_update(column: u32, id: &str, record: &ItemRecord<String>) -> Option<CellUpdate> {
    let row = id.parse::<u32>().ok()?;
    let url = record.result.as_ref().ok()?;
    Some(CellUpdate::new(row, column, url))
}

#[async_trait]
impl Sink<String> for ImageColumnSink {
    fn name(&self) -> &str {
        "이미지 URL 업데이트"
    }

    async fn write(&self, slice: &Slice<String>) -> anyhow::Result<usize> {
        let updates: Vec<CellUpdate> = slice
            .iter()
            .filter_map(|(id, record)| image_update(self.column, id, record))
            .collect();
        let written = self.store.batch_update(&updates).await?;
        info!("🖼️ 이미지 URL {}개 기록", written);
        Ok(written)
    }
}
