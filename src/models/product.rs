use serde::Serialize;

use crate::models::WorkItem;

pub const FIELD_SALE_PRICE: &str = "sale_price";
pub const FIELD_COMMISSION_RATE: &str = "commission_rate";
pub const FIELD_SUPPLY_PRICE: &str = "supply_price";
pub const FIELD_FILE_NAME: &str = "file_name";
pub const FIELD_ITEM_CODE: &str = "item_code";
pub const FIELD_SOURCE_ROW: &str = "source_row";

/// 下载的商品表中的一行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub name: String,
    pub price: String,
    pub option: String,
    /// 在下载文件中的行号（从 1 开始）
    pub source_row: u32,
}

/// CJ 价格变更的一条记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CjProduct {
    pub item_code: String,
    pub sale_price: i64,
    pub commission_rate: Option<f64>,
    pub supply_price: i64,
    #[serde(skip)]
    pub file_name: String,
    /// 在源文件中的行号（从 1 开始）
    #[serde(skip)]
    pub source_row: u32,
}

impl CjProduct {
    /// 供货价 = 售价 × (100 − 佣金率) / 100
    pub fn computed_supply_price(sale_price: i64, commission_rate: f64) -> i64 {
        (sale_price as f64 * (100.0 - commission_rate) / 100.0) as i64
    }

    /// 表里没有供货价（空或 0）时按佣金率计算，佣金率也没有则为 0
    pub fn resolve_supply_price(
        sale_price: i64,
        commission_rate: Option<f64>,
        supply_price: Option<i64>,
    ) -> i64 {
        match (supply_price, commission_rate) {
            (Some(supply), _) if supply != 0 => supply,
            (_, Some(rate)) => Self::computed_supply_price(sale_price, rate),
            _ => 0,
        }
    }

    /// 条目 id：同一商品编码可能出现在多个文件或多行里，按来源区分
    pub fn work_id(&self) -> String {
        format!("{}@{}:{}", self.item_code, self.file_name, self.source_row)
    }

    pub fn to_work_item(&self) -> WorkItem {
        let item = WorkItem::new(self.work_id())
            .with_field(FIELD_ITEM_CODE, self.item_code.clone())
            .with_field(FIELD_SOURCE_ROW, self.source_row.to_string())
            .with_field(FIELD_SALE_PRICE, self.sale_price.to_string())
            .with_field(FIELD_SUPPLY_PRICE, self.supply_price.to_string())
            .with_field(FIELD_FILE_NAME, self.file_name.clone());
        match self.commission_rate {
            Some(rate) => item.with_field(FIELD_COMMISSION_RATE, rate.to_string()),
            None => item,
        }
    }

    /// 从条目字段还原；字段缺失或不是数字时返回原因
    pub fn from_work_item(item: &WorkItem) -> Result<Self, String> {
        let sale_price = item
            .field(FIELD_SALE_PRICE)
            .ok_or_else(|| format!("{}: 缺少 {}", item.id(), FIELD_SALE_PRICE))?
            .parse::<i64>()
            .map_err(|e| format!("{}: {} 不是整数 ({})", item.id(), FIELD_SALE_PRICE, e))?;
        let commission_rate = match item.field(FIELD_COMMISSION_RATE) {
            Some(raw) => Some(
                raw.parse::<f64>()
                    .map_err(|e| format!("{}: {} 不是数字 ({})", item.id(), FIELD_COMMISSION_RATE, e))?,
            ),
            None => None,
        };
        let supply_price = item
            .field(FIELD_SUPPLY_PRICE)
            .and_then(|raw| raw.parse::<i64>().ok());

        Ok(Self {
            item_code: item.field(FIELD_ITEM_CODE).unwrap_or(item.id()).to_string(),
            sale_price,
            commission_rate,
            supply_price: Self::resolve_supply_price(sale_price, commission_rate, supply_price),
            file_name: item.field(FIELD_FILE_NAME).unwrap_or_default().to_string(),
            source_row: item
                .field(FIELD_SOURCE_ROW)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default(),
        })
    }
}

/// 去掉 Excel 数字单元格带出的 `.0` 后缀
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_suffix(".0") {
        Some(head) if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) => {
            head.to_string()
        }
        _ => trimmed.to_string(),
    }
}
