use crate::config::Config;
use crate::error::AppResult;
use crate::models::work_item::{WorkItem, FIELD_NAME, FIELD_ROW, FIELD_URL};
use crate::sheets::{a1, SheetStore};

/// 从表格中读取商品编号（和商品名）
///
/// 编号为空的行跳过；id = 商品编号，字段 row / name
pub async fn load_product_items(store: &dyn SheetStore, config: &Config) -> AppResult<Vec<WorkItem>> {
    let id_col = config.product_id_column;
    let name_col = config.product_name_column;
    let first = id_col.min(name_col);
    let range = a1::open_range(config.start_row, first, id_col.max(name_col))?;

    tracing::info!("📋 시트에서 상품번호를 읽는 중: {}", range);
    let rows = store.read_range(&range).await?;

    let mut items = Vec::new();
    for (offset, row) in rows.iter().enumerate() {
        let cell = |column: u32| {
            row.get((column - first) as usize)
                .map(|v| v.trim())
                .unwrap_or("")
        };
        let product_id = cell(id_col);
        if product_id.is_empty() {
            continue;
        }
        let row_num = config.start_row + offset as u32;
        items.push(
            WorkItem::new(product_id)
                .with_field(FIELD_ROW, row_num.to_string())
                .with_field(FIELD_NAME, cell(name_col)),
        );
    }

    tracing::info!("✅ 처리할 상품 {}개를 찾았습니다.", items.len());
    Ok(items)
}

/// 读取商品页面链接：优先主列（BI），为空时用备用列（BH），都为空跳过
///
/// id = 行号，字段 row / url
pub async fn load_image_items(store: &dyn SheetStore, config: &Config) -> AppResult<Vec<WorkItem>> {
    let primary = config.primary_url_column;
    let fallback = config.fallback_url_column;
    let first = primary.min(fallback);
    let range = a1::open_range(config.start_row, first, primary.max(fallback))?;

    tracing::info!("📋 시트에서 URL을 읽는 중: {}", range);
    let rows = store.read_range(&range).await?;

    let mut items = Vec::new();
    let mut from_fallback = 0;
    for (offset, row) in rows.iter().enumerate() {
        let cell = |column: u32| {
            row.get((column - first) as usize)
                .map(|v| v.trim())
                .unwrap_or("")
        };
        let url = match (cell(primary), cell(fallback)) {
            ("", "") => continue,
            ("", url) => {
                from_fallback += 1;
                url
            }
            (url, _) => url,
        };
        let row_num = (config.start_row + offset as u32).to_string();
        items.push(
            WorkItem::new(row_num.clone())
                .with_field(FIELD_ROW, row_num)
                .with_field(FIELD_URL, url),
        );
    }

    tracing::info!(
        "✅ URL {}개를 찾았습니다. ({}개는 {}열에서)",
        items.len(),
        from_fallback,
        a1::column_letter(fallback)?
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::MemorySheet;

    fn config() -> Config {
        Config {
            start_row: 5,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn product_items_skip_rows_without_an_id() {
        let sheet = MemorySheet::new()
            .with_cell(5, 2, "1001")
            .with_cell(5, 3, "아이미마인 세럼")
            .with_cell(6, 3, "번호 없음")
            .with_cell(7, 2, " 1003 ");

        let items = load_product_items(&sheet, &config()).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id(), "1001");
        assert_eq!(items[0].row(), Some(5));
        assert_eq!(items[0].field(FIELD_NAME), Some("아이미마인 세럼"));
        assert_eq!(items[1].id(), "1003");
        assert_eq!(items[1].row(), Some(7));
        assert_eq!(items[1].field(FIELD_NAME), Some(""));
    }

    #[tokio::test]
    async fn image_items_prefer_bi_over_bh() {
        let sheet = MemorySheet::new()
            .with_cell(5, 60, "https://shop/bh-5")
            .with_cell(5, 61, "https://shop/bi-5")
            .with_cell(6, 60, "https://shop/bh-6")
            .with_cell(8, 61, "https://shop/bi-8");

        let items = load_image_items(&sheet, &config()).await.unwrap();

        let urls: Vec<(&str, &str)> = items
            .iter()
            .map(|i| (i.id(), i.field(FIELD_URL).unwrap()))
            .collect();
        assert_eq!(
            urls,
            vec![
                ("5", "https://shop/bi-5"),
                ("6", "https://shop/bh-6"),
                ("8", "https://shop/bi-8"),
            ]
        );
    }
}
