/// b-flow 后台：登录、按商品号检索、导出「네이버 스마트스토어 형식」表格
///
/// 一个块对应一次检索和一次导出。下载完成后读取导出文件，按商品号（或商品名）
/// 找到每个条目的商品名、价格和选项。
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{rename_download, DownloadWatcher, OutputListing};
use crate::error::{AppError, AppResult, FileError};
use crate::infrastructure::{JsExecutor, Locator};
use crate::models::product::ProductRecord;
use crate::models::work_item::FIELD_NAME;
use crate::pipeline::{AttemptResult, Chunk, Failure, Invoker, ItemResult};
use crate::workbook::{ExportIndex, MatchKind};

/// 页面元素
pub mod selectors {
    pub const LOGIN_OPEN: &str = "/html/body/div[1]/div[3]/div[1]/div[2]/button[2]";
    pub const LOGIN_ID: &str = "/html/body/div[1]/div[14]/div/div[2]/div/div[2]/div/input[1]";
    pub const LOGIN_PW: &str = "/html/body/div[1]/div[14]/div/div[2]/div/div[2]/div/input[2]";
    pub const LOGIN_SUBMIT: &str = "/html/body/div[1]/div[14]/div/div[2]/div/div[3]/button[1]";
    pub const MAIN_PAGE: &str = "#main-page";

    pub const SEARCH_PANEL: &str = "div.box.collapsed-box";
    pub const SEARCH_FILTER: &str = "div.multiselect.br-select";
    pub const FILTER_PRODUCT_ID: &str =
        "//ul[contains(@class, 'multiselect__content')]//span[contains(text(), '상품번호')]";
    pub const SEARCH_INPUT: &str = "div.br-text-wrapper > input";
    pub const SEARCH_BUTTON: &str = "button.br-btn-purple";

    pub const EXCEL_DROPDOWN: &str = "//button[contains(., '엑셀 다운로드')]";
    pub const RESULT_ROWS: &str = "table tbody tr";
    pub const SELECT_ALL: &str = "#main-page > div > div > section > div > div:nth-child(4) > div.box-body > div > table > thead > tr:nth-child(2) > th:nth-child(1) > div";
    pub const SELECT_ALL_FALLBACK: &str = "//table//thead//tr[2]//th[1]//div[@p-checkbox]";
    pub const SMARTSTORE_FORMAT: &str =
        "//ul[contains(@class, 'dropdown-menu')]//a[normalize-space()='네이버 스마트스토어 형식']";

    pub const EXPORT_READY: &str = "div.v--modal-box span.br-label-green";
    pub const EXPORT_FILE_BUTTON: &str =
        "div.v--modal-box tbody > tr:nth-child(1) > td:nth-child(7) > button";
    pub const MODAL_CLOSE: &str = "div.v--modal-box span.close-btn";
}

/// 导出文件生成较慢，等待上限单独放宽
const EXPORT_WAIT: Duration = Duration::from_secs(60);
const SETTLE: Duration = Duration::from_secs(2);

/// 已登录的 b-flow 页面
pub struct BflowSession {
    js: JsExecutor,
    products_url: String,
}

impl BflowSession {
    pub fn new(js: JsExecutor, products_url: impl Into<String>) -> Self {
        Self {
            js,
            products_url: products_url.into(),
        }
    }

    pub fn js(&self) -> &JsExecutor {
        &self.js
    }

    /// 在登录页完成登录，等待主页面出现
    pub async fn login(&self, login_url: &str, id: &str, password: &str) -> AppResult<()> {
        info!("🔐 b-flow 로그인 시작...");
        self.js.goto(login_url).await?;
        self.js.click(&Locator::xpath(selectors::LOGIN_OPEN)).await?;
        self.js
            .type_text(&Locator::xpath(selectors::LOGIN_ID), id)
            .await?;
        self.js
            .type_text(&Locator::xpath(selectors::LOGIN_PW), password)
            .await?;
        self.js
            .click(&Locator::xpath(selectors::LOGIN_SUBMIT))
            .await?;
        self.js.wait_for(&Locator::css(selectors::MAIN_PAGE)).await?;
        info!("✅ 로그인 성공");
        Ok(())
    }

    /// 打开商品查询页
    pub async fn open_products(&self) -> AppResult<()> {
        self.js.goto(&self.products_url).await?;
        self.js
            .wait_for(&Locator::css(selectors::SEARCH_PANEL))
            .await?;
        self.js.auto_accept_dialogs().await?;
        info!("✅ 상품 조회 페이지 로딩 완료");
        Ok(())
    }

    /// 刷新并等待查询面板，出错后恢复用
    pub async fn reset(&self) -> AppResult<()> {
        self.js.reload().await?;
        self.js
            .wait_for(&Locator::css(selectors::SEARCH_PANEL))
            .await?;
        self.js.auto_accept_dialogs().await?;
        debug!("🔄 페이지 새로고침 완료");
        Ok(())
    }

    /// 按商品号检索
    pub async fn search(&self, ids: &[&str]) -> AppResult<()> {
        self.js
            .click(&Locator::css(selectors::SEARCH_FILTER))
            .await?;
        self.js
            .click(&Locator::xpath(selectors::FILTER_PRODUCT_ID))
            .await?;
        self.js
            .type_text(&Locator::css(selectors::SEARCH_INPUT), &ids.join(" \n"))
            .await?;
        self.js
            .click(&Locator::css(selectors::SEARCH_BUTTON))
            .await?;
        info!("🔍 검색 실행 ({}개)", ids.len());

        self.js
            .wait_for_within(&Locator::xpath(selectors::EXCEL_DROPDOWN), EXPORT_WAIT)
            .await?;
        self.js
            .wait_for(&Locator::css(selectors::RESULT_ROWS))
            .await?;
        Ok(())
    }

    /// 全选结果并触发导出，点击导出文件的下载按钮
    pub async fn export_smartstore(&self) -> AppResult<()> {
        sleep(SETTLE).await;
        if self
            .js
            .click(&Locator::css(selectors::SELECT_ALL))
            .await
            .is_err()
        {
            self.js
                .click(&Locator::xpath(selectors::SELECT_ALL_FALLBACK))
                .await?;
        }
        debug!("✅ 전체선택 완료");

        // 刷新后 confirm 覆盖会失效
        self.js.auto_accept_dialogs().await?;
        self.js
            .click(&Locator::xpath(selectors::EXCEL_DROPDOWN))
            .await?;
        self.js
            .click(&Locator::xpath(selectors::SMARTSTORE_FORMAT))
            .await?;
        info!("📂 '네이버 스마트스토어 형식' 다운로드 선택");

        self.js
            .wait_for_within(&Locator::css(selectors::EXPORT_READY), EXPORT_WAIT)
            .await?;
        self.js
            .click(&Locator::css(selectors::EXPORT_FILE_BUTTON))
            .await?;
        info!("🚀 파일 다운로드 시작");
        Ok(())
    }

    pub async fn close_export_modal(&self) -> AppResult<()> {
        self.js.click(&Locator::css(selectors::MODAL_CLOSE)).await?;
        self.js
            .wait_until_gone(&Locator::css(selectors::MODAL_CLOSE), self.js.element_timeout())
            .await
    }
}

/// 一个块 = 一次检索导出；输出为每个商品在导出文件中的记录
pub struct BflowExportInvoker<L: OutputListing> {
    session: BflowSession,
    watcher: DownloadWatcher<L>,
    /// 下载文件改名后的文件名（不含扩展名）
    file_stem: String,
}

impl<L: OutputListing> BflowExportInvoker<L> {
    pub fn new(session: BflowSession, watcher: DownloadWatcher<L>, file_stem: impl Into<String>) -> Self {
        Self {
            session,
            watcher,
            file_stem: file_stem.into(),
        }
    }

    /// 检索、导出并等待下载完成，返回改名后的文件
    async fn download(&self, chunk: &Chunk) -> AttemptResult<PathBuf> {
        let ids = chunk.ids();
        self.session.search(&ids).await?;

        let baseline = self.watcher.snapshot().await?;
        self.session.export_smartstore().await?;
        let downloaded = self.watcher.wait_for_new(&baseline).await?;
        let path = rename_download(&downloaded, &self.file_stem)
            .await
            .map_err(|e| Failure::transient(e.to_string()))?;

        if let Err(e) = self.session.close_export_modal().await {
            warn!("⚠️ 다운로드 모달 닫기 실패: {}", e);
        }
        Ok(path)
    }
}

/// 读取刚下载的导出文件
///
/// 文件可能还没写完或内容为空，读取失败一律按临时错误处理，下一次尝试重新导出。
pub async fn read_fresh_export(path: PathBuf) -> AttemptResult<ExportIndex> {
    let shown = path.display().to_string();
    let index = match tokio::task::spawn_blocking(move || ExportIndex::load(&path)).await {
        Ok(Ok(index)) => index,
        Ok(Err(e)) => return Err(Failure::transient(e.to_string())),
        Err(e) => {
            return Err(Failure::transient(format!(
                "다운로드 파일 읽기 작업 실패: {}",
                e
            )))
        }
    };
    if index.is_empty() {
        let empty = AppError::from(FileError::EmptyWorkbook { path: shown });
        return Err(Failure::transient(empty.to_string()));
    }
    Ok(index)
}

/// 导出文件中逐个查找块内条目，找不到的条目为永久失败
pub fn match_chunk(index: &ExportIndex, chunk: &Chunk) -> Vec<ItemResult<ProductRecord>> {
    chunk
        .items
        .iter()
        .map(|item| {
            let result = match index.lookup(item.id(), item.field(FIELD_NAME)) {
                Some((record, MatchKind::ById)) => Ok(record.clone()),
                Some((record, MatchKind::ByName)) => {
                    debug!("상품명으로 매칭: {}", item.id());
                    Ok(record.clone())
                }
                None => Err(Failure::permanent(format!(
                    "다운로드 파일에 상품 없음: {}",
                    item.id()
                ))),
            };
            (item.id().to_string(), result)
        })
        .collect()
}

#[async_trait]
impl<L: OutputListing> Invoker for BflowExportInvoker<L> {
    type Output = ProductRecord;

    fn name(&self) -> &str {
        "b-flow 다운로드"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<ProductRecord>>> {
        let path = self.download(chunk).await?;
        let index = read_fresh_export(path).await?;
        let results = match_chunk(&index, chunk);
        let matched = results.iter().filter(|(_, r)| r.is_ok()).count();
        info!(
            "📊 엑셀에서 {}/{}개 상품 매칭 (파일 {}행)",
            matched,
            chunk.len(),
            index.len()
        );
        Ok(results)
    }

    async fn recover(&self) -> anyhow::Result<()> {
        self.session.reset().await?;
        Ok(())
    }
}

/// 用已经下载好的导出文件匹配，不打开浏览器
pub struct ExistingExportInvoker {
    index: ExportIndex,
}

impl ExistingExportInvoker {
    pub fn new(index: ExportIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Invoker for ExistingExportInvoker {
    type Output = ProductRecord;

    fn name(&self) -> &str {
        "기존 파일 매칭"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<ProductRecord>>> {
        Ok(match_chunk(&self.index, chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn chunk_items_match_by_id_then_name() {
        let index = ExportIndex::from_rows(&rows(&[
            &["상품번호", "상품명", "판매가"],
            &["1001", "수분 크림", "19900"],
            &["1002", "선크림", "12000"],
        ]));
        let chunk = Chunk {
            index: 0,
            total: 1,
            items: vec![
                WorkItem::new("1001"),
                WorkItem::new("9999").with_field(FIELD_NAME, "선크림"),
                WorkItem::new("4242").with_field(FIELD_NAME, "없는 상품"),
            ],
        };

        let results = match_chunk(&index, &chunk);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1.as_ref().unwrap().name, "수분 크림");
        assert_eq!(results[1].1.as_ref().unwrap().price, "12000");
        let failure = results[2].1.as_ref().unwrap_err();
        assert!(failure.is_permanent());
        assert!(failure.reason.contains("4242"));
    }

    #[tokio::test]
    async fn unreadable_export_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("딜상품.xlsx");
        std::fs::write(&broken, b"still downloading").unwrap();

        let failure = read_fresh_export(broken).await.unwrap_err();
        assert!(!failure.is_permanent());

        let missing = read_fresh_export(dir.path().join("gone.xlsx")).await.unwrap_err();
        assert!(!missing.is_permanent());
    }
}
