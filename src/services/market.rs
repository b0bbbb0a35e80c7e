//! b-flow 마켓상품생성
//!
//! 在「판매중」商品列表上逐行处理：排除指定입점사，其余商品勾选后点击
//! 「마켓상품생성」→「생성하기」，读取结果弹窗中的生成数量，然后翻页直到最后一页。
//! 结果追加到工作表（마스터상품번호 / 입점사 / 상품수）。

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppResult, BrowserError};
use crate::infrastructure::Locator;
use crate::pipeline::{Failure, RetryPolicy};
use crate::services::bflow::BflowSession;
use crate::sheets::{CellUpdate, SheetStore};

pub mod selectors {
    pub const STATUS_FILTER: &str = "//*[@id=\"main-page\"]/div/div/section/div/div[2]/div[2]/div/div[2]/div/div/div/div[1]/div[2]/input";
    pub const ON_SALE_OPTION: &str =
        "//span[contains(@class, 'multiselect__option') and .//span[text()='판매중']]";
    pub const LIST_SEARCH_BUTTON: &str =
        "//*[@id=\"main-page\"]/div/div/section/div/div[2]/div[6]/button[2]";
    pub const TABLE_BODY: &str = ".data-table > tbody:nth-child(2)";
    pub const CREATE_BUTTON: &str =
        "//*[@id=\"app\"]/div[1]/div/div/section/div/div[3]/div[2]/div[1]/button[2]";
    pub const MODAL: &str = ".v--modal-box";
    pub const MODAL_CREATE: &str = "//div[contains(@class, 'v--modal-box')]//button[text()='생성하기']";
    pub const RESULT_BUTTONS: &str = ".v--modal-box .btn-box";
    pub const CONFIRM_LIST: &str = ".confirm-list";
    pub const RESULT_CANCEL: &str = "//div[contains(@class, 'v--modal-box')]//button[text()='취소']";
    pub const NEXT_PAGE: &str = ".pagination-next-nav a";
    pub const NEXT_PAGE_FALLBACK: &str = "//a[@aria-label='Next']";
}

/// 数据加载完成的行至少有这么多列
pub const MIN_LISTING_COLUMNS: usize = 10;
/// 取不到마스터상품번호时写入的值
pub const UNKNOWN_MASTER_ID: &str = "수집실패";
/// 结果表的表头
pub const RESULT_HEADER: [&str; 3] = ["마스터상품번호", "입점사", "상품수"];

const SELLER_KEYWORDS: [&str; 5] = ["애경", "롯데", "아이허브", "입점사", "로아림"];
/// 마스터상품번호可能所在的列（从 0 开始，按优先顺序）
const MASTER_ID_COLUMNS: [usize; 4] = [6, 7, 5, 8];

const TABLE_WAIT: Duration = Duration::from_secs(20);
const CREATE_WAIT: Duration = Duration::from_secs(60);
const POLL: Duration = Duration::from_secs(1);
const SETTLE: Duration = Duration::from_secs(2);
const PAGE_TURN: Duration = Duration::from_secs(5);

/// 列表中的一行，单元格为文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub position: usize,
    pub cells: Vec<String>,
}

impl ListingRow {
    pub fn new(position: usize, cells: Vec<String>) -> Self {
        Self { position, cells }
    }

    /// 10 列时在第 8 列，12 列及以上在第 12 列，其他情况按关键字找
    pub fn seller(&self) -> Option<&str> {
        let cell = match self.cells.len() {
            10 => self.cells.get(7),
            n if n >= 12 => self.cells.get(11),
            _ => self
                .cells
                .iter()
                .find(|c| SELLER_KEYWORDS.iter().any(|k| c.contains(k))),
        };
        cell.map(|c| c.trim()).filter(|c| !c.is_empty())
    }

    pub fn master_product_id(&self) -> Option<&str> {
        MASTER_ID_COLUMNS
            .iter()
            .filter_map(|&i| self.cells.get(i))
            .map(|c| c.trim())
            .find(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()))
    }

    fn label(&self, page: usize) -> String {
        match self.master_product_id() {
            Some(id) => id.to_string(),
            None => format!("{}페이지 {}행", page, self.position + 1),
        }
    }
}

/// 一行的处理方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowDecision {
    Create { seller: String },
    Excluded { seller: String },
    NoSeller,
}

pub fn decide(row: &ListingRow, excluded: &[String]) -> RowDecision {
    match row.seller() {
        None => RowDecision::NoSeller,
        Some(seller) if excluded.iter().any(|e| e == seller) => RowDecision::Excluded {
            seller: seller.to_string(),
        },
        Some(seller) => RowDecision::Create {
            seller: seller.to_string(),
        },
    }
}

/// 「N개 마켓상품이 신규 생성되었습니다」中的 N
pub fn parse_created_count(text: &str) -> Option<u32> {
    let re = Regex::new(r"(\d+)개 마켓상품이 신규 생성되었습니다").ok()?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// 一个商品的生成结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketCreation {
    pub master_product_id: String,
    pub seller: String,
    pub created: u32,
}

/// 整次运行的结果
#[derive(Debug, Clone, Default)]
pub struct MarketRun {
    pub creations: Vec<MarketCreation>,
    /// (行标识, 原因)
    pub failures: Vec<(String, Failure)>,
    pub excluded: usize,
    pub unidentified: usize,
    pub pages: usize,
    pub cancelled: bool,
    /// 提前结束的原因（翻页或读取列表失败）
    pub stopped: Option<String>,
}

impl MarketRun {
    pub fn total_created(&self) -> u32 {
        self.creations.iter().map(|c| c.created).sum()
    }
}

/// 商品列表页的操作
#[async_trait]
pub trait MarketListing: Send + Sync {
    /// 当前页的所有行
    async fn rows(&self) -> AppResult<Vec<ListingRow>>;

    /// 对一行执行마켓상품생성，返回结果弹窗的文本
    async fn create(&self, row: &ListingRow) -> AppResult<String>;

    /// 翻到下一页；已是最后一页时返回 false
    async fn next_page(&self) -> AppResult<bool>;
}

async fn read_rows<L: MarketListing + ?Sized>(
    listing: &L,
    policy: &RetryPolicy,
) -> AppResult<Vec<ListingRow>> {
    let mut attempt = 1;
    loop {
        match listing.rows().await {
            Ok(rows) if !rows.is_empty() => return Ok(rows),
            Ok(_) if attempt >= policy.max_attempts() => return Ok(Vec::new()),
            Err(e) if attempt >= policy.max_attempts() => return Err(e),
            Ok(_) => warn!("⚠️ 테이블에 데이터가 없습니다. 다시 확인합니다 ({}/{})", attempt, policy.max_attempts()),
            Err(e) => warn!("⚠️ 테이블 로딩 오류 ({}/{}): {}", attempt, policy.max_attempts(), e),
        }
        attempt += 1;
        sleep(policy.delay).await;
    }
}

/// 逐页处理直到最后一页或取消；单行失败只记录，继续下一行
pub async fn create_market_products<L: MarketListing + ?Sized>(
    listing: &L,
    excluded: &[String],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> MarketRun {
    let mut run = MarketRun::default();

    'pages: loop {
        run.pages += 1;
        let page = run.pages;
        let rows = match read_rows(listing, policy).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("❌ {}페이지 목록을 읽지 못했습니다: {}", page, e);
                run.stopped = Some(e.to_string());
                break;
            }
        };
        info!("📄 {}페이지: 상품 {}개", page, rows.len());

        for row in &rows {
            if cancel.is_cancelled() {
                run.cancelled = true;
                break 'pages;
            }
            let label = row.label(page);
            match decide(row, excluded) {
                RowDecision::NoSeller => {
                    debug!("⏭️ {}: 입점사를 찾을 수 없어 건너뜁니다", label);
                    run.unidentified += 1;
                }
                RowDecision::Excluded { seller } => {
                    debug!("⏭️ {}: 제외 입점사({})", label, seller);
                    run.excluded += 1;
                }
                RowDecision::Create { seller } => match listing.create(row).await {
                    Ok(text) => {
                        let created = parse_created_count(&text).unwrap_or_else(|| {
                            warn!("⚠️ {}: 생성 수를 읽지 못했습니다 ({})", label, text.trim());
                            0
                        });
                        info!("✅ {} ({}): 마켓상품 {}개 생성", label, seller, created);
                        run.creations.push(MarketCreation {
                            master_product_id: row
                                .master_product_id()
                                .unwrap_or(UNKNOWN_MASTER_ID)
                                .to_string(),
                            seller,
                            created,
                        });
                    }
                    Err(e) => {
                        warn!("❌ {} ({}): 마켓상품생성 실패: {}", label, seller, e);
                        run.failures.push((label, Failure::from(e)));
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            run.cancelled = true;
            break;
        }
        match listing.next_page().await {
            Ok(true) => info!("➡️ 다음 페이지로 이동"),
            Ok(false) => {
                info!("🏁 마지막 페이지입니다");
                break;
            }
            Err(e) => {
                warn!("⚠️ 다음 페이지로 이동하지 못했습니다: {}", e);
                run.stopped = Some(e.to_string());
                break;
            }
        }
    }
    run
}

/// 追加到结果表末尾；表为空时先写表头，返回写入的行数
pub async fn append_creations(store: &dyn SheetStore, creations: &[MarketCreation]) -> AppResult<usize> {
    if creations.is_empty() {
        return Ok(0);
    }
    let existing = store.read_range("A:C").await?;
    let mut updates = Vec::with_capacity((creations.len() + 1) * 3);
    let mut next_row = existing.len() as u32 + 1;
    if existing.is_empty() {
        for (column, title) in RESULT_HEADER.iter().enumerate() {
            updates.push(CellUpdate::new(1, column as u32 + 1, *title));
        }
        next_row = 2;
    }
    let first_row = next_row;
    for creation in creations {
        updates.push(CellUpdate::new(next_row, 1, creation.master_product_id.as_str()));
        updates.push(CellUpdate::new(next_row, 2, creation.seller.as_str()));
        updates.push(CellUpdate::new(next_row, 3, creation.created.to_string()));
        next_row += 1;
    }
    store.batch_update(&updates).await?;
    info!("✅ 시트 업데이트: A{}:C{} ({}개 행)", first_row, next_row - 1, creations.len());
    Ok(creations.len())
}

/// 基于 b-flow 页面的列表操作
pub struct MarketPage {
    session: BflowSession,
}

impl MarketPage {
    pub fn new(session: BflowSession) -> Self {
        Self { session }
    }

    /// 筛选「판매중」后检索；筛选失败时按默认条件检索
    pub async fn search_on_sale(&self) -> AppResult<()> {
        let js = self.session.js();
        let filtered = async {
            js.click(&Locator::xpath(selectors::STATUS_FILTER)).await?;
            sleep(POLL).await;
            js.click(&Locator::xpath(selectors::ON_SALE_OPTION)).await
        }
        .await;
        match filtered {
            Ok(()) => info!("✅ 판매상태 '판매중' 선택"),
            Err(e) => warn!("⚠️ 판매상태 필터 설정 실패, 기본 조건으로 검색합니다: {}", e),
        }
        sleep(POLL).await;
        js.click(&Locator::xpath(selectors::LIST_SEARCH_BUTTON)).await?;
        js.wait_for(&Locator::css(selectors::TABLE_BODY)).await?;
        js.auto_accept_dialogs().await?;
        info!("🔍 검색 결과 로딩 완료");
        Ok(())
    }

    async fn raw_rows(&self) -> AppResult<Vec<Vec<String>>> {
        let script = format!(
            r#"(() => {{
                const body = document.querySelector({});
                if (!body) return [];
                return Array.from(body.querySelectorAll(":scope > tr")).map(tr =>
                    Array.from(tr.querySelectorAll(":scope > td")).map(td => (td.innerText || "").trim()));
            }})()"#,
            crate::infrastructure::js_string(selectors::TABLE_BODY)
        );
        self.session.js().eval_as(script).await
    }

    /// 只勾选这一行
    async fn select_only(&self, position: usize) -> AppResult<()> {
        let script = format!(
            r#"(() => {{
                const body = document.querySelector({});
                if (!body) return false;
                const rows = body.querySelectorAll(":scope > tr");
                rows.forEach((tr, i) => {{
                    const box = tr.querySelector("td:nth-child(1) input");
                    if (box && i !== {pos} && box.checked) box.click();
                }});
                const target = rows[{pos}] && rows[{pos}].querySelector("td:nth-child(1) input");
                if (!target) return false;
                if (!target.checked) target.click();
                return true;
            }})()"#,
            crate::infrastructure::js_string(selectors::TABLE_BODY),
            pos = position
        );
        if self.session.js().eval_as::<bool>(script).await? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound {
                selector: format!("{} tr:nth-child({}) input", selectors::TABLE_BODY, position + 1),
            }
            .into())
        }
    }

    async fn wait_for_result(&self) -> AppResult<()> {
        self.session
            .js()
            .wait_for_within(&Locator::css(selectors::RESULT_BUTTONS), CREATE_WAIT)
            .await
    }
}

#[async_trait]
impl MarketListing for MarketPage {
    /// 等到第一行的列数够了再读取，超时则返回当前内容
    async fn rows(&self) -> AppResult<Vec<ListingRow>> {
        let deadline = Instant::now() + TABLE_WAIT;
        let mut cells = self.raw_rows().await?;
        while cells.first().map_or(0, Vec::len) < MIN_LISTING_COLUMNS {
            if Instant::now() >= deadline {
                warn!("⚠️ 페이지 로딩 시간 초과, 현재 상태로 진행합니다");
                break;
            }
            sleep(POLL).await;
            cells = self.raw_rows().await?;
        }
        sleep(SETTLE).await;
        Ok(cells
            .into_iter()
            .enumerate()
            .map(|(i, c)| ListingRow::new(i, c))
            .collect())
    }

    async fn create(&self, row: &ListingRow) -> AppResult<String> {
        let js = self.session.js();
        self.select_only(row.position).await?;
        js.click(&Locator::xpath(selectors::CREATE_BUTTON)).await?;
        js.wait_for(&Locator::css(selectors::MODAL)).await?;
        js.click(&Locator::xpath(selectors::MODAL_CREATE)).await?;
        debug!("⏳ 마켓상품 생성 처리 대기");

        self.wait_for_result().await?;
        sleep(SETTLE).await;
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({});
                return el ? (el.innerText || "") : "";
            }})()"#,
            crate::infrastructure::js_string(selectors::CONFIRM_LIST)
        );
        let text: String = js.eval_as(script).await?;

        js.click(&Locator::xpath(selectors::RESULT_CANCEL)).await?;
        js.wait_until_gone(&Locator::css(selectors::RESULT_BUTTONS), js.element_timeout())
            .await?;
        sleep(SETTLE).await;
        Ok(text)
    }

    async fn next_page(&self) -> AppResult<bool> {
        let script = format!(
            r#"(() => {{
                const link = document.querySelector({}) || {};
                if (!link) return false;
                const cls = (link.parentElement && link.parentElement.className) || "";
                if (cls.includes("disabled") || cls.includes("active")) return false;
                link.click();
                return true;
            }})()"#,
            crate::infrastructure::js_string(selectors::NEXT_PAGE),
            Locator::xpath(selectors::NEXT_PAGE_FALLBACK).js_find()
        );
        let moved: bool = self.session.js().eval_as(script).await?;
        if moved {
            sleep(PAGE_TURN).await;
            self.session
                .js()
                .wait_for(&Locator::css(selectors::TABLE_BODY))
                .await?;
        }
        Ok(moved)
    }
}
