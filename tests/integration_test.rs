//! 需要真实浏览器 / 账号的测试，默认忽略：
//! `cargo test -- --ignored`
//!
//! 运行前先用 `--remote-debugging-port` 打开 Chrome，并在 .env 里填好账号。

use std::time::Duration;

use deal_batch::browser::{connect_to_browser_and_page, open_browser};
use deal_batch::config::Config;
use deal_batch::infrastructure::JsExecutor;
use deal_batch::models::work_item::FIELD_URL;
use deal_batch::models::WorkItem;
use deal_batch::pipeline::ItemOperation;
use deal_batch::services::{BflowSession, ImageUrlOperation};
use deal_batch::utils::logging;

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_browser_connection() {
    logging::init(true);
    let config = Config::load(None).expect("加载配置失败");

    let result =
        connect_to_browser_and_page(config.browser_debug_port, Some("about:blank"), None).await;

    assert!(result.is_ok(), "应该能够成功连接浏览器");
}

#[tokio::test]
#[ignore]
async fn test_bflow_login_and_search() {
    logging::init(true);
    let config = Config::load(None).expect("加载配置失败");

    let (_browser, page) = open_browser(&config, &config.bflow_login_url)
        .await
        .expect("打开浏览器失败");
    let js = JsExecutor::new(page, Duration::from_secs(config.element_timeout_secs));
    let session = BflowSession::new(js, config.bflow_products_url.clone());

    session
        .login(&config.bflow_login_url, &config.bflow_id, &config.bflow_pw)
        .await
        .expect("b-flow 로그인 실패");
    session.open_products().await.expect("상품 목록 열기 실패");
    session.search(&["1000000000"]).await.expect("검색 실패");
}

#[tokio::test]
#[ignore]
async fn test_extract_single_image() {
    logging::init(true);
    let config = Config::load(None).expect("加载配置失败");
    // 商品页地址通过环境变量传入
    let url = std::env::var("DEAL_BATCH_TEST_PRODUCT_URL").expect("缺少 DEAL_BATCH_TEST_PRODUCT_URL");

    let (_browser, page) = open_browser(&config, "about:blank")
        .await
        .expect("打开浏览器失败");
    let operation = ImageUrlOperation::new(JsExecutor::new(
        page,
        Duration::from_secs(config.element_timeout_secs),
    ));

    let item = WorkItem::new("2").with_field(FIELD_URL, url);
    let image = operation.call(&item).await.expect("이미지 URL 추출 실패");
    println!("🖼️ {}", image);
    assert!(image.starts_with("http"));
}
