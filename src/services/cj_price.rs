/// CJ 价格变更：每个条目一次 API 调用
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::clients::{CjClient, CjResponse};
use crate::models::{CjProduct, WorkItem};
use crate::pipeline::{AttemptResult, Failure, InvokerFactory, ItemOperation, PerItem, RetryPolicy};

/// 成功变更后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub product: CjProduct,
    pub status_code: u16,
}

pub struct CjPriceOperation {
    client: Arc<CjClient>,
}

impl CjPriceOperation {
    pub fn new(client: Arc<CjClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemOperation for CjPriceOperation {
    type Output = PriceChange;

    fn name(&self) -> &str {
        "CJ 가격 변경"
    }

    async fn call(&self, item: &WorkItem) -> AttemptResult<PriceChange> {
        let product = CjProduct::from_work_item(item).map_err(Failure::permanent)?;

        match self.client.change_price(&product).await {
            Ok(CjResponse { status_code, .. }) => {
                info!("✅ {} → {}원", product.item_code, product.sale_price);
                Ok(PriceChange {
                    product,
                    status_code,
                })
            }
            Err(e) => {
                warn!("❌ {} 실패: {}", product.item_code, e);
                Err(Failure::from(e))
            }
        }
    }
}

/// 所有 worker 共享一个 HTTP 客户端（连接池），每个商品按 `policy` 单独重试
pub struct CjPriceFactory {
    client: Arc<CjClient>,
    policy: RetryPolicy,
}

impl CjPriceFactory {
    pub fn new(client: Arc<CjClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }
}

#[async_trait]
impl InvokerFactory for CjPriceFactory {
    type Invoker = PerItem<CjPriceOperation>;

    async fn create(&self, _worker: usize) -> anyhow::Result<Self::Invoker> {
        Ok(PerItem::new(
            CjPriceOperation::new(self.client.clone()),
            self.policy.clone(),
        ))
    }
}
