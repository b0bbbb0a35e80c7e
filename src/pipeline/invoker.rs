//! 外部操作调用层
//!
//! `Invoker` 对一个批次执行一次外部副作用（浏览器操作、HTTP 请求），
//! 并把结果映射为逐条目的 `AttemptResult`。失败在这里被分成临时/永久两类，
//! 重试层据此决定是否继续尝试。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::AppError;
use crate::models::WorkItem;
use crate::pipeline::chunker::Chunk;
use crate::pipeline::retry::RetryPolicy;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// 超时、找不到元素、网络抖动：可以重试
    Transient,
    /// 输入错误、认证失败、业务拒绝：重试无意义
    Permanent,
}

/// 一次尝试的失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl From<&AppError> for Failure {
    fn from(err: &AppError) -> Self {
        if err.is_transient() {
            Failure::transient(err.to_string())
        } else {
            Failure::permanent(err.to_string())
        }
    }
}

impl From<AppError> for Failure {
    fn from(err: AppError) -> Self {
        Failure::from(&err)
    }
}

impl From<anyhow::Error> for Failure {
    /// 错误链中有 `AppError` 时按其分类，否则视为临时错误
    fn from(err: anyhow::Error) -> Self {
        let reason = format!("{err:#}");
        match err.chain().find_map(|e| e.downcast_ref::<AppError>()) {
            Some(app) if !app.is_transient() => Failure::permanent(reason),
            _ => Failure::transient(reason),
        }
    }
}

/// 一次尝试的结果
pub type AttemptResult<P> = Result<P, Failure>;

/// 单个条目的结果：（条目 id, 结果）
pub type ItemResult<O> = (String, AttemptResult<O>);

/// 对一个批次执行外部操作
#[async_trait]
pub trait Invoker: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    /// 用于日志
    fn name(&self) -> &str;

    /// `Err` 表示整个批次这次尝试失败；`Ok` 中的逐条目失败是终态，不再重试
    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<Self::Output>>>;

    /// 两次尝试之间把外部会话恢复到已知状态（例如刷新页面）
    async fn recover(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// 一次尝试的时限，默认就是 `attempt_timeout`
    fn attempt_limit(&self, _chunk: &Chunk, per_attempt: Option<Duration>) -> Option<Duration> {
        per_attempt
    }
}

/// 并行模式下为每个 worker 创建独立的 `Invoker`（各自持有页面/连接）
#[async_trait]
pub trait InvokerFactory: Send + Sync {
    type Invoker: Invoker + 'static;

    async fn create(&self, worker: usize) -> anyhow::Result<Self::Invoker>;
}

/// 逐条目执行的外部操作
#[async_trait]
pub trait ItemOperation: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    fn name(&self) -> &str;

    async fn call(&self, item: &WorkItem) -> AttemptResult<Self::Output>;

    async fn recover(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 把逐条目操作包装成批次级 `Invoker`
///
/// 每个条目按 `policy` 单独重试，单次调用受 `attempt_timeout` 约束。
/// 一个条目用尽重试只记为该条目失败，其余条目照常处理，因此 `invoke` 总是返回 `Ok`。
pub struct PerItem<Op: ItemOperation> {
    operation: Op,
    policy: RetryPolicy,
}

impl<Op: ItemOperation> PerItem<Op> {
    pub fn new(operation: Op, policy: RetryPolicy) -> Self {
        Self { operation, policy }
    }

    pub fn operation(&self) -> &Op {
        &self.operation
    }

    async fn call_once(&self, item: &WorkItem) -> AttemptResult<Op::Output> {
        match self.policy.attempt_timeout {
            Some(limit) => match timeout(limit, self.operation.call(item)).await {
                Ok(result) => result,
                Err(_) => Err(Failure::from(AppError::timeout(
                    format!("{} {}", self.operation.name(), item.id()),
                    limit,
                ))),
            },
            None => self.operation.call(item).await,
        }
    }

    async fn call_with_retry(&self, item: &WorkItem) -> AttemptResult<Op::Output> {
        let max = self.policy.max_attempts();
        let mut attempt = 1;
        loop {
            let failure = match self.call_once(item).await {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };

            let short_circuit = failure.is_permanent() && !self.policy.retry_permanent;
            if attempt >= max || short_circuit {
                return Err(failure);
            }
            warn!(
                "[{}] ⚠️ {} 失败 (尝试 {}/{}): {}",
                self.operation.name(),
                item.id(),
                attempt,
                max,
                failure
            );

            if let Err(e) = self.operation.recover().await {
                warn!("[{}] ⚠️ 恢复会话失败: {:#}", self.operation.name(), e);
            }
            if !self.policy.delay.is_zero() {
                sleep(self.policy.delay).await;
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl<Op: ItemOperation> Invoker for PerItem<Op> {
    type Output = Op::Output;

    fn name(&self) -> &str {
        self.operation.name()
    }

    /// 每次调用单独限时，批次整体不再限时
    fn attempt_limit(&self, _chunk: &Chunk, _per_attempt: Option<Duration>) -> Option<Duration> {
        None
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<Self::Output>>> {
        let mut results = Vec::with_capacity(chunk.len());
        for item in &chunk.items {
            let result = self.call_with_retry(item).await;
            results.push((item.id().to_string(), result));
        }
        Ok(results)
    }

    async fn recover(&self) -> anyhow::Result<()> {
        self.operation.recover().await
    }
}
