//! 重试层
//!
//! 对一个批次最多尝试 `max_attempts` 次。两次尝试之间先调用 `Invoker::recover`
//! 恢复外部会话，再等待 `delay`。单次尝试受 `Invoker::attempt_limit`（默认即 `attempt_timeout`）约束，
//! 超时按临时失败处理。
//! 永久失败默认不再消耗剩余次数（`retry_permanent = true` 时与临时失败一样重试）。
//!
//! 状态机：`Pending → Attempting(n) → {Succeeded | Attempting(n+1) | FailedExhausted}`

use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{AppError, ConfigError};
use crate::pipeline::chunker::Chunk;
use crate::pipeline::invoker::{AttemptResult, Failure, Invoker, ItemResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    pub delay: Duration,
    pub attempt_timeout: Option<Duration>,
    pub retry_permanent: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "retry_count".to_string(),
                reason: "至少需要尝试 1 次".to_string(),
            });
        }
        Ok(Self {
            max_attempts,
            delay: Duration::ZERO,
            attempt_timeout: None,
            retry_permanent: false,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.retry_count)?
            .with_delay(Duration::from_millis(config.retry_delay_ms))
            .with_attempt_timeout(Duration::from_secs(config.attempt_timeout_secs))
            .retrying_permanent(config.retry_permanent))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 0 表示不限制
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = (!limit.is_zero()).then_some(limit);
        self
    }

    pub fn retrying_permanent(mut self, retry_permanent: bool) -> Self {
        self.retry_permanent = retry_permanent;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Attempting(u32),
    Succeeded,
    FailedExhausted,
}

impl RetryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RetryState::Succeeded | RetryState::FailedExhausted)
    }
}

/// 一个批次的最终结果
#[derive(Debug, Clone)]
pub struct RetryOutcome<P> {
    pub state: RetryState,
    /// 实际调用次数
    pub attempts: u32,
    /// 第一次成功的结果，或最后一次失败的原因
    pub result: AttemptResult<P>,
    /// 经历过的状态
    pub history: Vec<RetryState>,
}

impl<P> RetryOutcome<P> {
    /// 一次都没有执行就失败（例如 worker 初始化失败）
    pub fn failed_without_attempt(failure: Failure) -> Self {
        Self {
            state: RetryState::FailedExhausted,
            attempts: 0,
            result: Err(failure),
            history: vec![RetryState::Pending, RetryState::FailedExhausted],
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RetryState::Succeeded
    }
}

/// 带重试地执行一个批次，永远不会把错误抛出重试边界
pub async fn run_with_retry<I>(
    policy: &RetryPolicy,
    invoker: &I,
    chunk: &Chunk,
) -> RetryOutcome<Vec<ItemResult<I::Output>>>
where
    I: Invoker + ?Sized,
{
    let max = policy.max_attempts.max(1);
    let mut history = vec![RetryState::Pending];
    let mut last_failure = Failure::permanent("未执行");

    for attempt in 1..=max {
        history.push(RetryState::Attempting(attempt));
        debug!(
            "[{}] 批次 {}/{} 第 {}/{} 次尝试",
            invoker.name(),
            chunk.number(),
            chunk.total,
            attempt,
            max
        );

        let result = match invoker.attempt_limit(chunk, policy.attempt_timeout) {
            Some(limit) => match timeout(limit, invoker.invoke(chunk)).await {
                Ok(result) => result,
                Err(_) => Err(Failure::from(AppError::timeout(
                    format!("{} 批次 {}", invoker.name(), chunk.number()),
                    limit,
                ))),
            },
            None => invoker.invoke(chunk).await,
        };

        let failure = match result {
            Ok(payload) => {
                history.push(RetryState::Succeeded);
                return RetryOutcome {
                    state: RetryState::Succeeded,
                    attempts: attempt,
                    result: Ok(payload),
                    history,
                };
            }
            Err(failure) => failure,
        };

        warn!(
            "[{}] ❌ 批次 {} 出错 (尝试 {}/{}): {}",
            invoker.name(),
            chunk.number(),
            attempt,
            max,
            failure
        );

        let short_circuit = failure.is_permanent() && !policy.retry_permanent;
        if attempt == max || short_circuit {
            if short_circuit && attempt < max {
                error!(
                    "[{}] ❌ 批次 {} 遇到永久错误，跳过剩余 {} 次尝试",
                    invoker.name(),
                    chunk.number(),
                    max - attempt
                );
            } else {
                error!(
                    "[{}] ❌ 超过最大重试次数({})，跳过批次 {}",
                    invoker.name(),
                    max,
                    chunk.number()
                );
            }
            history.push(RetryState::FailedExhausted);
            return RetryOutcome {
                state: RetryState::FailedExhausted,
                attempts: attempt,
                result: Err(failure),
                history,
            };
        }
        last_failure = failure;

        if let Err(e) = invoker.recover().await {
            warn!("[{}] ⚠️ 恢复会话失败: {:#}", invoker.name(), e);
        }
        if !policy.delay.is_zero() {
            sleep(policy.delay).await;
        }
    }

    history.push(RetryState::FailedExhausted);
    RetryOutcome {
        state: RetryState::FailedExhausted,
        attempts: max,
        result: Err(last_failure),
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 `fail_times` 次失败，之后成功
    struct Scripted {
        calls: AtomicU32,
        recoveries: AtomicU32,
        fail_times: u32,
        failure: Failure,
        hang: bool,
    }

    impl Scripted {
        fn new(fail_times: u32, failure: Failure) -> Self {
            Self {
                calls: AtomicU32::new(0),
                recoveries: AtomicU32::new(0),
                fail_times,
                failure,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl Invoker for Scripted {
        type Output = u32;

        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<u32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang {
                sleep(Duration::from_secs(3600)).await;
            }
            if call <= self.fail_times {
                return Err(self.failure.clone());
            }
            Ok(chunk
                .items
                .iter()
                .map(|i| (i.id().to_string(), Ok(call)))
                .collect())
        }

        async fn recover(&self) -> anyhow::Result<()> {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn chunk() -> Chunk {
        Chunk {
            index: 0,
            total: 1,
            items: vec![WorkItem::new("p1"), WorkItem::new("p2")],
        }
    }

    #[tokio::test]
    async fn succeeds_after_k_failures() {
        let policy = RetryPolicy::new(3).unwrap();
        let invoker = Scripted::new(2, Failure::transient("element not found"));

        let outcome = run_with_retry(&policy, &invoker, &chunk()).await;

        assert_eq!(outcome.state, RetryState::Succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
        assert_eq!(invoker.recoveries.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcome.history,
            vec![
                RetryState::Pending,
                RetryState::Attempting(1),
                RetryState::Attempting(2),
                RetryState::Attempting(3),
                RetryState::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn always_failing_exhausts_after_exactly_r_attempts() {
        let policy = RetryPolicy::new(3).unwrap();
        let invoker = Scripted::new(u32::MAX, Failure::transient("timeout"));

        let outcome = run_with_retry(&policy, &invoker, &chunk()).await;

        assert_eq!(outcome.state, RetryState::FailedExhausted);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
        // 最后一次失败后不再恢复
        assert_eq!(invoker.recoveries.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.result.unwrap_err().reason, "timeout");
        assert!(outcome.history.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn permanent_failure_short_circuits() {
        let policy = RetryPolicy::new(3).unwrap();
        let invoker = Scripted::new(u32::MAX, Failure::permanent("auth failed"));

        let outcome = run_with_retry(&policy, &invoker, &chunk()).await;

        assert_eq!(outcome.state, RetryState::FailedExhausted);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(invoker.recoveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn uniform_retry_when_configured() {
        let policy = RetryPolicy::new(3).unwrap().retrying_permanent(true);
        let invoker = Scripted::new(1, Failure::permanent("stale element"));

        let outcome = run_with_retry(&policy, &invoker, &chunk()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_a_transient_failure() {
        let policy = RetryPolicy::new(2)
            .unwrap()
            .with_attempt_timeout(Duration::from_secs(5));
        let mut invoker = Scripted::new(0, Failure::transient("unused"));
        invoker.hang = true;

        let outcome = run_with_retry(&policy, &invoker, &chunk()).await;

        assert_eq!(outcome.state, RetryState::FailedExhausted);
        assert_eq!(outcome.attempts, 2);
        let failure = outcome.result.unwrap_err();
        assert!(!failure.is_permanent());
        assert!(failure.reason.contains("等待超时"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(RetryPolicy::new(0).is_err());
    }

    #[test]
    fn policy_from_config() {
        let config = Config {
            retry_count: 5,
            retry_delay_ms: 10,
            attempt_timeout_secs: 0,
            ..Config::default()
        };
        let policy = RetryPolicy::from_config(&config).unwrap();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay, Duration::from_millis(10));
        assert_eq!(policy.attempt_timeout, None);
    }
}
