//! 批次运行器
//!
//! 条目 → 分块 → 每块：重试(调用) → 汇总 → 写出。
//!
//! - 顺序模式：一个 `Invoker` 依次处理所有批次
//! - 并行模式：固定数量的 worker，各自通过 `InvokerFactory` 创建自己的 `Invoker`，
//!   第 w 个 worker 处理第 w, w+workers, … 个批次；结果按完成顺序汇入同一个汇总器
//!
//! 每个批次开始前检查取消令牌，已经开始的尝试不会被打断。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ConfigError;
use crate::models::WorkItem;
use crate::pipeline::aggregator::{AggregateReport, Aggregator, ItemRecord};
use crate::pipeline::chunker::{chunk_items, Chunk};
use crate::pipeline::invoker::{Failure, Invoker, InvokerFactory, ItemResult};
use crate::pipeline::retry::{run_with_retry, RetryOutcome, RetryPolicy};
use crate::pipeline::sink::Sink;
use crate::utils::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { workers: usize },
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunReport<O> {
    pub report: AggregateReport<O>,
    pub chunks_total: usize,
    pub chunks_run: usize,
    pub chunks_skipped: usize,
    /// 因取消而没有处理的条目（不计入失败）
    pub skipped_ids: Vec<String>,
    pub cancelled: bool,
    pub sink_failures: usize,
}

impl<O> RunReport<O> {
    /// 所有批次都执行了且没有失败
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.report.summary.failed == 0 && self.sink_failures == 0
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    /// 日志里显示的任务名
    pub label: String,
    pub policy: RetryPolicy,
    pub chunk_size: usize,
    pub mode: ExecutionMode,
    /// 同一个 worker 的两个批次之间的停顿
    pub chunk_pause: Duration,
}

impl Pipeline {
    pub fn sequential(label: impl Into<String>, policy: RetryPolicy, chunk_size: usize) -> Self {
        Self {
            label: label.into(),
            policy,
            chunk_size,
            mode: ExecutionMode::Sequential,
            chunk_pause: Duration::ZERO,
        }
    }

    pub fn parallel(
        label: impl Into<String>,
        policy: RetryPolicy,
        chunk_size: usize,
        workers: usize,
    ) -> Self {
        Self {
            mode: ExecutionMode::Parallel { workers },
            ..Self::sequential(label, policy, chunk_size)
        }
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    fn workers(&self) -> Result<usize, ConfigError> {
        match self.mode {
            ExecutionMode::Sequential => Ok(1),
            ExecutionMode::Parallel { workers: 0 } => Err(ConfigError::InvalidValue {
                name: "max_workers".to_string(),
                reason: "必须大于 0".to_string(),
            }),
            ExecutionMode::Parallel { workers } => Ok(workers),
        }
    }

    /// 顺序模式：同一个 `Invoker` 处理所有批次
    pub async fn run_sequential<I, S>(
        &self,
        items: Vec<WorkItem>,
        invoker: &I,
        sink: &S,
        cancel: &CancellationToken,
    ) -> Result<RunReport<I::Output>, ConfigError>
    where
        I: Invoker + ?Sized,
        S: Sink<I::Output> + ?Sized,
    {
        let total_items = items.len();
        let chunks = chunk_items(items, self.chunk_size)?;
        logging::log_run_start(&self.label, total_items, chunks.len(), self.chunk_size, 1);

        let mut state = RunState::new(chunks.len());
        let last = chunks.len().saturating_sub(1);
        for chunk in &chunks {
            if cancel.is_cancelled() {
                state.skip(chunk);
                continue;
            }

            logging::log_batch_start(&self.label, chunk.number(), chunk.total, chunk.len());
            let outcome = run_with_retry(&self.policy, invoker, chunk).await;
            state.complete(&self.label, chunk, &outcome, sink).await;

            if chunk.index < last {
                pause(self.chunk_pause, cancel).await;
            }
        }

        Ok(state.finish(&self.label, sink, cancel).await)
    }

    /// 并行模式：每个 worker 用工厂创建自己的 `Invoker`
    pub async fn run_parallel<F, S>(
        &self,
        items: Vec<WorkItem>,
        factory: Arc<F>,
        sink: &S,
        cancel: &CancellationToken,
    ) -> Result<RunReport<<F::Invoker as Invoker>::Output>, ConfigError>
    where
        F: InvokerFactory + 'static,
        S: Sink<<F::Invoker as Invoker>::Output> + ?Sized,
    {
        let workers = self.workers()?;
        let total_items = items.len();
        let chunks = Arc::new(chunk_items(items, self.chunk_size)?);
        let workers = workers.min(chunks.len()).max(1);
        logging::log_run_start(
            &self.label,
            total_items,
            chunks.len(),
            self.chunk_size,
            workers,
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            let assigned: Vec<usize> = (worker..chunks.len()).step_by(workers).collect();
            if assigned.is_empty() {
                continue;
            }
            join_set.spawn(run_worker(
                worker,
                assigned,
                Arc::clone(&chunks),
                Arc::clone(&factory),
                self.policy.clone(),
                self.chunk_pause,
                cancel.clone(),
                tx.clone(),
            ));
        }
        drop(tx);

        let mut state = RunState::new(chunks.len());
        let mut reported = HashSet::new();
        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Started { worker, index } => {
                    let chunk = &chunks[index];
                    logging::log_batch_start(
                        &format!("{} worker-{}", self.label, worker + 1),
                        chunk.number(),
                        chunk.total,
                        chunk.len(),
                    );
                }
                WorkerEvent::Finished { index, outcome } => {
                    reported.insert(index);
                    state
                        .complete(&self.label, &chunks[index], &outcome, sink)
                        .await;
                }
                WorkerEvent::Skipped { index } => {
                    reported.insert(index);
                    state.skip(&chunks[index]);
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!("[{}] ❌ worker 异常退出: {}", self.label, e);
            }
        }

        // worker 崩溃时没有上报的批次按失败处理
        for chunk in chunks.iter().filter(|c| !reported.contains(&c.index)) {
            let outcome = RetryOutcome::failed_without_attempt(Failure::transient("worker 异常退出"));
            state.complete(&self.label, chunk, &outcome, sink).await;
        }

        Ok(state.finish(&self.label, sink, cancel).await)
    }
}

enum WorkerEvent<O> {
    Started {
        worker: usize,
        index: usize,
    },
    Finished {
        index: usize,
        outcome: RetryOutcome<Vec<ItemResult<O>>>,
    },
    Skipped {
        index: usize,
    },
}

#[allow(clippy::too_many_arguments)]
async fn run_worker<F>(
    worker: usize,
    assigned: Vec<usize>,
    chunks: Arc<Vec<Chunk>>,
    factory: Arc<F>,
    policy: RetryPolicy,
    chunk_pause: Duration,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<WorkerEvent<<F::Invoker as Invoker>::Output>>,
) where
    F: InvokerFactory + 'static,
{
    let invoker = match factory.create(worker).await {
        Ok(invoker) => invoker,
        Err(e) => {
            error!("[worker-{}] ❌ 初始化失败: {:#}", worker + 1, e);
            let failure = Failure::from(e);
            for index in assigned {
                let outcome = RetryOutcome::failed_without_attempt(failure.clone());
                let _ = tx.send(WorkerEvent::Finished { index, outcome });
            }
            return;
        }
    };

    let last = assigned.last().copied();
    for index in assigned {
        if cancel.is_cancelled() {
            let _ = tx.send(WorkerEvent::Skipped { index });
            continue;
        }

        let _ = tx.send(WorkerEvent::Started { worker, index });
        let outcome = run_with_retry(&policy, &invoker, &chunks[index]).await;
        if tx.send(WorkerEvent::Finished { index, outcome }).is_err() {
            return;
        }

        if Some(index) != last {
            pause(chunk_pause, &cancel).await;
        }
    }
}

/// 汇总器加上运行计数
struct RunState<O> {
    aggregator: Aggregator<O>,
    chunks_total: usize,
    chunks_run: usize,
    chunks_skipped: usize,
    skipped_ids: Vec<String>,
    sink_failures: usize,
}

impl<O: Clone + Send + Sync> RunState<O> {
    fn new(chunks_total: usize) -> Self {
        Self {
            aggregator: Aggregator::new(),
            chunks_total,
            chunks_run: 0,
            chunks_skipped: 0,
            skipped_ids: Vec::new(),
            sink_failures: 0,
        }
    }

    fn skip(&mut self, chunk: &Chunk) {
        self.chunks_skipped += 1;
        self.skipped_ids
            .extend(chunk.items.iter().map(|i| i.id().to_string()));
    }

    async fn complete<S>(
        &mut self,
        label: &str,
        chunk: &Chunk,
        outcome: &RetryOutcome<Vec<ItemResult<O>>>,
        sink: &S,
    ) where
        S: Sink<O> + ?Sized,
    {
        self.chunks_run += 1;
        let slice = self.aggregator.record_chunk(chunk, outcome);
        let ok = slice.iter().filter(|(_, r)| r.is_success()).count();
        logging::log_chunk_complete(
            label,
            chunk.number(),
            chunk.total,
            ok,
            slice.len(),
            outcome.attempts,
            self.aggregator.summary(),
        );
        self.write(label, sink, &slice).await;
    }

    async fn write<S>(&mut self, label: &str, sink: &S, slice: &[(String, ItemRecord<O>)])
    where
        S: Sink<O> + ?Sized,
    {
        if slice.is_empty() {
            return;
        }
        match sink.write(slice).await {
            Ok(written) => {
                info!("[{}] 💾 {} 写入 {} 条", label, sink.name(), written);
            }
            Err(e) => {
                self.sink_failures += 1;
                error!("[{}] ❌ {} 写入失败: {:#}", label, sink.name(), e);
            }
        }
    }

    async fn finish<S>(self, label: &str, sink: &S, cancel: &CancellationToken) -> RunReport<O>
    where
        S: Sink<O> + ?Sized,
    {
        let cancelled = cancel.is_cancelled();
        let mut run = RunReport {
            report: self.aggregator.into_report(),
            chunks_total: self.chunks_total,
            chunks_run: self.chunks_run,
            chunks_skipped: self.chunks_skipped,
            skipped_ids: self.skipped_ids,
            cancelled,
            sink_failures: self.sink_failures,
        };

        if let Err(e) = sink.finish(&run.report).await {
            run.sink_failures += 1;
            error!("[{}] ❌ {} 收尾失败: {:#}", label, sink.name(), e);
        }
        if cancelled {
            warn!(
                "[{}] ⚠️ 已取消: {} 个批次未执行 ({} 条)",
                label,
                run.chunks_skipped,
                run.skipped_ids.len()
            );
        }
        logging::print_final_summary(label, &run);
        run
    }
}

/// 等待 `duration`，取消时提前返回
async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sleep(duration) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::invoker::AttemptResult;
    use crate::pipeline::sink::NullSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl Invoker for Echo {
        type Output = String;

        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
            Ok(chunk
                .items
                .iter()
                .map(|i| (i.id().to_string(), Ok(i.id().to_uppercase())))
                .collect())
        }
    }

    struct EchoFactory {
        created: AtomicUsize,
        broken_worker: Option<usize>,
    }

    #[async_trait]
    impl InvokerFactory for EchoFactory {
        type Invoker = Echo;

        async fn create(&self, worker: usize) -> anyhow::Result<Echo> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if Some(worker) == self.broken_worker {
                anyhow::bail!("browser tab could not be opened");
            }
            Ok(Echo)
        }
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::new(format!("id{i}"))).collect()
    }

    #[tokio::test]
    async fn zero_chunk_size_aborts_before_work() {
        let pipeline = Pipeline::sequential("t", RetryPolicy::new(1).unwrap(), 0);
        let result = pipeline
            .run_sequential(items(3), &Echo, &NullSink, &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_workers_aborts_before_work() {
        let factory = Arc::new(EchoFactory {
            created: AtomicUsize::new(0),
            broken_worker: None,
        });
        let pipeline = Pipeline::parallel("t", RetryPolicy::new(1).unwrap(), 2, 0);
        let result = pipeline
            .run_parallel(items(3), Arc::clone(&factory), &NullSink, &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_report() {
        let pipeline = Pipeline::sequential("t", RetryPolicy::new(3).unwrap(), 10);
        let run = pipeline
            .run_sequential(Vec::new(), &Echo, &NullSink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.chunks_total, 0);
        assert_eq!(run.report.summary.total, 0);
        assert!(run.is_clean());
    }

    #[tokio::test]
    async fn parallel_run_uses_at_most_one_worker_per_chunk() {
        let factory = Arc::new(EchoFactory {
            created: AtomicUsize::new(0),
            broken_worker: None,
        });
        let pipeline = Pipeline::parallel("t", RetryPolicy::new(1).unwrap(), 5, 8);
        let run = pipeline
            .run_parallel(items(10), Arc::clone(&factory), &NullSink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(run.report.summary.succeeded, 10);
        assert_eq!(run.chunks_run, 2);
    }

    #[tokio::test]
    async fn failed_worker_setup_fails_only_its_chunks() {
        let factory = Arc::new(EchoFactory {
            created: AtomicUsize::new(0),
            broken_worker: Some(1),
        });
        let pipeline = Pipeline::parallel("t", RetryPolicy::new(2).unwrap(), 1, 2);
        let run = pipeline
            .run_parallel(items(4), factory, &NullSink, &CancellationToken::new())
            .await
            .unwrap();

        // worker 1 负责第 1、3 个批次
        assert_eq!(run.report.summary.succeeded, 2);
        assert_eq!(run.report.summary.failed, 2);
        assert!(run.report.get("id0").unwrap().is_success());
        let failed = run.report.get("id1").unwrap();
        assert_eq!(failed.attempts, 0);
        assert!(failed
            .failure()
            .unwrap()
            .reason
            .contains("browser tab could not be opened"));
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = Pipeline::sequential("t", RetryPolicy::new(1).unwrap(), 2);
        let run = pipeline
            .run_sequential(items(5), &Echo, &NullSink, &cancel)
            .await
            .unwrap();
        assert!(run.cancelled);
        assert_eq!(run.chunks_run, 0);
        assert_eq!(run.chunks_skipped, 3);
        assert_eq!(run.skipped_ids.len(), 5);
        assert_eq!(run.report.summary.total, 0);
    }
}
