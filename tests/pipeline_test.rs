use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use deal_batch::models::WorkItem;
use deal_batch::pipeline::{
    run_with_retry, AggregateReport, AttemptResult, Chunk, Failure, Invoker, InvokerFactory,
    ItemOperation, ItemResult, PerItem, Pipeline, RetryPolicy, RetryState, Sink, Slice,
};
use deal_batch::sheets::MemorySheet;
use deal_batch::services::bflow::read_fresh_export;
use deal_batch::services::sheet_writer::{row_index, STATUS_DONE};
use deal_batch::services::{ExistingExportInvoker, ProductColumns, StatusSheetSink};
use deal_batch::workbook::ExportIndex;

fn items(n: usize) -> Vec<WorkItem> {
    (0..n).map(|i| WorkItem::new(format!("P{:04}", i))).collect()
}

fn policy(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts)
        .unwrap()
        .with_delay(Duration::ZERO)
}

/// 记录每次写入的切片
#[derive(Default)]
struct RecordingSink {
    slices: Mutex<Vec<Vec<String>>>,
    finished: AtomicU32,
}

impl RecordingSink {
    async fn slice_sizes(&self) -> Vec<usize> {
        self.slices.lock().await.iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl<O: Clone + Send + Sync + 'static> Sink<O> for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn write(&self, slice: &Slice<O>) -> anyhow::Result<usize> {
        let ids = slice.iter().map(|(id, _)| id.clone()).collect();
        self.slices.lock().await.push(ids);
        Ok(slice.len())
    }

    async fn finish(&self, _report: &AggregateReport<O>) -> anyhow::Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn echo(chunk: &Chunk) -> Vec<ItemResult<String>> {
    chunk
        .items
        .iter()
        .map(|item| (item.id().to_string(), Ok(item.id().to_lowercase())))
        .collect()
}

struct Echo;

#[async_trait]
impl Invoker for Echo {
    type Output = String;

    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
        Ok(echo(chunk))
    }
}

/// 前 `fail_first` 次调用失败
struct Flaky {
    calls: AtomicU32,
    fail_first: u32,
}

#[async_trait]
impl Invoker for Flaky {
    type Output = String;

    fn name(&self) -> &str {
        "flaky"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(Failure::transient(format!("attempt {} failed", call)));
        }
        Ok(echo(chunk))
    }
}

/// 第一个批次总是失败，其余正常
struct FirstChunkBroken {
    calls: Mutex<HashMap<usize, u32>>,
}

#[async_trait]
impl Invoker for FirstChunkBroken {
    type Output = String;

    fn name(&self) -> &str {
        "first-chunk-broken"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
        let mut calls = self.calls.lock().await;
        let n = calls.entry(chunk.index).or_default();
        *n += 1;
        if chunk.index == 0 {
            return Err(Failure::transient(format!("export timeout #{}", n)));
        }
        Ok(echo(chunk))
    }
}

#[tokio::test]
async fn scenario_a_chunks_of_500() {
    let sink = RecordingSink::default();
    let run = Pipeline::sequential("A", policy(1), 500)
        .run_sequential(items(1250), &Echo, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.chunks_total, 3);
    assert_eq!(sink.slice_sizes().await, vec![500, 500, 250]);
    assert_eq!(run.report.summary.total, 1250);
    assert_eq!(run.report.summary.succeeded, 1250);
    assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    assert!(run.is_clean());
}

#[tokio::test]
async fn scenario_b_succeeds_on_third_attempt() {
    let invoker = Flaky {
        calls: AtomicU32::new(0),
        fail_first: 2,
    };
    let chunk = Chunk {
        index: 0,
        total: 1,
        items: items(3),
    };

    let outcome = run_with_retry(&policy(3), &invoker, &chunk).await;

    assert_eq!(outcome.state, RetryState::Succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
    let attempts = outcome
        .history
        .iter()
        .filter(|s| matches!(s, RetryState::Attempting(_)))
        .count();
    assert_eq!(attempts, 3);
    assert_eq!(outcome.history.last(), Some(&RetryState::Succeeded));
}

#[tokio::test]
async fn scenario_c_exhaustion_keeps_later_chunks() {
    let invoker = FirstChunkBroken {
        calls: Mutex::new(HashMap::new()),
    };
    let sink = RecordingSink::default();
    let run = Pipeline::sequential("C", policy(3), 2)
        .run_sequential(items(5), &invoker, &sink, &CancellationToken::new())
        .await
        .unwrap();

    let calls = invoker.calls.lock().await.clone();
    assert_eq!(calls[&0], 3);
    assert_eq!(calls[&1], 1);
    assert_eq!(calls[&2], 1);

    let summary = run.report.summary;
    assert_eq!((summary.total, summary.succeeded, summary.failed), (5, 3, 2));
    let failed = run.report.get("P0000").unwrap();
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.failure().unwrap().reason, "export timeout #3");
    assert_eq!(run.report.get("P0004").unwrap().result, Ok("p0004".to_string()));
    assert_eq!(sink.slice_sizes().await, vec![2, 2, 1]);
    assert!(!run.is_clean());
}

/// 包含 "P0001" 的批次返回永久错误
struct Picky {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Invoker for Picky {
    type Output = String;

    fn name(&self) -> &str {
        "picky"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if chunk.ids().contains(&"P0001") {
            return Err(Failure::permanent("상품번호 형식 오류"));
        }
        Ok(echo(chunk))
    }
}

struct PickyFactory {
    calls: Arc<AtomicU32>,
    created: AtomicU32,
}

#[async_trait]
impl InvokerFactory for PickyFactory {
    type Invoker = Picky;

    async fn create(&self, _worker: usize) -> anyhow::Result<Picky> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Picky {
            calls: self.calls.clone(),
        })
    }
}

#[tokio::test]
async fn scenario_d_parallel_failure_is_isolated() {
    let factory = Arc::new(PickyFactory {
        calls: Arc::new(AtomicU32::new(0)),
        created: AtomicU32::new(0),
    });
    let sink = RecordingSink::default();
    let run = Pipeline::parallel("D", policy(3), 1, 4)
        .run_parallel(items(4), factory.clone(), &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(factory.created.load(Ordering::SeqCst), 4);
    // 永久错误不重试
    assert_eq!(factory.calls.load(Ordering::SeqCst), 4);
    assert_eq!(run.chunks_run, 4);

    let summary = run.report.summary;
    assert_eq!((summary.total, summary.succeeded, summary.failed), (4, 3, 1));
    for id in ["P0000", "P0002", "P0003"] {
        assert!(run.report.get(id).unwrap().is_success(), "{id}");
    }
    assert!(run.report.get("P0001").unwrap().failure().unwrap().is_permanent());
    assert_eq!(sink.slice_sizes().await.len(), 4);
}

/// 处理完第一个批次后触发取消
struct CancelAfterFirst {
    cancel: CancellationToken,
}

#[async_trait]
impl Invoker for CancelAfterFirst {
    type Output = String;

    fn name(&self) -> &str {
        "cancel-after-first"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
        self.cancel.cancel();
        Ok(echo(chunk))
    }
}

#[tokio::test]
async fn scenario_d_cancellation_keeps_aggregated_results() {
    let cancel = CancellationToken::new();
    let invoker = CancelAfterFirst {
        cancel: cancel.clone(),
    };
    let sink = RecordingSink::default();
    let run = Pipeline::sequential("D-cancel", policy(3), 2)
        .with_chunk_pause(Duration::from_secs(60))
        .run_sequential(items(6), &invoker, &sink, &cancel)
        .await
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(run.chunks_run, 1);
    assert_eq!(run.chunks_skipped, 2);
    assert_eq!(run.report.summary.succeeded, 2);
    assert_eq!(run.report.summary.failed, 0);
    assert_eq!(run.skipped_ids, vec!["P0002", "P0003", "P0004", "P0005"]);
    assert_eq!(sink.slice_sizes().await, vec![2]);
    assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn parallel_run_with_cancelled_token_starts_nothing() {
    let factory = Arc::new(PickyFactory {
        calls: Arc::new(AtomicU32::new(0)),
        created: AtomicU32::new(0),
    });
    let cancel = CancellationToken::new();
    cancel.cancel();
    let sink = RecordingSink::default();

    let run = Pipeline::parallel("D-pre", policy(1), 2, 2)
        .run_parallel(items(4), factory.clone(), &sink, &cancel)
        .await
        .unwrap();

    assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
    assert_eq!(run.chunks_skipped, 2);
    assert_eq!(run.report.summary.total, 0);
    assert_eq!(run.skipped_ids.len(), 4);
}

#[tokio::test]
async fn existing_export_updates_sheet_end_to_end() {
    let sheet = Arc::new(MemorySheet::from_rows(
        5,
        &[
            vec!["1001", "수분 크림"],
            vec!["", ""],
            vec!["1002", "선크림"],
            vec!["1003", "없는 상품"],
        ],
    ));
    let items = vec![
        WorkItem::new("1001").with_field("row", "5"),
        WorkItem::new("1002").with_field("row", "7"),
        WorkItem::new("1003").with_field("row", "8"),
    ];
    let index = ExportIndex::from_rows(&[
        vec!["상품번호".to_string(), "상품명".to_string(), "판매가".to_string()],
        vec!["1001".to_string(), "수분 크림 50ml".to_string(), "19900".to_string()],
        vec!["1002".to_string(), "선크림".to_string(), "12000".to_string()],
    ]);
    let sink = StatusSheetSink::new(
        sheet.clone(),
        row_index(&items),
        ProductColumns::with_status(4),
    );

    let run = Pipeline::sequential("sync", policy(1), 2)
        .run_sequential(items, &ExistingExportInvoker::new(index), &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.report.summary.succeeded, 2);
    assert_eq!(sheet.cell(5, 4).await.as_deref(), Some(STATUS_DONE));
    assert_eq!(sheet.cell(5, 6).await.as_deref(), Some("수분 크림 50ml"));
    assert_eq!(sheet.cell(7, 8).await.as_deref(), Some("12000"));
    assert!(sheet
        .cell(8, 4)
        .await
        .unwrap()
        .starts_with("실패: "));
    assert_eq!(sheet.writes().await.len(), 2);
}

/// 逐条调用：`dead` 总是临时失败，其余条目耗时 `each` 后成功
struct PageVisit {
    calls: Arc<AtomicU32>,
    each: Duration,
}

#[async_trait]
impl ItemOperation for PageVisit {
    type Output = String;

    fn name(&self) -> &str {
        "page-visit"
    }

    async fn call(&self, item: &WorkItem) -> AttemptResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.each).await;
        if item.id() == "dead" {
            return Err(Failure::transient("navigation timeout"));
        }
        Ok(format!("https://img/{}.jpg", item.id()))
    }
}

struct PageVisitFactory {
    calls: Arc<AtomicU32>,
    each: Duration,
    policy: RetryPolicy,
}

#[async_trait]
impl InvokerFactory for PageVisitFactory {
    type Invoker = PerItem<PageVisit>;

    async fn create(&self, _worker: usize) -> anyhow::Result<PerItem<PageVisit>> {
        let visit = PageVisit {
            calls: self.calls.clone(),
            each: self.each,
        };
        Ok(PerItem::new(visit, self.policy.clone()))
    }
}

fn named(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter().map(|id| WorkItem::new(*id)).collect()
}

#[tokio::test]
async fn per_item_job_keeps_successes_next_to_a_dead_item() {
    let calls = Arc::new(AtomicU32::new(0));
    let factory = Arc::new(PageVisitFactory {
        calls: calls.clone(),
        each: Duration::ZERO,
        policy: policy(3),
    });
    let sink = RecordingSink::default();

    let run = Pipeline::parallel("images", policy(3), 4, 2)
        .run_parallel(named(&["a", "b", "dead", "c", "d", "e"]), factory, &sink, &CancellationToken::new())
        .await
        .unwrap();

    let summary = run.report.summary;
    assert_eq!((summary.total, summary.succeeded, summary.failed), (6, 5, 1));
    assert_eq!(
        run.report.get("a").unwrap().result,
        Ok("https://img/a.jpg".to_string())
    );
    assert_eq!(
        run.report.get("dead").unwrap().failure().unwrap().reason,
        "navigation timeout"
    );
    // 5 个成功各一次，dead 三次
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(run.chunks_run, 2);
}

#[tokio::test(start_paused = true)]
async fn per_item_chunk_may_outlast_the_attempt_timeout() {
    let calls = Arc::new(AtomicU32::new(0));
    let limited = policy(2).with_attempt_timeout(Duration::from_secs(5));
    let factory = Arc::new(PageVisitFactory {
        calls: calls.clone(),
        each: Duration::from_secs(2),
        policy: limited.clone(),
    });
    let sink = RecordingSink::default();

    // 一个批次 6 条 × 2 秒，远超 5 秒，但每条调用都在时限内
    let run = Pipeline::parallel("images", limited, 6, 1)
        .run_parallel(items(6), factory, &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.report.summary.succeeded, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert!(run.is_clean());
}

/// 每次尝试都重新读取同一个（损坏的）下载文件
struct BrokenExport {
    path: std::path::PathBuf,
    calls: AtomicU32,
}

#[async_trait]
impl Invoker for BrokenExport {
    type Output = String;

    fn name(&self) -> &str {
        "broken-export"
    }

    async fn invoke(&self, chunk: &Chunk) -> AttemptResult<Vec<ItemResult<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        read_fresh_export(self.path.clone()).await?;
        Ok(echo(chunk))
    }
}

#[tokio::test]
async fn unreadable_export_uses_the_full_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("딜상품.xlsx");
    std::fs::write(&path, b"").unwrap();
    let invoker = BrokenExport {
        path,
        calls: AtomicU32::new(0),
    };

    let outcome = run_with_retry(&policy(3), &invoker, &Chunk {
        index: 0,
        total: 1,
        items: items(2),
    })
    .await;

    assert_eq!(outcome.state, RetryState::FailedExhausted);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
    assert!(!outcome.result.unwrap_err().is_permanent());
}
