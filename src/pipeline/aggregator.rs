//! 结果汇总
//!
//! 按条目 id 折叠每次交付的结果：同一个 id 后写覆盖先写，统计始终按唯一 id 计算。

use indexmap::IndexMap;
use serde::Serialize;

use crate::pipeline::chunker::Chunk;
use crate::pipeline::invoker::{AttemptResult, Failure, ItemResult};
use crate::pipeline::retry::RetryOutcome;

/// 调用方没有返回某个条目时记录的原因
pub const NO_RESULT_RETURNED: &str = "no result returned";

/// 一个条目的最终记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord<O> {
    pub result: AttemptResult<O>,
    /// 所在批次用掉的尝试次数
    pub attempts: u32,
}

impl<O> ItemRecord<O> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.result.as_ref().err()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// 汇总结果
#[derive(Debug, Clone)]
pub struct AggregateReport<O> {
    pub items: IndexMap<String, ItemRecord<O>>,
    pub summary: Summary,
}

impl<O> AggregateReport<O> {
    pub fn get(&self, id: &str) -> Option<&ItemRecord<O>> {
        self.items.get(id)
    }

    /// 失败的条目（首次出现的顺序）
    pub fn failures(&self) -> Vec<(&str, &Failure)> {
        self.items
            .iter()
            .filter_map(|(id, record)| record.failure().map(|f| (id.as_str(), f)))
            .collect()
    }

    pub fn successes(&self) -> Vec<(&str, &O)> {
        self.items
            .iter()
            .filter_map(|(id, record)| record.result.as_ref().ok().map(|o| (id.as_str(), o)))
            .collect()
    }
}

#[derive(Debug)]
pub struct Aggregator<O> {
    items: IndexMap<String, ItemRecord<O>>,
    summary: Summary,
}

impl<O> Default for Aggregator<O> {
    fn default() -> Self {
        Self {
            items: IndexMap::new(),
            summary: Summary::default(),
        }
    }
}

impl<O: Clone> Aggregator<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个条目，已有记录时覆盖
    pub fn record(&mut self, id: impl Into<String>, result: AttemptResult<O>, attempts: u32) {
        let record = ItemRecord { result, attempts };
        let now_ok = record.is_success();
        match self.items.insert(id.into(), record) {
            Some(previous) => {
                if previous.is_success() != now_ok {
                    if now_ok {
                        self.summary.failed -= 1;
                        self.summary.succeeded += 1;
                    } else {
                        self.summary.succeeded -= 1;
                        self.summary.failed += 1;
                    }
                }
            }
            None => {
                self.summary.total += 1;
                if now_ok {
                    self.summary.succeeded += 1;
                } else {
                    self.summary.failed += 1;
                }
            }
        }
    }

    /// 把一个批次的结果展开到批次中的每个条目，返回本批次写入的记录
    ///
    /// - 批次失败：每个条目都记为该失败原因
    /// - 批次成功：按返回结果记录；调用方遗漏的条目记为永久失败
    pub fn record_chunk(
        &mut self,
        chunk: &Chunk,
        outcome: &RetryOutcome<Vec<ItemResult<O>>>,
    ) -> Vec<(String, ItemRecord<O>)> {
        let attempts = outcome.attempts;
        let mut slice = Vec::with_capacity(chunk.len());

        match &outcome.result {
            Err(failure) => {
                for item in &chunk.items {
                    slice.push((item.id().to_string(), Err(failure.clone())));
                }
            }
            Ok(results) => {
                let mut returned: IndexMap<&str, &AttemptResult<O>> = IndexMap::new();
                for (id, result) in results {
                    returned.insert(id.as_str(), result);
                }
                for item in &chunk.items {
                    let result = match returned.get(item.id()) {
                        Some(result) => (*result).clone(),
                        None => Err(Failure::permanent(NO_RESULT_RETURNED)),
                    };
                    slice.push((item.id().to_string(), result));
                }
            }
        }

        slice
            .into_iter()
            .map(|(id, result)| {
                self.record(id.clone(), result.clone(), attempts);
                (id, ItemRecord { result, attempts })
            })
            .collect()
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn get(&self, id: &str) -> Option<&ItemRecord<O>> {
        self.items.get(id)
    }

    pub fn failures(&self) -> Vec<(&str, &Failure)> {
        self.items
            .iter()
            .filter_map(|(id, record)| record.failure().map(|f| (id.as_str(), f)))
            .collect()
    }

    pub fn successes(&self) -> Vec<(&str, &O)> {
        self.items
            .iter()
            .filter_map(|(id, record)| record.result.as_ref().ok().map(|o| (id.as_str(), o)))
            .collect()
    }

    pub fn into_report(self) -> AggregateReport<O> {
        AggregateReport {
            items: self.items,
            summary: self.summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkItem;
    use crate::pipeline::retry::RetryState;

    fn outcome<O>(result: AttemptResult<Vec<ItemResult<O>>>, attempts: u32) -> RetryOutcome<Vec<ItemResult<O>>> {
        let state = if result.is_ok() {
            RetryState::Succeeded
        } else {
            RetryState::FailedExhausted
        };
        RetryOutcome {
            state,
            attempts,
            result,
            history: Vec::new(),
        }
    }

    #[test]
    fn last_write_wins_and_summary_counts_unique_ids() {
        let mut agg: Aggregator<u32> = Aggregator::new();
        agg.record("p1", Err(Failure::transient("timeout")), 3);
        agg.record("p2", Ok(2), 1);
        assert_eq!(
            agg.summary(),
            Summary {
                total: 2,
                succeeded: 1,
                failed: 1
            }
        );

        agg.record("p1", Ok(1), 1);
        assert_eq!(
            agg.summary(),
            Summary {
                total: 2,
                succeeded: 2,
                failed: 0
            }
        );
        assert_eq!(agg.get("p1").unwrap().result, Ok(1));

        agg.record("p2", Err(Failure::permanent("bad")), 1);
        let summary = agg.summary();
        assert_eq!(summary.total, summary.succeeded + summary.failed);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn failed_chunk_marks_every_item() {
        let chunk = Chunk {
            index: 0,
            total: 1,
            items: vec![WorkItem::new("a"), WorkItem::new("b")],
        };
        let mut agg: Aggregator<String> = Aggregator::new();
        let slice = agg.record_chunk(&chunk, &outcome(Err(Failure::transient("modal")), 3));

        assert_eq!(slice.len(), 2);
        assert!(slice.iter().all(|(_, r)| r.attempts == 3 && !r.is_success()));
        let failures = agg.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, "a");
        assert_eq!(failures[0].1.reason, "modal");
    }

    #[test]
    fn missing_items_become_permanent_failures() {
        let chunk = Chunk {
            index: 0,
            total: 1,
            items: vec![WorkItem::new("a"), WorkItem::new("b"), WorkItem::new("c")],
        };
        let results = vec![
            ("a".to_string(), Ok("A".to_string())),
            ("c".to_string(), Err(Failure::permanent("price rejected"))),
        ];
        let mut agg = Aggregator::new();
        agg.record_chunk(&chunk, &outcome(Ok(results), 1));

        let report = agg.into_report();
        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.succeeded, 1);
        let b = report.get("b").unwrap().failure().unwrap();
        assert!(b.is_permanent());
        assert_eq!(b.reason, NO_RESULT_RETURNED);
        assert_eq!(report.successes(), vec![("a", &"A".to_string())]);
    }

    #[test]
    fn duplicate_ids_in_a_chunk_collapse_to_one_record() {
        let chunk = Chunk {
            index: 0,
            total: 1,
            items: vec![WorkItem::new("a"), WorkItem::new("a")],
        };
        let mut agg = Aggregator::new();
        agg.record_chunk(&chunk, &outcome(Ok(vec![("a".to_string(), Ok(1u8))]), 1));
        assert_eq!(agg.summary().total, 1);
    }
}
