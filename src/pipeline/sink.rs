//! 结果写出
//!
//! `Sink` 把汇总结果的一个切片一次性写到外部（表格、CSV 报告等）。

use async_trait::async_trait;

use crate::pipeline::aggregator::{AggregateReport, ItemRecord};

/// 一个切片：（条目 id, 记录）
pub type Slice<O> = [(String, ItemRecord<O>)];

#[async_trait]
pub trait Sink<O: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    /// 一次外部调用写完整个切片，返回实际写入的条目数
    async fn write(&self, slice: &Slice<O>) -> anyhow::Result<usize>;

    /// 运行结束时调用一次（例如写报告文件）
    async fn finish(&self, _report: &AggregateReport<O>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 什么都不写
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl<O: Send + Sync> Sink<O> for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    async fn write(&self, slice: &Slice<O>) -> anyhow::Result<usize> {
        Ok(slice.len())
    }
}
