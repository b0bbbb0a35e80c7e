//! 分块器：把有序的条目列表切成固定大小的批次

use crate::error::ConfigError;
use crate::models::WorkItem;

/// 一个批次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 批次序号（从 0 开始）
    pub index: usize,
    /// 本次运行的批次总数
    pub total: usize,
    pub items: Vec<WorkItem>,
}

impl Chunk {
    /// 用于日志显示的序号（从 1 开始）
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(WorkItem::id).collect()
    }
}

/// 按固定大小切分，保持顺序；最后一组装剩余部分
pub fn split_into<T>(items: Vec<T>, chunk_size: usize) -> Result<Vec<Vec<T>>, ConfigError> {
    if chunk_size == 0 {
        return Err(ConfigError::InvalidValue {
            name: "chunk_size".to_string(),
            reason: "必须大于 0".to_string(),
        });
    }

    let mut groups = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            groups.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(chunk_size),
            ));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    Ok(groups)
}

/// 把条目切成带序号的批次
pub fn chunk_items(items: Vec<WorkItem>, chunk_size: usize) -> Result<Vec<Chunk>, ConfigError> {
    let groups = split_into(items, chunk_size)?;
    let total = groups.len();
    Ok(groups
        .into_iter()
        .enumerate()
        .map(|(index, items)| Chunk {
            index,
            total,
            items,
        })
        .collect())
}

/// 让 `workers` 个 worker 平分 `n` 个条目时每块的大小
pub fn chunk_size_for_workers(n: usize, workers: usize) -> usize {
    n.div_ceil(workers.max(1)).max(1)
}
