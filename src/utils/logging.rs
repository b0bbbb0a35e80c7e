use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、进度播报和最终统计的辅助函数
use std::fs;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::pipeline::{RunReport, Summary};

/// 最终统计里逐条列出的失败条目上限，超出部分只给数量
const MAX_LISTED_FAILURES: usize = 200;

/// 初始化 tracing 订阅器
///
/// `RUST_LOG` 优先；未设置时默认 `info`，`verbose` 为真时 `debug`
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
/// - `job`: 本次运行的任务名
pub fn init_log_file(log_file_path: &str, job: &str) -> Result<()> {
    let log_header = format!(
        "{}\n{} 任务日志 - {}\n{}\n\n",
        "=".repeat(60),
        job,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(job: &str, config_source: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - {}", job);
    info!("⚙️ 配置来源: {}", config_source);
    info!("{}", "=".repeat(60));
}

/// 记录一次运行的规模
pub fn log_run_start(label: &str, items: usize, chunks: usize, chunk_size: usize, workers: usize) {
    info!("[{}] ✓ 共 {} 条待处理", label, items);
    info!(
        "[{}] 📋 每批 {} 条，共 {} 批，{} 个 worker",
        label, chunk_size, chunks, workers
    );
}

/// 记录批次开始信息
///
/// # 参数
/// - `label`: 任务名
/// - `batch_num`: 批次编号（从 1 开始）
/// - `total_batches`: 批次总数
/// - `size`: 本批条目数
pub fn log_batch_start(label: &str, batch_num: usize, total_batches: usize, size: usize) {
    info!("\n{}", "=".repeat(60));
    info!("[{}] 📦 开始处理第 {}/{} 批", label, batch_num, total_batches);
    info!("[{}] 📄 本批条目: {} 条", label, size);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息和累计统计
pub fn log_chunk_complete(
    label: &str,
    batch_num: usize,
    total_batches: usize,
    success: usize,
    size: usize,
    attempts: u32,
    running: Summary,
) {
    info!("\n{}", "─".repeat(60));
    info!(
        "[{}] ✓ 第 {}/{} 批完成: 成功 {}/{} (尝试 {} 次)",
        label, batch_num, total_batches, success, size, attempts
    );
    info!(
        "[{}] 📈 累计: 成功 {} / 失败 {} / 共 {}",
        label, running.succeeded, running.failed, running.total
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息，逐条列出失败原因
pub fn print_final_summary<O>(label: &str, run: &RunReport<O>) {
    let summary = run.report.summary;
    info!("\n{}", "=".repeat(60));
    info!("[{}] 📊 全部处理完成统计", label);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.succeeded, summary.total);
    info!("❌ 失败: {}", summary.failed);
    info!(
        "📦 批次: 执行 {} / 跳过 {} / 共 {}",
        run.chunks_run, run.chunks_skipped, run.chunks_total
    );
    if run.sink_failures > 0 {
        warn!("💾 写入失败 {} 次", run.sink_failures);
    }

    let failures = run.report.failures();
    if !failures.is_empty() {
        info!("{}", "─".repeat(60));
        info!("失败明细:");
        for (id, failure) in failures.iter().take(MAX_LISTED_FAILURES) {
            info!("  ❌ {} - {}", id, truncate_text(&failure.reason, 120));
        }
        if failures.len() > MAX_LISTED_FAILURES {
            info!("  ... 其余 {} 条省略", failures.len() - MAX_LISTED_FAILURES);
        }
    }

    if !run.skipped_ids.is_empty() {
        info!("{}", "─".repeat(60));
        info!(
            "⏭️ 未处理 {} 条: {}",
            run.skipped_ids.len(),
            truncate_text(&run.skipped_ids.join(", "), 300)
        );
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate_text("상품번호", 2), "상품...");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn log_file_header_names_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        init_log_file(path.to_str().unwrap(), "download").unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("download 任务日志"));
        assert!(content.starts_with(&"=".repeat(60)));
    }
}
