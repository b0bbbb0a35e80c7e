use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use deal_batch::config::{Config, DEFAULT_CONFIG_FILE};
use deal_batch::orchestrator::{App, Job};
use deal_batch::utils::logging;

#[derive(Debug, Parser)]
#[command(name = "deal_batch")]
#[command(about = "b-flow 下载 / 图片提取 / CJ 价格批量处理 / 마켓상품생성")]
struct Cli {
    /// TOML 配置文件（默认读取当前目录的 deal_batch.toml）
    #[arg(long, global = true, env = "DEAL_BATCH_CONFIG")]
    config: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// b-flow 按商品号导出并写回表格
    Download,
    /// 用已下载的导出文件写回表格
    SyncFile {
        /// 导出文件路径，默认 <download_folder>/<sheet_name>.xlsx
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// 提取商品大图地址写入表格
    Images,
    /// CJ 价格批量变更
    CjUpload {
        /// 只统计，不调用 API
        #[arg(long)]
        dry_run: bool,
    },
    /// 拆分 CJ 原表
    CjSplit,
    /// b-flow 판매중 商品批量마켓상품생성
    Market {
        /// 不再询问，直接开始
        #[arg(short, long)]
        yes: bool,
    },
    /// 下载（或同步）后提取图片
    All {
        #[arg(long)]
        skip_download: bool,
        #[arg(long)]
        skip_images: bool,
    },
}

impl From<Commands> for Job {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Download => Job::Download,
            Commands::SyncFile { file } => Job::SyncFile { file },
            Commands::Images => Job::Images,
            Commands::CjUpload { dry_run } => Job::CjUpload { dry_run },
            Commands::CjSplit => Job::CjSplit,
            Commands::Market { yes } => Job::Market { yes },
            Commands::All {
                skip_download,
                skip_images,
            } => Job::All {
                skip_download,
                skip_images,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置（会先读取 .env）
    let config = Config::load(cli.config.as_deref())?;
    logging::init(cli.verbose || config.verbose_logging);

    let config_source = match &cli.config {
        Some(path) => path.display().to_string(),
        None if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() => {
            DEFAULT_CONFIG_FILE.to_string()
        }
        None => "默认值 + 环境变量".to_string(),
    };

    let job = Job::from(cli.command);
    let app = App::initialize(config, &config_source, &job)?;
    app.watch_ctrl_c();

    match app.run(job).await {
        Ok(outcomes) if outcomes.iter().all(|o| o.is_clean()) => Ok(()),
        Ok(_) => std::process::exit(1),
        Err(e) => {
            error!("❌ 运行失败: {:#}", e);
            Err(e)
        }
    }
}
