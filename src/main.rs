//! # LLM Gateway 主程序
//!
//! 加载配置、迁移数据库、构建路由表，并启动管理接口与后台任务

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use llm_gateway::app::{AppContext, AppTasks};
use llm_gateway::config::ConfigManager;
use llm_gateway::logging::{self, LogComponent, LogStage};
use llm_gateway::management::ManagementServer;
use llm_gateway::error::Context;
use llm_gateway::{Result, database, lerror, linfo};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "llm-gateway", version, about = "LLM API gateway core")]
struct Cli {
    /// 配置文件路径，缺省时按 `GATEWAY_CONFIG_PATH` / `RUST_ENV` 解析
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_optimized_logging(cli.log_level.as_ref());
    llm_gateway::management::handlers::system::init_start_time();

    if let Err(e) = run(cli).await {
        lerror!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "service_start_failed",
            "服务启动失败",
            error = %e
        );
        return Err(e);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let manager = match cli.config {
        Some(path) => ConfigManager::from_file(path)?,
        None => ConfigManager::new()?,
    };
    let config = Arc::new(manager.get_config().await);

    let db = database::init_database(&config.database)
        .await
        .context("数据库连接失败")?;
    database::run_migrations(&db).await.context("数据库迁移失败")?;

    let context = Arc::new(AppContext::initialize(Arc::clone(&config), Arc::new(db)).await?);
    let tasks = AppTasks::initialize(&context).await?;
    tasks.scheduler().start_all().await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::Main,
                "signal_received",
                "收到退出信号"
            );
        }
        signal.cancel();
    });

    let server = ManagementServer::new(config.management.clone(), Arc::clone(&context));
    let served = server.serve(shutdown).await;

    tasks.scheduler().shutdown().await;
    served
}
