//! # 测试辅助函数
//!
//! 提供通用的测试工具和辅助函数

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::sync::Once;
use tempfile::TempDir;

use crate::config::AppConfig;

static INIT: Once = Once::new();

/// 初始化测试日志
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("llm_gateway=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// 创建内存数据库连接并执行迁移
pub async fn create_test_db() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// 创建临时数据库文件
pub async fn create_temp_db() -> Result<(DatabaseConnection, TempDir), DbErr> {
    let temp_dir =
        tempfile::tempdir().map_err(|e| DbErr::Custom(format!("创建临时目录失败: {e}")))?;

    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let db = Database::connect(&db_url).await?;
    migration::Migrator::up(&db, None).await?;

    Ok((db, temp_dir))
}

/// 测试用配置：内存数据库、冷却 60 秒、不做周期性重载
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.relay.retry_cooldown_seconds = 60;
    config.channels.reload_interval_seconds = 0;
    config
}
