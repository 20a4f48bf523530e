//! # 数据库模块
//!
//! 数据库连接和迁移管理

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::path::Path;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror, linfo};

/// 初始化数据库连接
///
/// SQLite 文件库会先创建所在目录与空文件
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let database_url = config.url.as_str();
    linfo!(
        "system",
        LogStage::Db,
        LogComponent::Database,
        "connect",
        "正在连接数据库",
        url = %database_url.chars().take(50).collect::<String>()
    );

    if config.is_sqlite() && !config.is_memory_database() {
        ensure_sqlite_file(database_url)?;
    }

    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(config.max_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    linfo!(
        "system",
        LogStage::Db,
        LogComponent::Database,
        "connected",
        "数据库连接成功"
    );
    Ok(db)
}

fn ensure_sqlite_file(database_url: &str) -> Result<(), DbErr> {
    let raw = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let db_path = Path::new(raw.split('?').next().unwrap_or(raw));

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbErr::Custom(format!("无法创建数据库目录 {}: {e}", parent.display()))
        })?;
        ldebug!(
            "system",
            LogStage::Db,
            LogComponent::Database,
            "create_dir",
            "已创建数据库目录",
            path = %parent.display()
        );
    }

    if !db_path.exists() {
        std::fs::File::create(db_path).map_err(|e| {
            DbErr::Custom(format!("无法创建数据库文件 {}: {e}", db_path.display()))
        })?;
    }
    Ok(())
}

/// 运行数据库迁移
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    let pending = ::migration::Migrator::get_pending_migrations(db).await?.len();

    match ::migration::Migrator::up(db, None).await {
        Ok(()) => {
            linfo!(
                "system",
                LogStage::Db,
                LogComponent::Database,
                "migrate",
                "数据库迁移完成",
                applied = pending
            );
            Ok(())
        }
        Err(e) => {
            lerror!(
                "system",
                LogStage::Db,
                LogComponent::Database,
                "migrate_failed",
                "数据库迁移失败",
                error = %e
            );
            Err(e)
        }
    }
}
