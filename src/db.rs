use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use std::path::Path;
use tracing::info;

/// 数据目录下默认的 SQLite 连接串
pub fn default_url(data_dir: &Path) -> String {
    // mode=rwc 允许 读/写/创建
    format!("sqlite:{}?mode=rwc", data_dir.join("idmap.db").display())
}

/// 初始化数据库连接
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(url.to_string());
    opt.sqlx_logging(false);

    let db = Database::connect(opt).await?;
    info!(target: "Database", "连接成功: {}", url);
    Ok(db)
}

/// 确保数据目录存在后连接
pub async fn init(data_dir: &Path, url: Option<&str>) -> Result<DatabaseConnection, DbErr> {
    if !data_dir.exists() {
        let _ = tokio::fs::create_dir_all(data_dir).await;
    }
    match url {
        Some(url) => connect(url).await,
        None => connect(&default_url(data_dir)).await,
    }
}

/// 按实体建表 (已存在则跳过)
pub async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();

    db.execute(builder.build(&stmt)).await?;
    Ok(())
}

/// 单连接的内存库，多连接时每个连接会各自拿到一个独立的空库
#[cfg(test)]
pub(crate) async fn memory() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    Database::connect(opt).await.unwrap()
}
