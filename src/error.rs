use sea_orm::DbErr;
use thiserror::Error;

/// ID 映射存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Db(#[from] DbErr),

    /// 连续加盐重哈希后仍然冲突
    #[error("哈希 ID 冲突无法消解: {platform_id}")]
    HashExhausted { platform_id: String },

    /// 当前 ID 策略不支持该操作
    #[error("当前 ID 策略不支持: {0}")]
    Strategy(String),
}

/// 桥接层错误
#[derive(Debug, Error)]
pub enum BridgeError {
    /// 配置组合会破坏 ID 空间，进程必须终止
    #[error("配置错误: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("数据库错误: {0}")]
    Db(#[from] DbErr),

    #[error("文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置解析失败: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("配置序列化失败: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("事件投递失败: {0}")]
    Dispatch(String),
}

impl BridgeError {
    /// 是否需要终止进程 (仅配置错误)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Misconfigured(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
