// lib.rs
//
// ================================================================================
// Ayjx Bridge - 平台群消息 -> OneBot v11 上报
//
// 架构：ID 映射 (顺序 / 哈希 / 联合哈希) | 回复关联缓存 | 原子配置
// ================================================================================

pub mod adapters;
pub mod config;
pub mod db;
pub mod echo;
pub mod error;
pub mod event;
pub mod idmap;
pub mod log;
pub mod message;
pub mod processor;

use crate::adapters::console::ConsoleDispatcher;
use crate::config::{BridgeConfig, ConfigManager};
use crate::error::BridgeResult;
use crate::idmap::IdStrategy;
use crate::processor::{Dispatcher, Processor, Stores};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 桥接构建器
pub struct BridgeBuilder {
    config_path: PathBuf,
    data_dir: PathBuf,
    config: Option<BridgeConfig>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl BridgeBuilder {
    pub fn new() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
            data_dir: PathBuf::from("data"),
            config: None,
            dispatcher: None,
        }
    }

    /// 设置配置文件路径
    pub fn config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = path.as_ref().to_path_buf();
        self
    }

    /// 设置数据目录
    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// 直接使用给定配置，不读取配置文件
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 设置上报出口，默认打印到控制台
    pub fn dispatcher<D: Dispatcher + 'static>(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// 加载配置、打开存储并构造处理器。配置错误 (`is_fatal`) 在连接数据库前返回。
    pub async fn build(self) -> BridgeResult<Bridge> {
        let config = match self.config {
            Some(cfg) => cfg,
            None => {
                info!(target: "System", "正在加载配置: {}", self.config_path.display());
                ConfigManager::new(&self.config_path).load().await?
            }
        };

        let strategy = IdStrategy::from_config(&config)?;
        info!(target: "System", "AppID: {} | ID 策略: {}", config.app_id, strategy.as_str());

        let db = db::init(&self.data_dir, config.database_url.as_deref()).await?;
        let stores = Arc::new(Stores::open(&config, db).await?);
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(ConsoleDispatcher) as Arc<dyn Dispatcher>);

        let processor = Arc::new(Processor::new(config, stores, dispatcher)?);
        Ok(Bridge { processor })
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Bridge {
    processor: Arc<Processor>,
}

impl Bridge {
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    pub fn processor(&self) -> Arc<Processor> {
        self.processor.clone()
    }

    /// 以控制台适配器运行，直到标准输入关闭
    pub async fn run(self) -> BridgeResult<()> {
        adapters::console::run(self.processor).await;
        Ok(())
    }
}
