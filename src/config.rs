use crate::error::{BridgeError, BridgeResult};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeConfig {
    // 平台分配给机器人的 AppID
    #[serde(default)]
    pub app_id: u64,

    // 数据库连接串 (为空则使用 data 目录下的 idmap.db)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    // 直接以平台字符串 ID 上报，跳过整数映射
    #[serde(default)]
    pub raw_string_ids: bool,

    // 使用哈希派生 ID (否则顺序分配)
    #[serde(default)]
    pub hash_ids: bool,

    // 群号+用户联合哈希，需同时开启 hash_ids
    #[serde(default)]
    pub hash_ids_pro: bool,

    // 双向 echo：上报携带 echo，应用端回复时带回
    #[serde(default)]
    pub two_way_echo: bool,

    // 仅输出标准 OneBot 字段 (关闭增强字段)
    #[serde(default)]
    pub native_output: bool,

    // 以消息段数组形式上报 message
    #[serde(default)]
    pub array_output: bool,

    // 移除消息中的第一个 "/"
    #[serde(default)]
    pub remove_prefix: bool,

    // 群消息前补一个 at 机器人的 CQ 码
    #[serde(default)]
    pub add_at_group: bool,

    // 收到带附件的消息时自动确认发送者的 ID 绑定
    #[serde(default)]
    pub auto_bind: bool,

    // message_id 仅保存在内存中
    #[serde(default)]
    pub memory_message_ids: bool,

    // 应用端可能以字符串 ID 调用 action，额外记录平台 ID 形式的懒 message_id
    #[serde(default)]
    pub string_action: bool,

    // 性能模式：不等待广播结果
    #[serde(default)]
    pub performance_mode: bool,

    // 主人 ID 列表 (上报 role = owner)
    #[serde(default)]
    pub master_ids: Vec<String>,

    // 固定 self_id (为空则使用 AppID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_id: Option<i64>,

    // 统一填充的 nickname / card
    #[serde(default)]
    pub card_and_nick: String,

    // 懒 message_id 有效期 (秒)
    #[serde(default = "default_lazy_secs")]
    pub lazy_message_id_secs: u64,

    // 单个缓存的软上限条目数
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    // 超出上限时清理早于该时长的条目 (秒)
    #[serde(default = "default_retention_secs")]
    pub cache_retention_secs: u64,
}

fn default_lazy_secs() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    100_000
}

fn default_retention_secs() -> u64 {
    3600
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            app_id: 0,
            database_url: None,
            raw_string_ids: false,
            hash_ids: false,
            hash_ids_pro: false,
            two_way_echo: false,
            native_output: false,
            array_output: false,
            remove_prefix: false,
            add_at_group: false,
            auto_bind: false,
            memory_message_ids: false,
            string_action: false,
            performance_mode: false,
            master_ids: Vec::new(),
            self_id: None,
            card_and_nick: String::new(),
            lazy_message_id_secs: default_lazy_secs(),
            cache_capacity: default_cache_capacity(),
            cache_retention_secs: default_retention_secs(),
        }
    }
}

impl BridgeConfig {
    pub fn app_id_str(&self) -> String {
        self.app_id.to_string()
    }

    /// 上报使用的 self_id
    pub fn self_id(&self) -> i64 {
        self.self_id.unwrap_or(self.app_id as i64)
    }

    pub fn lazy_window(&self) -> TimeDelta {
        secs_to_delta(self.lazy_message_id_secs)
    }

    pub fn retention(&self) -> TimeDelta {
        secs_to_delta(self.cache_retention_secs)
    }

    pub fn is_master(&self, user_id: &str) -> bool {
        self.master_ids.iter().any(|id| id == user_id)
    }
}

/// 超出 chrono 可表示范围的秒数按最大时长处理
fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// 配置管理器
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 加载配置，如果文件不存在则创建默认配置
    pub async fn load(&self) -> BridgeResult<BridgeConfig> {
        if !self.path.exists() {
            let default_cfg = BridgeConfig::default();
            self.save_atomic(&default_cfg).await?;
            return Ok(default_cfg);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(toml::from_str(&content)?)
    }

    /// 原子写入配置（写临时文件 -> Rename 覆盖）
    pub async fn save_atomic(&self, cfg: &BridgeConfig) -> BridgeResult<()> {
        let content = toml::to_string_pretty(cfg)?;
        let path = self.path.clone();
        let tmp_path = self.path.with_extension("tmp");

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)?;
            }

            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?; // 确保落盘
            fs::rename(&tmp_path, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))??;

        Ok(())
    }
}
