use super::{Pruner, Retention};
use chrono::{DateTime, Local};
use dashmap::DashMap;
use std::fmt;

/// 关联 token，格式 `{AppID}_{s}_{毫秒时间戳}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EchoToken(String);

impl EchoToken {
    pub fn mint(app_id: &str, seq: u64, at: DateTime<Local>) -> Self {
        Self(format!("{}_{}_{}", app_id, seq, at.timestamp_millis()))
    }

    /// 不支持双向 echo 的应用端只能按群回复，以 `{AppID}_{群}` 兜底
    pub fn for_group(app_id: &str, group: impl fmt::Display) -> Self {
        Self(format!("{}_{}", app_id, group))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 拆出 mint 生成的 (AppID, s, 毫秒)，其他形式返回 None
    pub fn parts(&self) -> Option<(&str, u64, i64)> {
        let mut it = self.0.rsplitn(3, '_');
        let millis = it.next()?.parse().ok()?;
        let seq = it.next()?.parse().ok()?;
        let app_id = it.next()?;
        Some((app_id, seq, millis))
    }
}

impl fmt::Display for EchoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct EchoEntry {
    payload: String,
    at: DateTime<Local>,
}

/// echo token -> 触发原文 (或兜底时的平台消息 ID)。读取不会消费条目。
pub struct EchoCache {
    entries: DashMap<String, EchoEntry>,
    pruner: Pruner,
}

impl EchoCache {
    pub fn new(retention: Retention) -> Self {
        Self {
            entries: DashMap::new(),
            pruner: Pruner::new(retention),
        }
    }

    pub fn store(&self, token: &EchoToken, payload: impl Into<String>, at: DateTime<Local>) {
        self.entries.insert(
            token.0.clone(),
            EchoEntry {
                payload: payload.into(),
                at,
            },
        );
        self.pruner.sweep("echo", &self.entries, at, |e| e.at);
    }

    pub fn fetch(&self, token: &str) -> Option<String> {
        self.entries.get(token).map(|e| e.payload.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EchoCache {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}
