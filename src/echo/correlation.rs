use super::{Pruner, Retention};
use crate::event::MessageType;
use chrono::{DateTime, Local};
use dashmap::DashMap;

/// 同一个入站事件会以多种键形式登记，应用端用哪种 ID 体系回复都能命中
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// AppID + 会话序号 s
    Seq { app_id: String, seq: u64 },
    Group { app_id: String, group_id: i64 },
    GroupUser { app_id: String, group_id: i64, user_id: i64 },
    PlatformGroup { app_id: String, group_id: String },
    PlatformGroupUser {
        app_id: String,
        group_id: String,
        user_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationEntry {
    pub message_id: String,
    pub at: DateTime<Local>,
}

/// 会话键 -> 最近一条平台消息 ID (后写覆盖)
pub struct CorrelationCache {
    entries: DashMap<SessionKey, CorrelationEntry>,
    types: DashMap<SessionKey, (MessageType, DateTime<Local>)>,
    entries_pruner: Pruner,
    types_pruner: Pruner,
}

impl CorrelationCache {
    pub fn new(retention: Retention) -> Self {
        Self {
            entries: DashMap::new(),
            types: DashMap::new(),
            entries_pruner: Pruner::new(retention),
            types_pruner: Pruner::new(retention),
        }
    }

    pub fn record(&self, key: SessionKey, message_id: &str, at: DateTime<Local>) {
        self.entries.insert(
            key,
            CorrelationEntry {
                message_id: message_id.to_string(),
                at,
            },
        );
        self.entries_pruner
            .sweep("correlation", &self.entries, at, |e| e.at);
    }

    pub fn lookup(&self, key: &SessionKey) -> Option<String> {
        self.entries.get(key).map(|e| e.message_id.clone())
    }

    pub fn entry(&self, key: &SessionKey) -> Option<CorrelationEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// 记录会话类型 (group / private ...)
    pub fn record_type(&self, key: SessionKey, message_type: MessageType, at: DateTime<Local>) {
        self.types.insert(key, (message_type, at));
        self.types_pruner.sweep("message_type", &self.types, at, |v| v.1);
    }

    pub fn message_type(&self, key: &SessionKey) -> Option<MessageType> {
        self.types.get(key).map(|v| v.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}
