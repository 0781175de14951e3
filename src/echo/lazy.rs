use super::{Pruner, Retention};
use chrono::{DateTime, Duration, Local};
use dashmap::DashMap;

/// 懒 message_id 池的键：群，或 群+用户
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolKey {
    Group(String),
    GroupUser(String, String),
}

impl PoolKey {
    pub fn group(group_id: impl ToString) -> Self {
        Self::Group(group_id.to_string())
    }

    pub fn group_user(group_id: impl ToString, user_id: impl ToString) -> Self {
        Self::GroupUser(group_id.to_string(), user_id.to_string())
    }
}

/// 每个键最近一条消息 ID。没有后台清扫，读取时才按有效期判断是否过期。
pub struct LazyMessageIdPool {
    entries: DashMap<PoolKey, (String, DateTime<Local>)>,
    pruner: Pruner,
}

impl LazyMessageIdPool {
    pub fn new(retention: Retention) -> Self {
        Self {
            entries: DashMap::new(),
            pruner: Pruner::new(retention),
        }
    }

    pub fn touch(&self, key: PoolKey, message_id: &str, at: DateTime<Local>) {
        self.entries.insert(key, (message_id.to_string(), at));
        self.pruner.sweep("lazy_pool", &self.entries, at, |v| v.1);
    }

    pub fn latest(&self, key: &PoolKey, max_age: Duration) -> Option<String> {
        self.latest_at(key, max_age, Local::now())
    }

    /// `now - 记录时间 <= max_age` 时返回记录的消息 ID
    pub fn latest_at(&self, key: &PoolKey, max_age: Duration, now: DateTime<Local>) -> Option<String> {
        let entry = self.entries.get(key)?;
        let (message_id, at) = entry.value();
        (now - *at <= max_age).then(|| message_id.clone())
    }
}

impl Default for LazyMessageIdPool {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}
