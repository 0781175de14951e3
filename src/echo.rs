//! 入站事件的关联缓存：会话键 -> 平台消息 ID、echo token -> 原文、懒 message_id 池、
//! 以及平台消息 ID 的整数化缓存。
//!
//! 除 message_id 的持久化实现外都只在内存中，丢失只影响正在进行的回复关联。

use crate::config::BridgeConfig;
use chrono::{DateTime, Duration, Local};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

pub mod correlation;
pub mod lazy;
pub mod msgid;
pub mod token;

pub use correlation::{CorrelationCache, CorrelationEntry, SessionKey};
pub use lazy::{LazyMessageIdPool, PoolKey};
pub use msgid::MessageIdCache;
pub use token::{EchoCache, EchoToken};

/// 缓存的软上限：插入后超过容量时，清理早于保留时长的条目
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub capacity: usize,
    pub max_age: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            max_age: Duration::hours(1),
        }
    }
}

impl Retention {
    /// 保留时长不短于懒 message_id 的有效期，避免清掉仍然新鲜的条目
    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self {
            capacity: cfg.cache_capacity,
            max_age: cfg.retention().max(cfg.lazy_window()),
        }
    }
}

/// 两次全表清理的最短间隔
const SWEEP_INTERVAL_MS: i64 = 30_000;

/// 每个 DashMap 配一个：超过容量时最多每个间隔清理一次，
/// 条目都还新鲜时不会每次插入都扫全表
pub(crate) struct Pruner {
    retention: Retention,
    last_sweep: AtomicI64,
}

impl Pruner {
    pub(crate) fn new(retention: Retention) -> Self {
        Self {
            retention,
            last_sweep: AtomicI64::new(i64::MIN),
        }
    }

    /// 返回本次是否执行了清理
    pub(crate) fn sweep<K, V>(
        &self,
        name: &str,
        map: &DashMap<K, V>,
        now: DateTime<Local>,
        stamp: impl Fn(&V) -> DateTime<Local>,
    ) -> bool
    where
        K: Eq + Hash,
    {
        if map.len() <= self.retention.capacity {
            return false;
        }

        let now_ms = now.timestamp_millis();
        let last = self.last_sweep.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < SWEEP_INTERVAL_MS {
            return false;
        }
        // 并发插入时只有一个调用方执行清理
        if self
            .last_sweep
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // 保留时长超出可表示的时间范围时没有可清理的条目
        let Some(cutoff) = now.checked_sub_signed(self.retention.max_age) else {
            return true;
        };
        let before = map.len();
        map.retain(|_, v| stamp(v) >= cutoff);
        debug!(target: "Echo", "{} 清理过期条目 {} -> {}", name, before, map.len());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Retention {
        Retention {
            capacity: 2,
            max_age: Duration::seconds(10),
        }
    }

    #[test]
    fn sweep_only_runs_over_capacity() {
        let pruner = Pruner::new(small());
        let now = Local::now();
        let map: DashMap<u32, DateTime<Local>> = DashMap::new();
        map.insert(1, now - Duration::seconds(60));
        map.insert(2, now);

        assert!(!pruner.sweep("t", &map, now, |at| *at));
        assert_eq!(map.len(), 2);

        map.insert(3, now - Duration::seconds(5));
        assert!(pruner.sweep("t", &map, now, |at| *at));
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&2) && map.contains_key(&3));
    }

    #[test]
    fn fresh_entries_over_capacity_do_not_rescan_every_insert() {
        let pruner = Pruner::new(small());
        let now = Local::now();
        let map: DashMap<u32, DateTime<Local>> = DashMap::new();
        for i in 0..3 {
            map.insert(i, now);
        }
        assert!(pruner.sweep("t", &map, now, |at| *at));
        assert_eq!(map.len(), 3);

        for i in 3..1000 {
            map.insert(i, now);
            assert!(!pruner.sweep("t", &map, now + Duration::milliseconds(i as i64), |at| *at));
        }

        let later = now + Duration::milliseconds(SWEEP_INTERVAL_MS);
        assert!(pruner.sweep("t", &map, later, |at| *at));
        assert_eq!(map.len(), 1000);
    }

    #[test]
    fn huge_retention_does_not_overflow() {
        let cfg = BridgeConfig {
            lazy_message_id_secs: u64::MAX,
            cache_capacity: 0,
            ..Default::default()
        };
        let pruner = Pruner::new(Retention::from_config(&cfg));
        let map: DashMap<u32, DateTime<Local>> = DashMap::new();
        map.insert(1, Local::now());

        assert!(pruner.sweep("t", &map, Local::now(), |at| *at));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn retention_never_undercuts_lazy_window() {
        let cfg = BridgeConfig {
            lazy_message_id_secs: 7200,
            cache_retention_secs: 60,
            ..Default::default()
        };
        assert_eq!(Retention::from_config(&cfg).max_age, Duration::seconds(7200));
    }
}
