//! 平台字符串 ID 与 OneBot 整数 ID 的持久化双向映射。
//!
//! 两种分配策略在启动时二选一，运行期间不会混用：
//! - 顺序分配：首次出现的 ID 取下一个未使用的整数，计数器由已落库的最大值恢复；
//! - 哈希派生：由平台 ID 的 MD5 截取得到，重启或换库后结果不变，冲突时加盐重哈希。
//!
//! 同一个平台 ID 的首次分配在进程内是原子的：并发解析同一个新 ID 只会分配一次。

use crate::config::BridgeConfig;
use crate::db::create_table;
use crate::error::{BridgeError, BridgeResult, StoreError};
use chrono::Local;
use dashmap::DashMap;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub mod entity;
pub mod hash;

use entity::{annotation, mapping, pair};

const META_KEY: &str = "__idmap__";
const META_STRATEGY: &str = "strategy";

/// ID 分配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    Sequential,
    Hashed,
    /// 群号+用户联合哈希
    HashedJoint,
}

impl IdStrategy {
    /// 根据配置选择策略。hash_ids_pro 缺少 hash_ids 时返回致命的配置错误。
    pub fn from_config(cfg: &BridgeConfig) -> BridgeResult<Self> {
        if cfg.hash_ids_pro && !cfg.hash_ids {
            return Err(BridgeError::Misconfigured(
                "开启了 hash_ids_pro 高级 ID 转换，请同时设置 hash_ids = true，删除 idmap 数据后重启"
                    .to_string(),
            ));
        }
        Ok(match (cfg.hash_ids, cfg.hash_ids_pro) {
            (true, true) => Self::HashedJoint,
            (true, false) => Self::Hashed,
            _ => Self::Sequential,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Hashed => "hashed",
            Self::HashedJoint => "hashed_joint",
        }
    }
}

/// 候选 ID 生成器
enum Allocator {
    Sequential(AtomicI64),
    Hashed,
}

impl Allocator {
    fn candidate(&self, input: &str, attempt: u32) -> Option<i64> {
        match self {
            Self::Sequential(next) => Some(next.fetch_add(1, Ordering::SeqCst)),
            Self::Hashed => (attempt < hash::MAX_REHASH).then(|| hash::derive(input, attempt)),
        }
    }
}

type Slot<T> = Arc<OnceCell<T>>;

pub struct IdMap {
    db: DatabaseConnection,
    strategy: IdStrategy,
    allocator: Allocator,
    // 每个平台 ID 一个槽位，保证首次分配只发生一次
    slots: DashMap<String, Slot<i64>>,
    pair_slots: DashMap<(String, String), Slot<i64>>,
    reverse: DashMap<i64, String>,
    pair_reverse: DashMap<i64, (String, String)>,
}

impl IdMap {
    /// 建表、校验库中记录的策略并恢复顺序计数器
    pub async fn open(db: DatabaseConnection, strategy: IdStrategy) -> BridgeResult<Self> {
        create_table(&db, mapping::Entity).await?;
        create_table(&db, pair::Entity).await?;
        create_table(&db, annotation::Entity).await?;

        match fetch_annotation(&db, META_KEY, META_STRATEGY).await? {
            Some(recorded) if recorded != strategy.as_str() => {
                return Err(BridgeError::Misconfigured(format!(
                    "idmap 数据由 {} 策略生成，与当前配置的 {} 不一致，请删除 idmap 数据后重启",
                    recorded,
                    strategy.as_str()
                )));
            }
            Some(_) => {}
            None => upsert_annotation(&db, META_KEY, META_STRATEGY, strategy.as_str()).await?,
        }

        let allocator = match strategy {
            IdStrategy::Sequential => {
                let next = mapping::Entity::find()
                    .order_by_desc(mapping::Column::StableId)
                    .one(&db)
                    .await?
                    .map(|m| m.stable_id + 1)
                    .unwrap_or(1);
                Allocator::Sequential(AtomicI64::new(next))
            }
            IdStrategy::Hashed | IdStrategy::HashedJoint => Allocator::Hashed,
        };

        info!(target: "IdMap", "ID 映射已就绪，策略: {}", strategy.as_str());

        Ok(Self {
            db,
            strategy,
            allocator,
            slots: DashMap::new(),
            pair_slots: DashMap::new(),
            reverse: DashMap::new(),
            pair_reverse: DashMap::new(),
        })
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    /// 获取平台 ID 对应的整数 ID，不存在则按当前策略分配并落库
    pub async fn resolve(&self, platform_id: &str) -> Result<i64, StoreError> {
        let slot = self.slots.entry(platform_id.to_string()).or_default().clone();
        let id = slot
            .get_or_try_init(|| self.load_or_allocate(platform_id))
            .await?;
        Ok(*id)
    }

    /// 联合哈希：群号按单参数映射，用户 ID 由 (群, 用户) 共同派生。
    /// 两个平台 ID 也会各自登记到单参数映射中，供只持有其一的调用方兜底。
    pub async fn resolve_joint(&self, group_id: &str, user_id: &str) -> Result<(i64, i64), StoreError> {
        if self.strategy != IdStrategy::HashedJoint {
            return Err(StoreError::Strategy(format!(
                "resolve_joint 需要 hashed_joint 策略，当前为 {}",
                self.strategy.as_str()
            )));
        }

        let stable_group = self.resolve(group_id).await?;
        self.resolve(user_id).await?;

        let slot = self
            .pair_slots
            .entry((group_id.to_string(), user_id.to_string()))
            .or_default()
            .clone();
        let stable_user = slot
            .get_or_try_init(|| self.load_or_allocate_pair(group_id, user_id, stable_group))
            .await?;

        Ok((stable_group, *stable_user))
    }

    /// 该映射是否经过确认绑定
    pub async fn is_bound(&self, platform_id: &str, stable_id: i64) -> bool {
        match mapping::Entity::find_by_id(platform_id.to_string())
            .one(&self.db)
            .await
        {
            Ok(Some(row)) => row.bound && row.stable_id == stable_id,
            Ok(None) => false,
            Err(e) => {
                warn!(target: "IdMap", "查询绑定状态失败 {}: {}", platform_id, e);
                false
            }
        }
    }

    /// 将已有映射标记为确认绑定，映射不存在时返回 false
    pub async fn confirm(&self, platform_id: &str, stable_id: i64) -> Result<bool, StoreError> {
        let res = mapping::Entity::update_many()
            .col_expr(mapping::Column::Bound, Expr::value(true))
            .filter(mapping::Column::PlatformId.eq(platform_id))
            .filter(mapping::Column::StableId.eq(stable_id))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// 整数 ID 反查平台 ID
    pub async fn platform_of(&self, stable_id: i64) -> Result<Option<String>, StoreError> {
        if let Some(hit) = self.reverse.get(&stable_id) {
            return Ok(Some(hit.value().clone()));
        }

        let row = mapping::Entity::find()
            .filter(mapping::Column::StableId.eq(stable_id))
            .one(&self.db)
            .await?;

        Ok(row.map(|r| {
            self.reverse.insert(r.stable_id, r.platform_id.clone());
            r.platform_id
        }))
    }

    /// 联合哈希的用户 ID 反查 (群, 用户)
    pub async fn pair_of(&self, stable_user: i64) -> Result<Option<(String, String)>, StoreError> {
        if let Some(hit) = self.pair_reverse.get(&stable_user) {
            return Ok(Some(hit.value().clone()));
        }

        let row = pair::Entity::find()
            .filter(pair::Column::StableUser.eq(stable_user))
            .one(&self.db)
            .await?;

        Ok(row.map(|r| {
            let key = (r.group_id, r.user_id);
            self.pair_reverse.insert(r.stable_user, key.clone());
            key
        }))
    }

    pub async fn write_annotation(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        upsert_annotation(&self.db, key, field, value).await?;
        Ok(())
    }

    pub async fn read_annotation(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(fetch_annotation(&self.db, key, field).await?)
    }

    async fn load_or_allocate(&self, platform_id: &str) -> Result<i64, StoreError> {
        if let Some(row) = mapping::Entity::find_by_id(platform_id.to_string())
            .one(&self.db)
            .await?
        {
            self.reverse.insert(row.stable_id, row.platform_id);
            return Ok(row.stable_id);
        }

        let stable_id = self.allocate(platform_id, platform_id).await?;

        mapping::Entity::insert(mapping::ActiveModel {
            platform_id: Set(platform_id.to_string()),
            stable_id: Set(stable_id),
            bound: Set(false),
            created_at: Set(Local::now().timestamp()),
        })
        .exec(&self.db)
        .await?;

        self.reverse.insert(stable_id, platform_id.to_string());
        debug!(target: "IdMap", "新映射 {} -> {}", platform_id, stable_id);
        Ok(stable_id)
    }

    async fn load_or_allocate_pair(
        &self,
        group_id: &str,
        user_id: &str,
        stable_group: i64,
    ) -> Result<i64, StoreError> {
        let key = (group_id.to_string(), user_id.to_string());
        if let Some(row) = pair::Entity::find_by_id(key.clone()).one(&self.db).await? {
            self.pair_reverse.insert(row.stable_user, key);
            return Ok(row.stable_user);
        }

        let stable_user = self
            .allocate(&hash::joint_key(group_id, user_id), user_id)
            .await?;

        pair::Entity::insert(pair::ActiveModel {
            group_id: Set(group_id.to_string()),
            user_id: Set(user_id.to_string()),
            stable_group: Set(stable_group),
            stable_user: Set(stable_user),
            created_at: Set(Local::now().timestamp()),
        })
        .exec(&self.db)
        .await?;

        self.pair_reverse.insert(stable_user, key);
        debug!(target: "IdMap", "新联合映射 ({}, {}) -> {}", group_id, user_id, stable_user);
        Ok(stable_user)
    }

    /// 取第一个未被占用的候选 ID
    async fn allocate(&self, input: &str, platform_id: &str) -> Result<i64, StoreError> {
        let mut attempt = 0;
        loop {
            let candidate = self.allocator.candidate(input, attempt).ok_or_else(|| {
                StoreError::HashExhausted {
                    platform_id: platform_id.to_string(),
                }
            })?;

            if !self.stable_taken(candidate).await? {
                return Ok(candidate);
            }

            if matches!(self.allocator, Allocator::Hashed) {
                warn!(
                    target: "IdMap",
                    "哈希 ID 冲突: {} -> {}，加盐重试 ({}/{})",
                    platform_id,
                    candidate,
                    attempt + 1,
                    hash::MAX_REHASH
                );
            }
            attempt += 1;
        }
    }

    async fn stable_taken(&self, stable_id: i64) -> Result<bool, StoreError> {
        if self.reverse.contains_key(&stable_id) || self.pair_reverse.contains_key(&stable_id) {
            return Ok(true);
        }

        let in_mappings = mapping::Entity::find()
            .filter(mapping::Column::StableId.eq(stable_id))
            .one(&self.db)
            .await?
            .is_some();
        if in_mappings {
            return Ok(true);
        }

        Ok(pair::Entity::find()
            .filter(pair::Column::StableUser.eq(stable_id))
            .one(&self.db)
            .await?
            .is_some())
    }
}

async fn fetch_annotation(
    db: &DatabaseConnection,
    key: &str,
    field: &str,
) -> Result<Option<String>, DbErr> {
    Ok(annotation::Entity::find_by_id((key.to_string(), field.to_string()))
        .one(db)
        .await?
        .map(|row| row.value))
}

async fn upsert_annotation(
    db: &DatabaseConnection,
    key: &str,
    field: &str,
    value: &str,
) -> Result<(), DbErr> {
    annotation::Entity::insert(annotation::ActiveModel {
        key: Set(key.to_string()),
        field: Set(field.to_string()),
        value: Set(value.to_string()),
    })
    .on_conflict(
        OnConflict::columns([annotation::Column::Key, annotation::Column::Field])
            .update_column(annotation::Column::Value)
            .to_owned(),
    )
    .exec(db)
    .await?;
    Ok(())
}
