use super::{Pruner, Retention};
use crate::db::create_table;
use crate::error::StoreError;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use sea_orm::ActiveValue::Set;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::OnceCell;

mod entity {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "message_ids")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub platform_id: String,
        #[sea_orm(unique)]
        pub stable_id: i64,
        pub created_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// 平台消息 ID -> 整数 message_id
pub enum MessageIdCache {
    /// 仅内存，重启后丢失
    Memory(MemoryMessageIds),
    Persisted(PersistedMessageIds),
}

impl MessageIdCache {
    pub async fn open(
        in_memory: bool,
        db: &DatabaseConnection,
        retention: Retention,
    ) -> Result<Self, DbErr> {
        if in_memory {
            Ok(Self::Memory(MemoryMessageIds::new(retention)))
        } else {
            Ok(Self::Persisted(PersistedMessageIds::open(db.clone()).await?))
        }
    }

    pub async fn store(&self, platform_id: &str) -> Result<i64, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.store(platform_id)),
            Self::Persisted(p) => p.store(platform_id).await,
        }
    }

    pub async fn platform_of(&self, message_id: i64) -> Result<Option<String>, StoreError> {
        match self {
            Self::Memory(m) => Ok(m.platform_of(message_id)),
            Self::Persisted(p) => p.platform_of(message_id).await,
        }
    }
}

/// 按消息增长，受 Retention 约束
pub struct MemoryMessageIds {
    next: AtomicI64,
    forward: DashMap<String, (i64, DateTime<Local>)>,
    reverse: DashMap<i64, (String, DateTime<Local>)>,
    forward_pruner: Pruner,
    reverse_pruner: Pruner,
}

impl Default for MemoryMessageIds {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}

impl MemoryMessageIds {
    pub fn new(retention: Retention) -> Self {
        Self {
            next: AtomicI64::new(1),
            forward: DashMap::new(),
            reverse: DashMap::new(),
            forward_pruner: Pruner::new(retention),
            reverse_pruner: Pruner::new(retention),
        }
    }

    pub fn store(&self, platform_id: &str) -> i64 {
        self.store_at(platform_id, Local::now())
    }

    pub fn store_at(&self, platform_id: &str, at: DateTime<Local>) -> i64 {
        let id = {
            let mut entry = self
                .forward
                .entry(platform_id.to_string())
                .or_insert_with(|| (self.next.fetch_add(1, Ordering::SeqCst), at));
            entry.1 = at;
            entry.0
        };
        self.reverse.insert(id, (platform_id.to_string(), at));

        self.forward_pruner
            .sweep("message_ids", &self.forward, at, |v| v.1);
        self.reverse_pruner
            .sweep("message_ids_rev", &self.reverse, at, |v| v.1);
        id
    }

    pub fn platform_of(&self, message_id: i64) -> Option<String> {
        self.reverse.get(&message_id).map(|v| v.0.clone())
    }
}

pub struct PersistedMessageIds {
    db: DatabaseConnection,
    next: AtomicI64,
    slots: DashMap<String, Arc<OnceCell<i64>>>,
}

impl PersistedMessageIds {
    pub async fn open(db: DatabaseConnection) -> Result<Self, DbErr> {
        create_table(&db, entity::Entity).await?;

        let next = entity::Entity::find()
            .order_by_desc(entity::Column::StableId)
            .one(&db)
            .await?
            .map(|m| m.stable_id + 1)
            .unwrap_or(1);

        Ok(Self {
            db,
            next: AtomicI64::new(next),
            slots: DashMap::new(),
        })
    }

    pub async fn store(&self, platform_id: &str) -> Result<i64, StoreError> {
        let slot = self.slots.entry(platform_id.to_string()).or_default().clone();
        let id = slot
            .get_or_try_init(|| self.load_or_insert(platform_id))
            .await
            .copied();
        // 数据库已有记录，槽位只用于首次写入期间的互斥
        self.slots.remove_if(platform_id, |_, cell| cell.initialized());
        Ok(id?)
    }

    pub async fn platform_of(&self, message_id: i64) -> Result<Option<String>, StoreError> {
        Ok(entity::Entity::find()
            .filter(entity::Column::StableId.eq(message_id))
            .one(&self.db)
            .await?
            .map(|row| row.platform_id))
    }

    async fn load_or_insert(&self, platform_id: &str) -> Result<i64, StoreError> {
        if let Some(row) = entity::Entity::find_by_id(platform_id.to_string())
            .one(&self.db)
            .await?
        {
            return Ok(row.stable_id);
        }

        let stable_id = self.next.fetch_add(1, Ordering::SeqCst);
        entity::Entity::insert(entity::ActiveModel {
            platform_id: Set(platform_id.to_string()),
            stable_id: Set(stable_id),
            created_at: Set(Local::now().timestamp()),
        })
        .exec(&self.db)
        .await?;
        Ok(stable_id)
    }
}
