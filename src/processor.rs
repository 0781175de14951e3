//! 群消息转换：平台事件 -> ID 映射 -> 关联缓存 -> OneBot 上报。
//!
//! 每个事件独立处理，失败只丢弃该事件；唯一会终止进程的是构造阶段的配置错误。

use crate::config::BridgeConfig;
use crate::echo::{
    CorrelationCache, EchoCache, EchoToken, LazyMessageIdPool, MessageIdCache, PoolKey, Retention,
    SessionKey,
};
use crate::error::{BridgeError, BridgeResult};
use crate::event::{Ident, InboundMessage, MessageType, OutboundMessage, OutboundRecord, Sender};
use crate::idmap::{IdMap, IdStrategy};
use crate::message;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 上报投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// 广播并等待应用端返回
    Awaited,
    /// 发出即返回 (性能模式)
    FireAndForget,
}

/// 上报出口，由外部的广播层实现
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, record: OutboundRecord, mode: DeliveryMode) -> BridgeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    EmptyAuthor,
    IdResolution,
    MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Discarded(DiscardReason),
    Dispatched,
}

/// 回复定位结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub group_id: String,
    pub message_id: Option<String>,
}

/// 进程内共享的全部存储，启动时构造一次
pub struct Stores {
    pub idmap: IdMap,
    pub correlation: CorrelationCache,
    pub echo: EchoCache,
    pub lazy: LazyMessageIdPool,
    pub message_ids: MessageIdCache,
}

impl Stores {
    /// 按配置打开全部存储；配置错误在此返回，早于任何事件
    pub async fn open(cfg: &BridgeConfig, db: DatabaseConnection) -> BridgeResult<Self> {
        let strategy = IdStrategy::from_config(cfg)?;
        let retention = Retention::from_config(cfg);

        Ok(Self {
            idmap: IdMap::open(db.clone(), strategy).await?,
            correlation: CorrelationCache::new(retention),
            echo: EchoCache::new(retention),
            lazy: LazyMessageIdPool::new(retention),
            message_ids: MessageIdCache::open(cfg.memory_message_ids, &db, retention).await?,
        })
    }
}

pub struct Processor {
    config: Arc<BridgeConfig>,
    stores: Arc<Stores>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Processor {
    pub fn new(
        config: BridgeConfig,
        stores: Arc<Stores>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> BridgeResult<Self> {
        let strategy = IdStrategy::from_config(&config)?;
        if strategy != stores.idmap.strategy() {
            return Err(BridgeError::Misconfigured(format!(
                "配置的 ID 策略 {} 与已打开的存储 {} 不一致",
                strategy.as_str(),
                stores.idmap.strategy().as_str()
            )));
        }

        Ok(Self {
            config: Arc::new(config),
            stores,
            dispatcher,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// 处理事件并记录失败，供适配器放进独立任务
    pub async fn handle(&self, msg: InboundMessage) {
        if let Err(e) = self.process_group_message(msg).await {
            error!(target: "Processor", "事件处理失败: {}", e);
        }
    }

    /// 处理一条群消息
    pub async fn process_group_message(&self, msg: InboundMessage) -> BridgeResult<Outcome> {
        if msg.author_id.is_empty() {
            warn!(target: "Processor", "消息 {} 的发送者 ID 为空，已丢弃", msg.id);
            return Ok(Outcome::Discarded(DiscardReason::EmptyAuthor));
        }

        let cfg = &self.config;
        let stores = &self.stores;
        let now = Local::now();
        let app_id = cfg.app_id_str();

        // 1. ID 映射 (字符串模式跳过)
        let ids = if cfg.raw_string_ids {
            None
        } else {
            match self.resolve_ids(&msg).await {
                Ok(ids) => Some(ids),
                Err(e) => {
                    error!(target: "Processor", "ID 映射失败，丢弃消息 {}: {}", msg.id, e);
                    return Ok(Outcome::Discarded(DiscardReason::IdResolution));
                }
            }
        };

        let message_id = match ids {
            None => Ident::Str(msg.id.clone()),
            Some(_) => match stores.message_ids.store(&msg.id).await {
                Ok(id) => Ident::Int(id),
                Err(e) => {
                    error!(target: "Processor", "message_id 映射失败，丢弃消息 {}: {}", msg.id, e);
                    return Ok(Outcome::Discarded(DiscardReason::MessageId));
                }
            },
        };

        // 联合哈希下应用端参数不全时按群兜底
        if ids.is_some() && stores.idmap.strategy() == IdStrategy::HashedJoint {
            stores.echo.store(
                &EchoToken::for_group(&app_id, &msg.group_id),
                msg.id.as_str(),
                now,
            );
        }

        // 2. 关联缓存
        self.record_correlation(&msg, ids, &app_id, now).await;

        // 3. 文本
        let mut text = message::normalize(&msg.content, cfg.remove_prefix);
        if cfg.add_at_group {
            text = message::with_at_prefix(&text, &app_id);
        }

        let mut record = self.build_record(&msg, ids, message_id, &text, now).await;

        // 4. 双向 echo：应用端 send_msg 带回 echo 时可取回触发原文
        if cfg.two_way_echo {
            let token = EchoToken::mint(&app_id, msg.seq, now);
            stores.echo.store(&token, text.as_str(), now);
            record.echo = Some(token.to_string());
        }

        let mode = if cfg.performance_mode {
            DeliveryMode::FireAndForget
        } else {
            DeliveryMode::Awaited
        };

        debug!(target: "Processor", "上报群消息 {} -> {:?}", msg.id, record.message_id);
        self.dispatcher.dispatch(record, mode).await?;
        Ok(Outcome::Dispatched)
    }

    async fn resolve_ids(&self, msg: &InboundMessage) -> BridgeResult<(i64, i64)> {
        let idmap = &self.stores.idmap;

        if idmap.strategy() == IdStrategy::HashedJoint {
            return Ok(idmap.resolve_joint(&msg.group_id, &msg.author_id).await?);
        }

        let group_id = idmap.resolve(&msg.group_id).await?;
        let user_id = idmap.resolve(&msg.author_id).await?;
        Ok((group_id, user_id))
    }

    async fn record_correlation(
        &self,
        msg: &InboundMessage,
        ids: Option<(i64, i64)>,
        app_id: &str,
        now: DateTime<Local>,
    ) {
        let stores = &self.stores;
        let correlation = &stores.correlation;

        let seq_key = SessionKey::Seq {
            app_id: app_id.to_string(),
            seq: msg.seq,
        };
        correlation.record(seq_key.clone(), &msg.id, now);
        correlation.record_type(seq_key, MessageType::Group, now);
        correlation.record(
            SessionKey::PlatformGroup {
                app_id: app_id.to_string(),
                group_id: msg.group_id.clone(),
            },
            &msg.id,
            now,
        );
        correlation.record(
            SessionKey::PlatformGroupUser {
                app_id: app_id.to_string(),
                group_id: msg.group_id.clone(),
                user_id: msg.author_id.clone(),
            },
            &msg.id,
            now,
        );

        let platform_pool = |pool: &LazyMessageIdPool| {
            pool.touch(PoolKey::group(&msg.group_id), &msg.id, now);
            pool.touch(PoolKey::group_user(&msg.group_id, &msg.author_id), &msg.id, now);
        };

        let annotation_key = match ids {
            Some((group_id, user_id)) => {
                let group_key = SessionKey::Group {
                    app_id: app_id.to_string(),
                    group_id,
                };
                correlation.record(group_key.clone(), &msg.id, now);
                correlation.record_type(group_key, MessageType::Group, now);
                correlation.record(
                    SessionKey::GroupUser {
                        app_id: app_id.to_string(),
                        group_id,
                        user_id,
                    },
                    &msg.id,
                    now,
                );

                stores.lazy.touch(PoolKey::group(group_id), &msg.id, now);
                stores
                    .lazy
                    .touch(PoolKey::group_user(group_id, user_id), &msg.id, now);
                // 应用端可能以字符串 ID 调用 action
                if self.config.string_action {
                    platform_pool(&stores.lazy);
                }
                group_id.to_string()
            }
            None => {
                platform_pool(&stores.lazy);
                msg.group_id.clone()
            }
        };

        // 会话类型标注失败不影响上报
        if let Err(e) = stores
            .idmap
            .write_annotation(&annotation_key, "type", MessageType::Group.as_str())
            .await
        {
            warn!(target: "Processor", "写入群类型失败 {}: {}", annotation_key, e);
        }
    }

    async fn build_record(
        &self,
        msg: &InboundMessage,
        ids: Option<(i64, i64)>,
        message_id: Ident,
        text: &str,
        now: DateTime<Local>,
    ) -> OutboundRecord {
        let cfg = &self.config;
        let idmap = &self.stores.idmap;

        let (group_id, user_id, sender_uid) = match ids {
            Some((g, u)) => (Ident::Int(g), Ident::Int(u), u),
            None => (
                Ident::Str(msg.group_id.clone()),
                Ident::Str(msg.author_id.clone()),
                0,
            ),
        };

        // 带附件时自动确认发送者的绑定
        if ids.is_some() && cfg.auto_bind && msg.first_attachment_url().is_some() {
            self.auto_bind(&msg.author_id).await;
        }

        let binding = match ids {
            Some((g, u)) if !cfg.native_output => Some((
                idmap.is_bound(&msg.group_id, g).await,
                self.author_bound(&msg.author_id, u).await,
            )),
            _ => None,
        };

        let mut sender = Sender::new(sender_uid);
        if ids.is_none() {
            // 字符串模式下 area 携带首个图片地址
            sender.area = msg.first_attachment_url().unwrap_or_default().to_string();
        }
        if !cfg.card_and_nick.is_empty() {
            sender.nickname = cfg.card_and_nick.clone();
            sender.card = cfg.card_and_nick.clone();
        }
        sender.role = if cfg.is_master(&user_id.to_string()) {
            "owner".to_string()
        } else {
            "member".to_string()
        };

        let message = if cfg.array_output {
            OutboundMessage::Segments(message::segmented(text, &msg.attachments))
        } else {
            OutboundMessage::Text(text.to_string())
        };

        let enhanced = !cfg.native_output;
        OutboundRecord {
            time: now.timestamp(),
            self_id: cfg.self_id(),
            post_type: "message".to_string(),
            message_type: MessageType::Group,
            sub_type: "normal".to_string(),
            message_id,
            group_id,
            user_id,
            raw_message: text.to_string(),
            message,
            sender,
            real_message_type: enhanced.then_some(MessageType::Group),
            real_group_id: enhanced.then(|| msg.group_id.clone()),
            real_user_id: enhanced.then(|| msg.author_id.clone()),
            is_binded_group_id: binding.map(|b| b.0),
            is_binded_user_id: binding.map(|b| b.1),
            avatar: enhanced.then(|| avatar_url(&cfg.app_id_str(), &msg.author_id)),
            echo: None,
        }
    }

    async fn auto_bind(&self, author_id: &str) {
        let idmap = &self.stores.idmap;
        match idmap.resolve(author_id).await {
            Ok(id) => {
                if let Err(e) = idmap.confirm(author_id, id).await {
                    warn!(target: "Processor", "自动绑定 {} 失败: {}", author_id, e);
                }
            }
            Err(e) => warn!(target: "Processor", "自动绑定 {} 失败: {}", author_id, e),
        }
    }

    /// 联合哈希下用户 ID 不在单参数映射里，改查其单参数映射的绑定状态
    async fn author_bound(&self, author_id: &str, user_id: i64) -> bool {
        let idmap = &self.stores.idmap;
        if idmap.strategy() != IdStrategy::HashedJoint {
            return idmap.is_bound(author_id, user_id).await;
        }
        match idmap.resolve(author_id).await {
            Ok(single) => idmap.is_bound(author_id, single).await,
            Err(_) => false,
        }
    }

    // ================== 回复侧查询 ==================

    /// 双向 echo 取回触发原文
    pub fn trigger_text(&self, echo: &str) -> Option<String> {
        self.stores.echo.fetch(echo)
    }

    /// 由应用端 send_msg 的群/用户定位平台群 ID 和应回复的消息 ID。
    /// 依次查 群+用户、群 的关联 (有效期内)、懒 message_id 池、按群兜底的 echo。
    pub async fn reply_context(
        &self,
        group: &Ident,
        user: Option<&Ident>,
    ) -> BridgeResult<Option<ReplyContext>> {
        let app_id = self.config.app_id_str();
        let stores = &self.stores;

        let (platform_group, session_keys, pool_keys) = match group {
            Ident::Str(gid) => {
                let mut keys = Vec::new();
                let mut pools = Vec::new();
                if let Some(uid) = user {
                    keys.push(SessionKey::PlatformGroupUser {
                        app_id: app_id.clone(),
                        group_id: gid.clone(),
                        user_id: uid.to_string(),
                    });
                    pools.push(PoolKey::group_user(gid, uid));
                }
                keys.push(SessionKey::PlatformGroup {
                    app_id: app_id.clone(),
                    group_id: gid.clone(),
                });
                pools.push(PoolKey::group(gid));
                (gid.clone(), keys, pools)
            }
            Ident::Int(gid) => {
                let Some(platform_group) = stores.idmap.platform_of(*gid).await? else {
                    return Ok(None);
                };
                let mut keys = Vec::new();
                let mut pools = Vec::new();
                if let Some(uid) = user.and_then(Ident::as_int) {
                    keys.push(SessionKey::GroupUser {
                        app_id: app_id.clone(),
                        group_id: *gid,
                        user_id: uid,
                    });
                    pools.push(PoolKey::group_user(gid, uid));
                }
                keys.push(SessionKey::Group {
                    app_id: app_id.clone(),
                    group_id: *gid,
                });
                pools.push(PoolKey::group(gid));
                (platform_group, keys, pools)
            }
        };

        let now = Local::now();
        let window = self.config.lazy_window();

        let message_id = session_keys
            .iter()
            .filter_map(|k| stores.correlation.entry(k))
            .find(|e| now - e.at <= window)
            .map(|e| e.message_id)
            .or_else(|| {
                pool_keys
                    .iter()
                    .find_map(|k| stores.lazy.latest_at(k, window, now))
            })
            .or_else(|| {
                stores
                    .echo
                    .fetch(EchoToken::for_group(&app_id, &platform_group).as_str())
            });

        Ok(Some(ReplyContext {
            group_id: platform_group,
            message_id,
        }))
    }
}

fn avatar_url(app_id: &str, user_id: &str) -> String {
    format!("https://q.qlogo.cn/qqapp/{}/{}/640", app_id, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sea_orm::ConnectionTrait;
    use crate::event::Attachment;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(OutboundRecord, DeliveryMode)>>,
    }

    #[async_trait]
    impl Dispatcher for Recorder {
        async fn dispatch(&self, record: OutboundRecord, mode: DeliveryMode) -> BridgeResult<()> {
            self.sent.lock().await.push((record, mode));
            Ok(())
        }
    }

    async fn setup(cfg: BridgeConfig) -> (Processor, Arc<Recorder>) {
        let stores = Arc::new(Stores::open(&cfg, db::memory().await).await.unwrap());
        let recorder = Arc::new(Recorder::default());
        let processor = Processor::new(cfg, stores, recorder.clone()).unwrap();
        (processor, recorder)
    }

    fn hello() -> InboundMessage {
        InboundMessage {
            id: "m789".into(),
            author_id: "u123".into(),
            group_id: "g456".into(),
            content: "/hello".into(),
            attachments: Vec::new(),
            seq: 7,
        }
    }

    fn base_config() -> BridgeConfig {
        BridgeConfig {
            app_id: 102,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sequential_two_way_echo_end_to_end() {
        let (processor, recorder) = setup(BridgeConfig {
            two_way_echo: true,
            ..base_config()
        })
        .await;
        let stores = processor.stores();
        let known = stores.idmap.resolve("earlier").await.unwrap();

        let outcome = processor.process_group_message(hello()).await.unwrap();
        assert_eq!(outcome, Outcome::Dispatched);

        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let (record, mode) = &sent[0];
        assert_eq!(*mode, DeliveryMode::Awaited);
        assert_eq!(record.message_type, MessageType::Group);

        let gid = record.group_id.as_int().unwrap();
        let uid = record.user_id.as_int().unwrap();
        assert_ne!(gid, uid);
        assert!(gid != known && uid != known);
        assert_eq!(stores.idmap.platform_of(gid).await.unwrap().as_deref(), Some("g456"));

        let group_key = SessionKey::Group {
            app_id: "102".into(),
            group_id: gid,
        };
        assert_eq!(stores.correlation.lookup(&group_key).as_deref(), Some("m789"));
        assert_eq!(
            stores.correlation.message_type(&group_key),
            Some(MessageType::Group)
        );

        let echo = record.echo.clone().unwrap();
        let token = EchoToken::from_raw(echo.clone());
        let (app, seq, _millis) = token.parts().unwrap();
        assert_eq!((app, seq), ("102", 7));
        assert_eq!(processor.trigger_text(&echo).as_deref(), Some("/hello"));

        assert_eq!(
            stores
                .idmap
                .read_annotation(&gid.to_string(), "type")
                .await
                .unwrap()
                .as_deref(),
            Some("group")
        );
        assert_eq!(record.real_group_id.as_deref(), Some("g456"));
        assert_eq!(record.is_binded_user_id, Some(false));
    }

    #[tokio::test]
    async fn empty_author_is_dropped_without_side_effects() {
        let (processor, recorder) = setup(BridgeConfig {
            two_way_echo: true,
            ..base_config()
        })
        .await;
        let msg = InboundMessage {
            author_id: String::new(),
            ..hello()
        };

        let outcome = processor.process_group_message(msg).await.unwrap();
        assert_eq!(outcome, Outcome::Discarded(DiscardReason::EmptyAuthor));

        let stores = processor.stores();
        assert!(recorder.sent.lock().await.is_empty());
        assert!(stores.correlation.is_empty());
        assert!(stores.echo.is_empty());
        assert_eq!(stores.idmap.platform_of(1).await.unwrap(), None);
        assert_eq!(stores.idmap.read_annotation("g456", "type").await.unwrap(), None);
        assert_eq!(
            stores
                .lazy
                .latest(&PoolKey::group("g456"), chrono::Duration::hours(1)),
            None
        );
        assert_eq!(stores.message_ids.platform_of(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn message_id_failure_leaves_no_group_fallback() {
        let cfg = BridgeConfig {
            hash_ids: true,
            hash_ids_pro: true,
            ..base_config()
        };
        let conn = db::memory().await;
        let stores = Arc::new(Stores::open(&cfg, conn.clone()).await.unwrap());
        let recorder = Arc::new(Recorder::default());
        let processor = Processor::new(cfg, stores, recorder.clone()).unwrap();

        conn.execute_unprepared("DROP TABLE message_ids").await.unwrap();

        let outcome = processor.process_group_message(hello()).await.unwrap();
        assert_eq!(outcome, Outcome::Discarded(DiscardReason::MessageId));

        let stores = processor.stores();
        assert!(stores.echo.is_empty());
        assert!(stores.correlation.is_empty());
        assert!(recorder.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn joint_hash_without_companion_flag_refuses_to_start() {
        let bad = BridgeConfig {
            hash_ids_pro: true,
            ..base_config()
        };
        let err = Stores::open(&bad, db::memory().await).await.err().unwrap();
        assert!(err.is_fatal());

        let stores = Arc::new(Stores::open(&base_config(), db::memory().await).await.unwrap());
        let err = Processor::new(bad, stores, Arc::new(Recorder::default()))
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn processor_rejects_store_opened_with_other_strategy() {
        let stores = Arc::new(Stores::open(&base_config(), db::memory().await).await.unwrap());
        let hashed = BridgeConfig {
            hash_ids: true,
            ..base_config()
        };
        assert!(
            Processor::new(hashed, stores, Arc::new(Recorder::default()))
                .err()
                .unwrap()
                .is_fatal()
        );
    }

    #[tokio::test]
    async fn raw_string_mode_keeps_platform_ids() {
        let (processor, recorder) = setup(BridgeConfig {
            raw_string_ids: true,
            ..base_config()
        })
        .await;
        let msg = InboundMessage {
            attachments: vec![Attachment {
                url: "https://img/a.png".into(),
            }],
            ..hello()
        };
        processor.process_group_message(msg).await.unwrap();

        let sent = recorder.sent.lock().await;
        let (record, _) = &sent[0];
        assert_eq!(record.group_id, Ident::from("g456"));
        assert_eq!(record.user_id, Ident::from("u123"));
        assert_eq!(record.message_id, Ident::from("m789"));
        assert_eq!(record.sender.area, "https://img/a.png");
        assert_eq!(record.is_binded_group_id, None);

        let stores = processor.stores();
        assert_eq!(stores.idmap.platform_of(1).await.unwrap(), None);
        assert_eq!(
            stores
                .lazy
                .latest(&PoolKey::group("g456"), chrono::Duration::seconds(60))
                .as_deref(),
            Some("m789")
        );
        assert_eq!(
            stores.idmap.read_annotation("g456", "type").await.unwrap().as_deref(),
            Some("group")
        );
    }

    #[tokio::test]
    async fn joint_mode_reports_pair_ids_and_group_fallback() {
        let (processor, recorder) = setup(BridgeConfig {
            hash_ids: true,
            hash_ids_pro: true,
            ..base_config()
        })
        .await;
        processor.process_group_message(hello()).await.unwrap();

        let stores = processor.stores();
        let (gid, uid) = stores.idmap.resolve_joint("g456", "u123").await.unwrap();
        {
            let sent = recorder.sent.lock().await;
            assert_eq!(sent[0].0.group_id, Ident::Int(gid));
            assert_eq!(sent[0].0.user_id, Ident::Int(uid));
        }

        let fallback = EchoToken::for_group("102", "g456");
        assert_eq!(stores.echo.fetch(fallback.as_str()).as_deref(), Some("m789"));
        assert_eq!(
            stores.idmap.pair_of(uid).await.unwrap(),
            Some(("g456".to_string(), "u123".to_string()))
        );
    }

    #[tokio::test]
    async fn reply_context_finds_latest_message() {
        let (processor, recorder) = setup(base_config()).await;
        processor.process_group_message(hello()).await.unwrap();
        processor
            .process_group_message(InboundMessage {
                id: "m790".into(),
                author_id: "u999".into(),
                seq: 8,
                ..hello()
            })
            .await
            .unwrap();

        let (gid, first_uid) = {
            let sent = recorder.sent.lock().await;
            (sent[0].0.group_id.clone(), sent[0].0.user_id.clone())
        };

        let by_user = processor
            .reply_context(&gid, Some(&first_uid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            by_user,
            ReplyContext {
                group_id: "g456".into(),
                message_id: Some("m789".into()),
            }
        );

        let by_group = processor.reply_context(&gid, None).await.unwrap().unwrap();
        assert_eq!(by_group.message_id.as_deref(), Some("m790"));

        assert_eq!(processor.reply_context(&Ident::Int(424242), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn options_shape_the_record() {
        let (processor, recorder) = setup(BridgeConfig {
            performance_mode: true,
            native_output: true,
            array_output: true,
            remove_prefix: true,
            add_at_group: true,
            card_and_nick: "bot-user".into(),
            self_id: Some(10001),
            master_ids: vec!["2".into()],
            ..base_config()
        })
        .await;
        processor.process_group_message(hello()).await.unwrap();

        let sent = recorder.sent.lock().await;
        let (record, mode) = &sent[0];
        assert_eq!(*mode, DeliveryMode::FireAndForget);
        assert_eq!(record.self_id, 10001);
        assert_eq!(record.raw_message, "[CQ:at,qq=102] hello");
        assert!(matches!(record.message, OutboundMessage::Segments(_)));
        assert_eq!(record.sender.nickname, "bot-user");
        // 顺序分配：群 1，用户 2
        assert_eq!(record.user_id, Ident::Int(2));
        assert_eq!(record.sender.role, "owner");
        assert!(record.real_group_id.is_none() && record.avatar.is_none());
        assert!(record.echo.is_none());
    }

    #[tokio::test]
    async fn attachment_auto_binds_author() {
        let (processor, recorder) = setup(BridgeConfig {
            auto_bind: true,
            ..base_config()
        })
        .await;
        let msg = InboundMessage {
            attachments: vec![Attachment {
                url: "https://img/a.png".into(),
            }],
            ..hello()
        };
        processor.process_group_message(msg).await.unwrap();

        let sent = recorder.sent.lock().await;
        assert_eq!(sent[0].0.is_binded_user_id, Some(true));
        assert_eq!(sent[0].0.is_binded_group_id, Some(false));
    }

    #[tokio::test]
    async fn concurrent_events_share_one_mapping() {
        let (processor, recorder) = setup(base_config()).await;
        let processor = Arc::new(processor);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8u64 {
            let processor = processor.clone();
            tasks.spawn(async move {
                processor
                    .handle(InboundMessage {
                        id: format!("m{}", i),
                        seq: i,
                        ..hello()
                    })
                    .await
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        let sent = recorder.sent.lock().await;
        assert_eq!(sent.len(), 8);
        assert!(sent.iter().all(|(r, _)| r.group_id == sent[0].0.group_id));
        assert!(sent.iter().all(|(r, _)| r.user_id == sent[0].0.user_id));
    }
}
