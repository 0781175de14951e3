use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

// ================== 入站事件 ==================

/// 平台附件
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Attachment {
    #[serde(default)]
    pub url: String,
}

/// 平台推送的群 @ 消息
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InboundMessage {
    /// 平台消息 ID
    pub id: String,
    #[serde(default)]
    pub author_id: String,
    pub group_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// 会话序号 (WebSocket s)
    #[serde(default)]
    pub seq: u64,
}

impl InboundMessage {
    /// 第一个附件的 URL (为空视为无)
    pub fn first_attachment_url(&self) -> Option<&str> {
        self.attachments
            .first()
            .map(|a| a.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

// ================== 出站记录 ==================

/// 上报中的 ID：整数映射模式下为数字，字符串模式下为平台原始 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ident {
    Int(i64),
    Str(String),
}

impl Ident {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Ident {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Group,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
        }
    }
}

/// message 字段：纯文本或消息段数组
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Text(String),
    Segments(Message),
}

#[derive(Debug, Clone, Serialize)]
pub struct Sender {
    pub user_id: i64,
    pub nickname: String,
    pub card: String,
    pub sex: String,
    pub age: i32,
    pub area: String,
    pub level: String,
    pub role: String,
}

impl Sender {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            nickname: String::new(),
            card: String::new(),
            sex: "0".to_string(),
            age: 0,
            area: "0".to_string(),
            level: "0".to_string(),
            role: "member".to_string(),
        }
    }
}

/// OneBot 群消息上报
#[derive(Debug, Clone, Serialize)]
pub struct OutboundRecord {
    pub time: i64,
    pub self_id: i64,
    pub post_type: String,
    pub message_type: MessageType,
    pub sub_type: String,
    pub message_id: Ident,
    pub group_id: Ident,
    pub user_id: Ident,
    pub raw_message: String,
    pub message: OutboundMessage,
    pub sender: Sender,

    // ---- 增强字段 (native_output 关闭时输出) ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_message_type: Option<MessageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_binded_group_id: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_binded_user_id: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_parses_with_missing_optional_fields() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"id":"m1","group_id":"g1","author_id":"u1"}"#).unwrap();
        assert_eq!(msg.seq, 0);
        assert!(msg.attachments.is_empty());
        assert_eq!(msg.first_attachment_url(), None);
    }

    #[test]
    fn empty_attachment_url_counts_as_none() {
        let msg = InboundMessage {
            attachments: vec![Attachment { url: String::new() }],
            ..Default::default()
        };
        assert_eq!(msg.first_attachment_url(), None);
    }

    #[test]
    fn ident_serializes_as_bare_value() {
        assert_eq!(serde_json::to_string(&Ident::Int(12)).unwrap(), "12");
        assert_eq!(serde_json::to_string(&Ident::from("g1")).unwrap(), "\"g1\"");
        assert_eq!(Ident::from("g1").as_int(), None);
    }
}
