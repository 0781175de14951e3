use crate::event::Attachment;
use serde::Serialize;
use serde_json::{Map, Value};

/// 消息段 (Segment)
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: Map<String, Value>,
}

impl Segment {
    pub fn new(type_: &str, data: Map<String, Value>) -> Self {
        Self {
            type_: type_.to_string(),
            data,
        }
    }
}

/// 消息链 (Message Chain)
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct Message(Vec<Segment>);

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, type_: &str, data: Map<String, Value>) -> Self {
        self.0.push(Segment::new(type_, data));
        self
    }

    /// 纯文本
    pub fn text(self, text: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("text".into(), Value::from(text.into()));
        self.add("text", data)
    }

    /// 图片
    /// - `file`: 图片 URL
    pub fn image(self, file: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("file".into(), Value::from(file.into()));
        self.add("image", data)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }
}

/// 由文本和附件构造消息段数组
pub fn segmented(text: &str, attachments: &[Attachment]) -> Message {
    let mut msg = Message::new();
    if !text.is_empty() {
        msg = msg.text(text);
    }
    for att in attachments.iter().filter(|a| !a.url.is_empty()) {
        msg = msg.image(att.url.clone());
    }
    msg
}

/// 规范化平台文本：单独的 "/" 视为空白，去除首尾空白，可选移除第一个 "/"
pub fn normalize(content: &str, remove_prefix: bool) -> String {
    let text = match content {
        "/ " | " / " => " ",
        other => other,
    };
    let mut text = text.trim().to_string();

    if remove_prefix && let Some(idx) = text.find('/') {
        text.remove(idx);
    }
    text
}

/// 群消息没有 at 时补一个指向机器人的 CQ 码
pub fn with_at_prefix(text: &str, app_id: &str) -> String {
    format!("[CQ:at,qq={}] {}", app_id, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_slash_becomes_empty() {
        assert_eq!(normalize("/ ", false), "");
        assert_eq!(normalize(" / ", true), "");
    }

    #[test]
    fn remove_prefix_drops_only_first_slash() {
        assert_eq!(normalize("  /hello /world ", true), "hello /world");
        assert_eq!(normalize("/hello", false), "/hello");
    }

    #[test]
    fn at_prefix_format() {
        assert_eq!(with_at_prefix("hi", "102"), "[CQ:at,qq=102] hi");
    }

    #[test]
    fn segmented_skips_empty_urls() {
        let atts = vec![
            Attachment {
                url: "https://img/1.png".into(),
            },
            Attachment { url: String::new() },
        ];
        let msg = segmented("hi", &atts);
        let types: Vec<_> = msg.segments().iter().map(|s| s.type_.as_str()).collect();
        assert_eq!(types, ["text", "image"]);
        assert_eq!(
            msg.segments()[1].data.get("file"),
            Some(&Value::from("https://img/1.png"))
        );
    }

    #[test]
    fn serializes_as_onebot_segments() {
        let json = serde_json::to_value(Message::new().text("a").image("https://img/5.png")).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"type": "text", "data": {"text": "a"}},
                {"type": "image", "data": {"file": "https://img/5.png"}}
            ])
        );
    }
}
