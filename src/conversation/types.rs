//! Conversation message types and input normalization

use crate::message::MessageItem;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Agent,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Renderable content of a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<MessageItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn items(items: Vec<MessageItem>) -> Self {
        Self {
            items: Some(items),
            ..Default::default()
        }
    }
}

/// A message as stored by the controller and persisted in transcripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub key: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// `None` once the message has been removed
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<MessageSender>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// Agent profile as persisted with the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub provider_name: String,
}

/// Snapshot emitted on every conversation update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageStream {
    pub messages: Vec<ConversationMessage>,
    pub loading: bool,
    pub typing_actors: Vec<MessageSender>,
}

/// An action the user triggered in the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAction {
    pub action_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&str> for UiAction {
    fn from(action_key: &str) -> Self {
        Self {
            action_key: action_key.to_string(),
            label: None,
            data: None,
        }
    }
}

// ============================================================================
// Input normalization
// ============================================================================

/// Structured message settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSettings {
    pub key: Option<String>,
    /// `None` stamps the current time, `Some(None)` renders without one
    pub timestamp: Option<Option<i64>>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub actions: Option<Map<String, Value>>,
    pub items: Option<Vec<MessageItem>>,
    /// Raw content type; when set the settings pass through verbatim
    pub content_type: Option<String>,
    pub extra: Map<String, Value>,
}

impl From<MessageContent> for MessageSettings {
    fn from(content: MessageContent) -> Self {
        Self {
            title: content.title,
            body: content.body,
            actions: content.actions,
            items: content.items,
            extra: content.extra,
            ..Default::default()
        }
    }
}

/// Anything that can be printed into a conversation
#[derive(Debug, Clone, PartialEq)]
pub enum MessageInput {
    Text(String),
    Item(MessageItem),
    Items(Vec<MessageItem>),
    Settings(MessageSettings),
}

impl From<&str> for MessageInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<MessageItem> for MessageInput {
    fn from(item: MessageItem) -> Self {
        Self::Item(item)
    }
}

impl From<Vec<MessageItem>> for MessageInput {
    fn from(items: Vec<MessageItem>) -> Self {
        Self::Items(items)
    }
}

impl From<MessageSettings> for MessageInput {
    fn from(settings: MessageSettings) -> Self {
        Self::Settings(settings)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub content: MessageContent,
    pub key: String,
    pub timestamp: Option<i64>,
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn new_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Turn any printable input into content, key and timestamp.
///
/// `key` is used unless structured settings carry their own. Only
/// settings with an explicit `Some(None)` timestamp render untimed.
pub fn normalize_message(input: MessageInput, key: Option<&str>) -> NormalizedMessage {
    let key = key.map_or_else(new_key, String::from);

    match input {
        MessageInput::Text(body) => NormalizedMessage {
            content: MessageContent::text(body),
            key,
            timestamp: Some(now_millis()),
        },
        MessageInput::Item(item) => NormalizedMessage {
            content: MessageContent::items(vec![item]),
            key,
            timestamp: Some(now_millis()),
        },
        MessageInput::Items(items) => NormalizedMessage {
            content: MessageContent::items(items),
            key,
            timestamp: Some(now_millis()),
        },
        MessageInput::Settings(settings) => match settings.content_type {
            Some(content_type) => {
                let mut extra = settings.extra;
                extra.insert("type".to_string(), Value::String(content_type));
                NormalizedMessage {
                    content: MessageContent {
                        title: settings.title,
                        body: settings.body,
                        actions: settings.actions,
                        items: settings.items,
                        extra,
                    },
                    key,
                    timestamp: Some(now_millis()),
                }
            }
            None => NormalizedMessage {
                content: MessageContent {
                    title: settings.title,
                    body: settings.body,
                    actions: settings.actions,
                    ..Default::default()
                },
                key: settings.key.unwrap_or(key),
                timestamp: settings.timestamp.unwrap_or_else(|| Some(now_millis())),
            },
        },
    }
}

impl MessageInput {
    /// Content and timestamp for replacing an existing message
    pub(crate) fn into_update(self) -> (MessageContent, Option<i64>) {
        match self {
            Self::Settings(settings) => {
                let timestamp = settings.timestamp.flatten();
                let mut extra = settings.extra;
                if let Some(content_type) = settings.content_type {
                    extra.insert("type".to_string(), Value::String(content_type));
                }
                let content = MessageContent {
                    title: settings.title,
                    body: settings.body,
                    actions: settings.actions,
                    items: settings.items,
                    extra,
                };
                (content, timestamp)
            }
            other => (normalize_message(other, None).content, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HtmlContent;

    #[test]
    fn test_text_becomes_body_with_timestamp() {
        let normalized = normalize_message("hi".into(), Some("k1"));
        assert_eq!(normalized.content.body.as_deref(), Some("hi"));
        assert_eq!(normalized.key, "k1");
        assert!(normalized.timestamp.is_some());
    }

    #[test]
    fn test_single_item_is_wrapped() {
        let normalized = normalize_message(MessageItem::html("<b>x</b>").into(), None);
        assert_eq!(
            normalized.content.items,
            Some(vec![MessageItem::Html(HtmlContent {
                body: "<b>x</b>".to_string()
            })])
        );
        assert!(!normalized.key.is_empty());
    }

    #[test]
    fn test_settings_are_projected_and_keep_their_key() {
        let settings = MessageSettings {
            key: Some("own".to_string()),
            title: Some("T".to_string()),
            body: Some("B".to_string()),
            items: Some(vec![MessageItem::Separator]),
            timestamp: Some(None),
            ..Default::default()
        };

        let normalized = normalize_message(settings.into(), Some("ignored"));
        assert_eq!(normalized.key, "own");
        assert_eq!(normalized.timestamp, None);
        assert_eq!(normalized.content.title.as_deref(), Some("T"));
        assert_eq!(normalized.content.items, None);
    }

    #[test]
    fn test_typed_settings_pass_through() {
        let settings = MessageSettings {
            body: Some("form".to_string()),
            items: Some(vec![MessageItem::Separator]),
            content_type: Some("form".to_string()),
            ..Default::default()
        };

        let normalized = normalize_message(settings.into(), Some("k"));
        assert_eq!(normalized.key, "k");
        assert_eq!(normalized.content.extra.get("type"), Some(&Value::from("form")));
        assert!(normalized.content.items.is_some());
        assert!(normalized.timestamp.is_some());
    }

    #[test]
    fn test_message_serializes_type_field() {
        let message = ConversationMessage {
            key: "k".to_string(),
            timestamp: Some(1),
            content: Some(MessageContent::text("hello")),
            sender: None,
            message_type: MessageType::Agent,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "agent");
        assert_eq!(value["content"]["body"], "hello");

        let back: ConversationMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
