//! Wire types of the knowledge-bot service and rendered message groups

use crate::conversation::ConversationEntry;
use crate::message::MessageItem;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server entry type; unknown types are kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryKind {
    Text,
    List,
    Contact,
    CategorizedNoticeList,
    NoticeList,
    FooterNotice,
    Error,
    Widget,
    Other(String),
}

impl EntryKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "Text",
            Self::List => "List",
            Self::Contact => "Contact",
            Self::CategorizedNoticeList => "CategorizedNoticeList",
            Self::NoticeList => "NoticeList",
            Self::FooterNotice => "footerNotice",
            Self::Error => "Error",
            Self::Widget => "Widget",
            Self::Other(other) => other,
        }
    }

    /// Render order within a response; lower first
    pub fn sort_priority(&self) -> u8 {
        match self {
            Self::Text => 1,
            Self::List => 2,
            Self::Contact => 3,
            Self::CategorizedNoticeList => 10,
            _ => 20,
        }
    }
}

impl From<String> for EntryKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Text" => Self::Text,
            "List" => Self::List,
            "Contact" => Self::Contact,
            "CategorizedNoticeList" => Self::CategorizedNoticeList,
            "NoticeList" => Self::NoticeList,
            "footerNotice" => Self::FooterNotice,
            "Error" => Self::Error,
            "Widget" => Self::Widget,
            _ => Self::Other(value),
        }
    }
}

impl From<EntryKind> for String {
    fn from(kind: EntryKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One atomic piece of a bot response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub actions: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Id of the entry this one is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_state: Option<Value>,
}

impl ServerEntry {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn has_relation(&self) -> bool {
        self.relation.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Action payload, if the action is present and truthy
    pub fn action(&self, key: &str) -> Option<&Value> {
        self.actions.get(key).filter(|v| is_truthy(v))
    }

    /// `$type` of the entry's local state
    pub fn local_state_type(&self) -> Option<&str> {
        self.local_state.as_ref()?.get("$type")?.as_str()
    }
}

/// JavaScript-style truthiness of a JSON value
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f.abs() > 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Strings and numbers as text
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// Envelopes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeAction {
    pub key: String,
    pub content: Value,
}

/// Request body sent to the bot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<EnvelopeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_state: Option<Value>,
    pub client_id: String,
    pub funnel: String,
}

/// Response body returned by the bot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub entries: Vec<ServerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_command: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_envelope: Option<Value>,
}

impl ServerEnvelope {
    /// Synthetic response standing in for a failed request
    pub fn error(message: impl Into<String>) -> Self {
        let mut content = Map::new();
        content.insert("message".to_string(), Value::String(message.into()));
        Self {
            entries: vec![ServerEntry {
                id: uuid::Uuid::new_v4().to_string(),
                kind: EntryKind::Error,
                content: Value::Object(content),
                actions: Map::new(),
                tags: Vec::new(),
                relation: None,
                timestamp: chrono::Utc::now().to_rfc3339(),
                local_state: None,
            }],
            ..Default::default()
        }
    }
}

// ============================================================================
// Message groups
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroupItem {
    pub id: String,
    pub group_id: String,
    pub is_user: bool,
    pub message: MessageItem,
}

/// Continuation of a paged list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    #[serde(default)]
    pub actions: Map<String, Value>,
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_state: Option<Value>,
}

impl Paging {
    pub fn next_action(&self) -> Option<&Value> {
        self.actions.get("next").filter(|v| is_truthy(v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GroupMeta {
    /// Shallow merge, `newer` wins per key
    #[must_use]
    pub fn merged(&self, newer: &GroupMeta) -> GroupMeta {
        let mut extra = self.extra.clone();
        extra.extend(newer.extra.clone());
        GroupMeta {
            paging: newer.paging.clone().or_else(|| self.paging.clone()),
            extra,
        }
    }
}

/// Items from one server entry, rendered together as one bubble
#[derive(Debug, Clone)]
pub struct MessageGroup {
    pub id: String,
    /// Shared by every item of the group
    pub message_id: String,
    pub is_user: bool,
    pub items: Vec<MessageGroupItem>,
    pub meta: GroupMeta,
    /// Printed conversation message, once the group has been rendered
    pub writer: Option<ConversationEntry>,
}

impl MessageGroup {
    pub fn new(is_user: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            is_user,
            items: Vec::new(),
            meta: GroupMeta::default(),
            writer: None,
        }
    }

    /// Group holding the given items
    pub fn with_items(is_user: bool, items: Vec<MessageItem>) -> Self {
        let mut group = Self::new(is_user);
        for item in items {
            group.push(item);
        }
        group
    }

    /// Group for one server entry; its items carry the entry id
    pub fn for_entry(entry_id: &str) -> Self {
        let mut group = Self::new(false);
        if !entry_id.is_empty() {
            group.message_id = entry_id.to_string();
        }
        group
    }

    /// Append an item under the group's shared message id
    pub fn push(&mut self, message: MessageItem) {
        self.items.push(MessageGroupItem {
            id: self.message_id.clone(),
            group_id: self.id.clone(),
            is_user: self.is_user,
            message,
        });
    }

    pub fn messages(&self) -> Vec<MessageItem> {
        self.items.iter().map(|i| i.message.clone()).collect()
    }
}
