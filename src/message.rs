//! Renderable message items
//!
//! Every piece of UI the conversation can draw is one [`MessageItem`]. On
//! the wire an item is `{"kind": "...", "payload": {...}}`; the knowledge
//! bot registers five custom kinds next to the built-in ones.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single renderable item, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum MessageItem {
    #[serde(rename = "html")]
    Html(HtmlContent),
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "link-list")]
    LinkList(ListContent),
    #[serde(rename = "button-list")]
    ButtonList(ListContent),
    #[serde(rename = "item-list")]
    ItemList(ListContent),
    #[serde(rename = "separator")]
    Separator,
    #[serde(rename = "video-request")]
    VideoRequest(VideoRequest),
    #[serde(rename = "ace-knowledge-bot-contact-method")]
    ContactMethod(ContactMethodItem),
    #[serde(rename = "ace-knowledge-bot-contact-list")]
    ContactList(ListContent),
    #[serde(rename = "ace-knowledge-bot-feedback-list")]
    FeedbackList(ListContent),
    #[serde(rename = "ace-knowledge-bot-notification-list")]
    NotificationList(NotificationList),
    #[serde(rename = "ace-knowledge-bot-no-good-alternative")]
    NoGoodAlternative(HtmlContent),
}

/// Discriminant of a [`MessageItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Html,
    Text,
    LinkList,
    ButtonList,
    ItemList,
    Separator,
    VideoRequest,
    ContactMethod,
    ContactList,
    FeedbackList,
    NotificationList,
    NoGoodAlternative,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Text => "text",
            Self::LinkList => "link-list",
            Self::ButtonList => "button-list",
            Self::ItemList => "item-list",
            Self::Separator => "separator",
            Self::VideoRequest => "video-request",
            Self::ContactMethod => "ace-knowledge-bot-contact-method",
            Self::ContactList => "ace-knowledge-bot-contact-list",
            Self::FeedbackList => "ace-knowledge-bot-feedback-list",
            Self::NotificationList => "ace-knowledge-bot-notification-list",
            Self::NoGoodAlternative => "ace-knowledge-bot-no-good-alternative",
        }
    }
}

/// The list kinds a server `List` entry can render as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    LinkList,
    ButtonList,
    ItemList,
    FeedbackList,
    ContactList,
}

impl ListKind {
    pub fn message_kind(self) -> MessageKind {
        match self {
            Self::LinkList => MessageKind::LinkList,
            Self::ButtonList => MessageKind::ButtonList,
            Self::ItemList => MessageKind::ItemList,
            Self::FeedbackList => MessageKind::FeedbackList,
            Self::ContactList => MessageKind::ContactList,
        }
    }
}

impl MessageItem {
    pub fn html(body: impl Into<String>) -> Self {
        Self::Html(HtmlContent { body: body.into() })
    }

    pub fn list(kind: ListKind, content: ListContent) -> Self {
        match kind {
            ListKind::LinkList => Self::LinkList(content),
            ListKind::ButtonList => Self::ButtonList(content),
            ListKind::ItemList => Self::ItemList(content),
            ListKind::FeedbackList => Self::FeedbackList(content),
            ListKind::ContactList => Self::ContactList(content),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Html(_) => MessageKind::Html,
            Self::Text(_) => MessageKind::Text,
            Self::LinkList(_) => MessageKind::LinkList,
            Self::ButtonList(_) => MessageKind::ButtonList,
            Self::ItemList(_) => MessageKind::ItemList,
            Self::Separator => MessageKind::Separator,
            Self::VideoRequest(_) => MessageKind::VideoRequest,
            Self::ContactMethod(_) => MessageKind::ContactMethod,
            Self::ContactList(_) => MessageKind::ContactList,
            Self::FeedbackList(_) => MessageKind::FeedbackList,
            Self::NotificationList(_) => MessageKind::NotificationList,
            Self::NoGoodAlternative(_) => MessageKind::NoGoodAlternative,
        }
    }

    /// List payload, when this item is one of the list kinds
    pub fn list_content(&self) -> Option<&ListContent> {
        match self {
            Self::LinkList(c)
            | Self::ButtonList(c)
            | Self::ItemList(c)
            | Self::ContactList(c)
            | Self::FeedbackList(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        self.list_content().is_some()
    }

    /// Payload as plain JSON (`null` for payload-less kinds)
    pub fn payload(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }

    /// Shallow-merge `newer`'s payload over this item's payload.
    ///
    /// The result takes `newer`'s kind; keys present in both payloads are
    /// taken from `newer`. Falls back to `newer` when either payload is not
    /// an object or the merged payload no longer fits the kind.
    #[must_use]
    pub fn graft(&self, newer: &MessageItem) -> MessageItem {
        let (Value::Object(base), Value::Object(update)) = (self.payload(), newer.payload()) else {
            return newer.clone();
        };

        let mut merged = base;
        merged.extend(update);

        let mut grafted = Map::new();
        grafted.insert("kind".to_string(), Value::String(newer.kind().as_str().to_string()));
        grafted.insert("payload".to_string(), Value::Object(merged));
        serde_json::from_value(Value::Object(grafted)).unwrap_or_else(|_| newer.clone())
    }
}

/// Markup payload shared by `html` and `no-good-alternative`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HtmlContent {
    pub body: String,
}

/// A clickable action inside a list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub label: String,
    pub action_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Value>,
}

impl ActionItem {
    pub fn new(label: impl Into<String>, action_key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action_key: action_key.into(),
            ..Default::default()
        }
    }
}

/// Payload of every list kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_method_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    pub accept_label: String,
    pub decline_label: String,
}

/// Reference to a contact method rendered inline in a bot answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMethodItem {
    pub contact_method_id: Value,
    pub group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_id: Option<Value>,
}

/// A notice category with its notices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationList {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_serializes_as_kind_and_payload() {
        let item = MessageItem::ButtonList(ListContent {
            actions: vec![ActionItem::new("Yes", "yes"), ActionItem::new("No", "no")],
            entry_id: Some("e1".to_string()),
            group_id: Some("g1".to_string()),
            ..Default::default()
        });

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "button-list",
                "payload": {
                    "actions": [
                        {"label": "Yes", "actionKey": "yes"},
                        {"label": "No", "actionKey": "no"}
                    ],
                    "entryId": "e1",
                    "groupId": "g1"
                }
            })
        );
    }

    #[test]
    fn test_separator_has_no_payload() {
        let value = serde_json::to_value(MessageItem::Separator).unwrap();
        assert_eq!(value, json!({"kind": "separator"}));
        assert_eq!(MessageItem::Separator.payload(), Value::Null);
    }

    #[test]
    fn test_custom_kinds_round_trip_from_wire() {
        let item: MessageItem = serde_json::from_value(json!({
            "kind": "ace-knowledge-bot-contact-method",
            "payload": {"contactMethodId": 7, "groupId": "g"}
        }))
        .unwrap();
        assert_eq!(item.kind(), MessageKind::ContactMethod);
        assert!(!item.is_list());
    }

    #[test]
    fn test_graft_merges_payload_with_newer_keys_winning() {
        let old = MessageItem::LinkList(ListContent {
            header: Some("Top questions".to_string()),
            actions: vec![ActionItem::new("A", "a")],
            entry_id: Some("e1".to_string()),
            ..Default::default()
        });
        let newer = MessageItem::LinkList(ListContent {
            actions: vec![ActionItem::new("A", "a"), ActionItem::new("B", "b")],
            entry_id: Some("e2".to_string()),
            ..Default::default()
        });

        let grafted = old.graft(&newer);
        let content = grafted.list_content().unwrap();
        assert_eq!(content.header.as_deref(), Some("Top questions"));
        assert_eq!(content.actions.len(), 2);
        assert_eq!(content.entry_id.as_deref(), Some("e2"));
    }

    #[test]
    fn test_graft_takes_newer_kind() {
        let old = MessageItem::LinkList(ListContent {
            header: Some("h".to_string()),
            ..Default::default()
        });
        let newer = MessageItem::ButtonList(ListContent::default());

        let grafted = old.graft(&newer);
        assert_eq!(grafted.kind(), MessageKind::ButtonList);
        assert_eq!(grafted.list_content().unwrap().header.as_deref(), Some("h"));
    }

    #[test]
    fn test_graft_falls_back_to_newer_for_scalar_payload() {
        let old = MessageItem::Text("old".to_string());
        let newer = MessageItem::Text("new".to_string());
        assert_eq!(old.graft(&newer), newer);
    }
}
