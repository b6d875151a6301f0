//! Plain-text export of a conversation

use super::types::{ConversationMessage, MessageType};
use crate::events::{EventBus, Subscription, WidgetEvent};
use crate::sync::lock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const CONTACT_METHOD_KIND: &str = "contact-method";
const USER_ALIAS: &str = "Me";

/// One message flattened to text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationLogMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub options: Vec<String>,
    pub alias: String,
    pub source: MessageType,
    pub timestamp: Option<i64>,
}

/// Builds log messages, resolving contact-method ids via fetched data
pub struct ConversationHistory {
    contact_methods: Arc<Mutex<HashMap<String, Value>>>,
    subscription: Subscription,
}

impl ConversationHistory {
    pub fn new(widget_events: &EventBus<WidgetEvent>) -> Self {
        let contact_methods: Arc<Mutex<HashMap<String, Value>>> = Arc::default();
        let cache = Arc::clone(&contact_methods);
        let subscription = widget_events.subscribe(move |event| {
            if let WidgetEvent::DataClientFetched { kind, response } = event {
                if kind == CONTACT_METHOD_KIND {
                    if let Some(id) = response.get("id").and_then(scalar_text) {
                        lock(&cache).insert(id, response.clone());
                    }
                }
            }
        });

        Self {
            contact_methods,
            subscription,
        }
    }

    pub fn get_conversation_logs(
        &self,
        messages: &[ConversationMessage],
    ) -> Vec<ConversationLogMessage> {
        messages.iter().map(|m| self.parse_entry(m)).collect()
    }

    pub fn parse_entry(&self, message: &ConversationMessage) -> ConversationLogMessage {
        let alias = match message.message_type {
            MessageType::System => "system".to_string(),
            _ => message
                .sender
                .as_ref()
                .and_then(|s| s.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| USER_ALIAS.to_string()),
        };

        let mut text = String::new();
        let mut options = Vec::new();

        let parts: Vec<Value> = match message.content.as_ref() {
            Some(content) => match &content.items {
                Some(items) => items.iter().map(crate::message::MessageItem::payload).collect(),
                None => serde_json::to_value(content).into_iter().collect(),
            },
            None => Vec::new(),
        };

        for data in &parts {
            text.push_str(&self.details(data, true));
            match data.get("actions") {
                Some(Value::Array(actions)) => {
                    options.extend(actions.iter().map(|a| self.details(a, false)));
                }
                Some(Value::Object(actions)) => {
                    options.extend(actions.iter().map(|(key, label)| {
                        let option = serde_json::json!({"actionKey": key, "label": label});
                        self.details(&option, false)
                    }));
                }
                _ => {}
            }
        }

        ConversationLogMessage {
            message: Some(text).filter(|t| !t.is_empty()),
            options,
            alias,
            source: message.message_type,
            timestamp: message.timestamp,
        }
    }

    fn details(&self, item: &Value, linebreak: bool) -> String {
        let separator = if linebreak { "\n" } else { " " };
        let mut text = String::new();
        let mut append = |value: Option<String>| {
            if let Some(value) = value {
                if !text.is_empty() {
                    text.push_str(separator);
                }
                text.push_str(&value);
            }
        };

        if let Some(id) = item.get("contactMethodId").and_then(scalar_text) {
            append(self.contact_method_text(&id));
        }
        for field in ["header", "title", "description", "text", "label", "html"] {
            append(item.get(field).and_then(scalar_text));
        }
        append(
            item.get("body")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
        text
    }

    fn contact_method_text(&self, id: &str) -> Option<String> {
        let cache = lock(&self.contact_methods);
        let method = cache.get(id)?;
        let text = [method.get("title"), method.get("description")]
            .into_iter()
            .filter_map(|v| v.and_then(scalar_text))
            .collect::<Vec<_>>()
            .join(" ");
        Some(text).filter(|t| !t.is_empty())
    }

    pub(crate) fn dispose(&self) {
        self.subscription.cancel();
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}
