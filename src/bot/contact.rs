//! Legacy contact-method conversion
//!
//! Contact lists from the bot carry contact methods in the legacy exit
//! format; the widget renders the newer settings shape.

use super::types::{is_truthy, value_to_string};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CUSTOM_ADAPTER: &str = "custom.adapter";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMethodSettings {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    pub client_name: String,
    pub expanded: bool,
    pub inline: bool,
    #[serde(default)]
    pub body: Map<String, Value>,
}

fn str_field(value: Option<&Value>, field: &str) -> Option<String> {
    value?.get(field)?.as_str().map(String::from)
}

fn convert_symbol(icon: Option<&Value>) -> Option<Symbol> {
    let kind = str_field(icon, "type").filter(|s| !s.is_empty())?;
    let content = str_field(icon, "content").filter(|s| !s.is_empty())?;
    Some(Symbol { kind, content })
}

impl ContactMethodSettings {
    /// Convert a legacy contact method; `guide_id` comes from the list action
    pub fn from_legacy(legacy: &Value, guide_id: Option<String>) -> Self {
        let adapter = legacy
            .get("exits")
            .and_then(Value::as_array)
            .and_then(|exits| exits.first())
            .and_then(|exit| exit.get("adapter"));
        let client_name = str_field(adapter, "clientName").unwrap_or_default();
        let adapter_settings = adapter
            .and_then(|a| a.get("settings"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let exit_type = str_field(Some(legacy), "exitType");

        let mut settings = Self {
            id: legacy.get("id").and_then(value_to_string).unwrap_or_default(),
            title: str_field(Some(legacy), "title"),
            description: str_field(Some(legacy), "description"),
            symbol: convert_symbol(legacy.get("defaultIcon")),
            client_name: if client_name == CUSTOM_ADAPTER {
                str_field(adapter, "customClientName").unwrap_or_default()
            } else {
                client_name.clone()
            },
            expanded: true,
            inline: true,
            body: Map::new(),
        };

        if client_name.contains("phone") || client_name.contains("freetext") {
            if adapter_settings.get("displayTextBeforeClick").and_then(Value::as_str) == Some("true") {
                settings.expanded = false;
                settings.title = adapter_settings
                    .get("textBeforeClick")
                    .and_then(Value::as_str)
                    .map(String::from);
            }
            let field = if client_name.contains("phone.text") {
                "phoneNumber"
            } else {
                "freetext"
            };
            if let Some(value) = adapter_settings.get(field) {
                settings.body.insert(field.to_string(), value.clone());
            }
        }

        if client_name.contains("chat.popup")
            || client_name.contains("link")
            || (client_name == CUSTOM_ADAPTER && exit_type.as_deref() == Some("custom"))
        {
            settings.body.clone_from(&adapter_settings);
            if let Some(confirmation) = legacy.get("confirmationText") {
                settings
                    .body
                    .insert("confirmationFallback".to_string(), confirmation.clone());
            }
        }

        if client_name.contains("ace") {
            settings.body.clone_from(&adapter_settings);
        }

        let form = legacy.get("form").filter(|f| is_truthy(f));
        let has_value_components = form
            .and_then(|f| f.get("hasValueComponents"))
            .is_some_and(is_truthy);
        if has_value_components {
            let expand_automatically = legacy
                .get("expandFormAutomatically")
                .is_some_and(is_truthy);
            if !expand_automatically {
                settings.expanded = false;
                settings.inline = false;
            }
        }

        if let Some(guide_id) = guide_id {
            settings
                .body
                .insert("guideId".to_string(), Value::String(guide_id));
        }

        settings
    }
}
