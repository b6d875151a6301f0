//! Entry transformer
//!
//! Pure conversion of one batch of server entries into message groups.
//! The only outward effect, remembering the last answered guide, is
//! returned as an [`EntryEffect`] for the caller to apply.

use super::contact::ContactMethodSettings;
use super::types::{is_truthy, value_to_string, EntryKind, MessageGroup, Paging, ServerEntry};
use crate::message::{
    ActionItem, ContactMethodItem, HtmlContent, ListContent, ListKind, MessageItem,
    NotificationList,
};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const GUIDE_LIST_STATE: &str = "Humany.Matching.Bots.Conversations.GuideListState, Humany.Matching";
pub const GUIDE_FEEDBACK_STATE: &str =
    "Humany.Matching.Bots.Conversations.States.GuideFeedbackState, Humany.Matching";
pub const CONTACT_STATE: &str =
    "Humany.Matching.Bots.Conversations.States.ContactState, Humany.Matching";

/// Service parameter remembering the last answered guide
pub const LAST_GUIDE_ID: &str = "LastGuideId";

const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong.";

/// Side effect requested while transforming entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryEffect {
    SetServiceParameter { key: String, value: String },
}

#[derive(Debug, Default)]
pub struct EntryBatch {
    pub groups: Vec<MessageGroup>,
    pub effects: Vec<EntryEffect>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListEntryContent {
    header: Option<String>,
    html: Option<String>,
    items: Option<Vec<ListEntryItem>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ListEntryItem {
    title: Option<String>,
    action_key: Option<String>,
    symbol: Option<Value>,
    description: Option<String>,
    data: Option<Value>,
}

impl ListEntryItem {
    fn label(&self) -> String {
        self.title.clone().unwrap_or_default()
    }

    fn action_key(&self) -> String {
        self.action_key.clone().unwrap_or_default()
    }
}

fn list_view(entry: &ServerEntry) -> ListEntryContent {
    serde_json::from_value(entry.content.clone()).unwrap_or_else(|e| {
        tracing::debug!(entry_id = %entry.id, error = %e, "Unexpected list content shape");
        ListEntryContent::default()
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn content_str<'a>(entry: &'a ServerEntry, field: &str) -> Option<&'a str> {
    entry.content.get(field).and_then(Value::as_str)
}

/// Which list kind a `List` entry renders as
pub fn get_list_type(entry: &ServerEntry) -> ListKind {
    if entry.has_tag("category") && entry.has_tag("contact") {
        return ListKind::ItemList;
    }
    if entry.has_tag("suggestion") {
        return ListKind::LinkList;
    }
    match entry.local_state_type() {
        Some(GUIDE_LIST_STATE) => ListKind::LinkList,
        Some(GUIDE_FEEDBACK_STATE) => ListKind::FeedbackList,
        Some(CONTACT_STATE) => ListKind::ContactList,
        _ => ListKind::ButtonList,
    }
}

/// Transform one response's entries into groups, in render order.
///
/// `prev_group` is the group a "next page" request continues; paging
/// actions then target it instead of the new group.
pub fn process_entries(entries: &[ServerEntry], prev_group: Option<&MessageGroup>) -> EntryBatch {
    let sorted = sort_entries(entries);
    let top_level: Vec<ServerEntry> = sorted
        .iter()
        .filter(|e| !e.has_relation())
        .flat_map(split_entry)
        .collect();

    let mut batch = EntryBatch::default();
    for entry in &top_level {
        let related: Vec<&ServerEntry> = sorted
            .iter()
            .filter(|other| {
                other.relation.as_deref() == Some(entry.id.as_str())
                    && !other.actions.contains_key("selector")
            })
            .collect();

        if let Some(effect) = guide_effect(entry) {
            batch.effects.push(effect);
        }

        let mut group = MessageGroup::for_entry(&entry.id);
        for item in transform(entry, &mut group, &related, prev_group) {
            group.push(item);
        }
        if !group.items.is_empty() {
            batch.groups.push(group);
        }
    }
    batch
}

/// Stable sort by entry type priority
pub(crate) fn sort_entries(entries: &[ServerEntry]) -> Vec<ServerEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.kind.sort_priority());
    sorted
}

/// Expand notice lists into one entry per category.
///
/// Notice lists that are not the initial notices render nothing.
fn split_entry(entry: &ServerEntry) -> Vec<ServerEntry> {
    if !matches!(entry.kind, EntryKind::NoticeList | EntryKind::CategorizedNoticeList) {
        return vec![entry.clone()];
    }

    let initial = entry.content.get("isInitialNotices").is_some_and(is_truthy);
    if !initial {
        return Vec::new();
    }

    let items = entry
        .content
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    items
        .into_iter()
        .map(|item| {
            let kind = item
                .get("type")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map_or_else(|| entry.kind.clone(), |t| EntryKind::from(t.to_string()));

            let mut content = Map::new();
            for field in ["$type", "isInitialNotices"] {
                if let Some(value) = entry.content.get(field) {
                    content.insert(field.to_string(), value.clone());
                }
            }
            if let Some(notices) = item.get("notices") {
                content.insert("notices".to_string(), notices.clone());
            }
            content.insert("item".to_string(), item);

            ServerEntry {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                content: Value::Object(content),
                ..entry.clone()
            }
        })
        .collect()
}

fn guide_effect(entry: &ServerEntry) -> Option<EntryEffect> {
    if entry.kind == EntryKind::List || !entry.has_tag("guide") {
        return None;
    }
    let id = entry
        .content
        .get("hints")?
        .as_array()?
        .first()?
        .get("id")
        .filter(|v| is_truthy(v))
        .and_then(value_to_string)?;

    Some(EntryEffect::SetServiceParameter {
        key: LAST_GUIDE_ID.to_string(),
        value: id,
    })
}

fn transform(
    entry: &ServerEntry,
    group: &mut MessageGroup,
    related: &[&ServerEntry],
    prev_group: Option<&MessageGroup>,
) -> Vec<MessageItem> {
    match entry.kind {
        EntryKind::Text => transform_text(entry, group, related),
        EntryKind::List => transform_list(entry, group, related, prev_group),
        EntryKind::Contact => vec![contact_method_item(entry, group)],
        EntryKind::CategorizedNoticeList => transform_notice_category(entry),
        EntryKind::FooterNotice => {
            let body = entry
                .content
                .get("item")
                .and_then(|item| item.get("body"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            vec![MessageItem::html(body)]
        }
        EntryKind::Error => {
            let message = content_str(entry, "message")
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_ERROR_MESSAGE);
            vec![MessageItem::html(message)]
        }
        _ => Vec::new(),
    }
}

fn transform_text(
    entry: &ServerEntry,
    group: &MessageGroup,
    related: &[&ServerEntry],
) -> Vec<MessageItem> {
    let mut items = vec![MessageItem::html(content_str(entry, "html").unwrap_or_default())];
    if related.is_empty() {
        return items;
    }

    let contact_list = related
        .iter()
        .find(|e| e.kind == EntryKind::List && e.local_state_type() == Some(CONTACT_STATE));
    let dialog = related.iter().find(|e| e.has_tag("dialog"));
    let feedback = related.iter().find(|e| e.has_tag("feedback"));
    let contact = related
        .iter()
        .find(|e| e.has_tag("contact") && e.kind == EntryKind::Contact);

    if let Some(contact) = contact {
        items.push(contact_method_item(contact, group));
    }

    if let Some(dialog) = dialog {
        items.push(MessageItem::ButtonList(ListContent {
            actions: simple_actions(dialog),
            ..Default::default()
        }));
    }

    if let Some(contact_list) = contact_list {
        let content = create_list_content(
            ListKind::ContactList,
            contact_list,
            &list_view(contact_list).items.unwrap_or_default(),
            ListContent {
                entry_id: Some(contact_list.id.clone()),
                group_id: Some(group.id.clone()),
                ..Default::default()
            },
        );
        items.push(MessageItem::Separator);
        items.push(MessageItem::ContactList(content));
    }

    if let Some(feedback) = feedback {
        if let Some(html) = content_str(feedback, "html").filter(|h| !h.is_empty()) {
            items.push(MessageItem::html(html));
        }
        items.push(MessageItem::FeedbackList(ListContent {
            actions: simple_actions(feedback),
            ..Default::default()
        }));
    }

    items
}

fn transform_list(
    entry: &ServerEntry,
    group: &mut MessageGroup,
    related: &[&ServerEntry],
    prev_group: Option<&MessageGroup>,
) -> Vec<MessageItem> {
    let view = list_view(entry);
    let list_items = view.items.unwrap_or_default();
    let mut items = Vec::new();

    if !list_items.is_empty() {
        let kind = get_list_type(entry);
        let mut list = create_list_content(
            kind,
            entry,
            &list_items,
            ListContent {
                header: non_empty(view.header),
                entry_id: Some(entry.id.clone()),
                group_id: Some(group.id.clone()),
                ..Default::default()
            },
        );
        let mut trailing = Vec::new();

        if let Some(paging) = related.iter().find(|e| e.has_tag("paging")) {
            if is_truthy(&paging.content) {
                group.meta.paging = Some(Paging {
                    actions: paging.actions.clone(),
                    items: paging
                        .content
                        .get("items")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                    local_state: paging.local_state.clone(),
                });

                let target = prev_group.map_or_else(|| group.id.clone(), |g| g.id.clone());
                for item in list_view(paging).items.unwrap_or_default() {
                    list.actions.push(ActionItem {
                        label: item.label(),
                        action_key: item.action_key(),
                        data: Some(serde_json::json!({ "groupId": target })),
                        ..Default::default()
                    });
                }
            }
        }

        if let Some(fallback) = related.iter().find(|e| e.has_tag("fallback")) {
            let help = list_view(fallback)
                .items
                .unwrap_or_default()
                .into_iter()
                .find(|i| i.action_key.as_deref() == Some("help"));
            if let Some(help) = help {
                trailing.push(MessageItem::Separator);
                trailing.push(MessageItem::NoGoodAlternative(HtmlContent { body: help.label() }));
            }
        }

        items.push(MessageItem::list(kind, list));
        items.extend(trailing);
    }

    if let Some(html) = non_empty(view.html) {
        items.insert(0, MessageItem::html(html));
    }
    items
}

fn transform_notice_category(entry: &ServerEntry) -> Vec<MessageItem> {
    let mut items = Vec::new();

    if let Some(item) = entry.content.get("item").filter(|i| i.is_object()) {
        items.push(MessageItem::NotificationList(NotificationList {
            id: item.get("id").and_then(value_to_string).unwrap_or_default(),
            header: item
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(String::from),
            items: item
                .get("listNotices")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            symbol: item.get("defaultIcon").filter(|v| is_truthy(v)).cloned(),
        }));
    }

    if let Some(notices) = entry.content.get("notices").and_then(Value::as_array) {
        for notice in notices {
            let body = notice.get("body").and_then(Value::as_str).unwrap_or_default();
            items.push(MessageItem::html(body));
        }
    }

    items
}

fn contact_method_item(entry: &ServerEntry, group: &MessageGroup) -> MessageItem {
    MessageItem::ContactMethod(ContactMethodItem {
        contact_method_id: entry.content.get("id").cloned().unwrap_or(Value::Null),
        group_id: group.id.clone(),
        guide_id: entry.content.get("guideId").filter(|v| !v.is_null()).cloned(),
    })
}

fn simple_actions(entry: &ServerEntry) -> Vec<ActionItem> {
    list_view(entry)
        .items
        .unwrap_or_default()
        .iter()
        .map(|item| ActionItem::new(item.label(), item.action_key()))
        .collect()
}

fn create_list_content(
    kind: ListKind,
    entry: &ServerEntry,
    items: &[ListEntryItem],
    mut content: ListContent,
) -> ListContent {
    let mut contact_method_ids = Vec::new();

    content.actions = items
        .iter()
        .map(|item| {
            let mut action = ActionItem {
                label: item.label(),
                action_key: item.action_key(),
                symbol: item.symbol.clone().filter(is_truthy),
                description: non_empty(item.description.clone()),
                data: None,
            };

            if let Some(data) = item.data.as_ref().filter(|d| is_truthy(d)) {
                if kind == ListKind::ContactList {
                    if let Some(id) = data.get("id").and_then(value_to_string) {
                        contact_method_ids.push(id);
                    }
                    let guide_id = entry
                        .actions
                        .get(&item.action_key())
                        .and_then(|a| a.get("guideId"))
                        .and_then(value_to_string);
                    action.data =
                        serde_json::to_value(ContactMethodSettings::from_legacy(data, guide_id)).ok();
                } else {
                    action.data = Some(data.clone());
                }
            }
            action
        })
        .collect();

    if kind == ListKind::ContactList {
        content.contact_method_ids = Some(contact_method_ids);
    }
    content
}
