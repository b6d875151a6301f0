//! Property-based tests for the entry transformer
//!
//! These tests verify the transformer invariants that hold for any batch:
//! - Sorting follows type priority and keeps input order on ties
//! - Related entries never render as their own group
//! - Initial notice lists split into one group per category
//! - Grafting a page keeps old payload keys the new page lacks

use super::entry::{process_entries, sort_entries};
use super::types::{EntryKind, ServerEntry};
use crate::message::{ActionItem, ListContent, MessageItem};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

// ============================================================================
// Strategies
// ============================================================================

fn arb_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![
        Just(EntryKind::Text),
        Just(EntryKind::List),
        Just(EntryKind::Contact),
        Just(EntryKind::CategorizedNoticeList),
        "[A-Z][a-z]{3,8}".prop_map(EntryKind::Other),
    ]
}

fn entry(id: String, kind: EntryKind, content: Value, relation: Option<String>) -> ServerEntry {
    ServerEntry {
        id,
        kind,
        content,
        actions: Map::new(),
        tags: Vec::new(),
        relation,
        timestamp: String::new(),
        local_state: None,
    }
}

/// Entries of arbitrary kinds with ids equal to their input position
fn arb_batch() -> impl Strategy<Value = Vec<ServerEntry>> {
    prop::collection::vec(arb_kind(), 0..20).prop_map(|kinds| {
        kinds
            .into_iter()
            .enumerate()
            .map(|(i, kind)| entry(i.to_string(), kind, json!({}), None))
            .collect()
    })
}

/// Text entries where some relate to an earlier entry
fn arb_text_batch() -> impl Strategy<Value = Vec<ServerEntry>> {
    prop::collection::vec((any::<bool>(), "[a-z ]{1,20}"), 1..15).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (related, html))| {
                let relation = (related && i > 0).then(|| (i - 1).to_string());
                entry(i.to_string(), EntryKind::Text, json!({ "html": html }), relation)
            })
            .collect()
    })
}

fn arb_label() -> impl Strategy<Value = String> {
    "[A-Za-z ]{1,12}"
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn sort_orders_by_priority_and_is_stable(batch in arb_batch()) {
        let sorted = sort_entries(&batch);
        prop_assert_eq!(sorted.len(), batch.len());

        for pair in sorted.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let (pa, pb) = (a.kind.sort_priority(), b.kind.sort_priority());
            prop_assert!(pa <= pb);
            if pa == pb {
                let ia: usize = a.id.parse().unwrap();
                let ib: usize = b.id.parse().unwrap();
                prop_assert!(ia < ib);
            }
        }
    }

    #[test]
    fn related_entries_never_stand_alone(batch in arb_text_batch()) {
        let top_level = batch.iter().filter(|e| e.relation.is_none()).count();
        let batch_result = process_entries(&batch, None);

        prop_assert_eq!(batch_result.groups.len(), top_level);
        for group in &batch_result.groups {
            prop_assert!(!group.is_user);
            prop_assert!(!group.items.is_empty());
        }
    }

    #[test]
    fn initial_notices_split_per_item(count in 0usize..6, initial in any::<bool>()) {
        let items: Vec<Value> = (0..count)
            .map(|i| json!({"id": i, "title": format!("Category {i}"), "listNotices": []}))
            .collect();
        let notices = entry(
            "N".to_string(),
            EntryKind::CategorizedNoticeList,
            json!({"isInitialNotices": initial, "items": items}),
            None,
        );

        let batch = process_entries(&[notices], None);
        let expected = if initial { count } else { 0 };
        prop_assert_eq!(batch.groups.len(), expected);

        let mut ids: Vec<&str> = batch.groups.iter().map(|g| g.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), expected);
    }

    #[test]
    fn graft_keeps_absent_keys(
        header in proptest::option::of(arb_label()),
        old in prop::collection::vec(arb_label(), 0..5),
        new in prop::collection::vec(arb_label(), 0..5),
    ) {
        let list = |labels: &[String], header: Option<String>| {
            MessageItem::LinkList(ListContent {
                header,
                actions: labels.iter().map(|l| ActionItem::new(l.clone(), l.clone())).collect(),
                entry_id: Some("old".to_string()),
                ..Default::default()
            })
        };

        let base = list(&old, header.clone());
        let page = list(&new, None);
        let grafted = base.graft(&page);
        let content = grafted.list_content().unwrap();

        prop_assert_eq!(&content.header, &header);
        prop_assert_eq!(content.actions.len(), new.len());
    }
}
