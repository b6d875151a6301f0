//! Envelope client
//!
//! Talks to the bot endpoint and threads the bot's conversation state
//! through every request:
//!
//! - `globalState` is replaced whenever a response carries one
//! - `localState` is the last one declared by an entry of the latest
//!   response, and is sent with the next request unless the request
//!   carries its own
//! - every received entry is kept so later actions can be replayed
//!
//! Requests are serialized: the state lock is held from envelope
//! construction until the response has been applied.

use super::entry::{process_entries, EntryEffect};
use super::parameters::ServiceParameters;
use super::store::{BotStore, SessionKey};
use super::transport::EnvelopeTransport;
use super::types::{
    ClientEnvelope, Command, EntryKind, EnvelopeAction, MessageGroup, ServerEntry, ServerEnvelope,
};
use crate::events::{ContactMethodRequest, EventBus, WidgetEvent};
use crate::message::MessageKind;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// `$type` of the help action content
pub const HELP_ACTION_TYPE: &str = "Humany.Matching.Bots.Conversations.Actions.Help, Humany.Matching";

#[derive(Debug, Default)]
struct ClientState {
    global_state: Option<Value>,
    local_state: Option<Value>,
    entries: Vec<ServerEntry>,
}

/// Collaborators of an [`EnvelopeClient`]
pub struct ClientContext {
    pub store: BotStore,
    pub widget_events: EventBus<WidgetEvent>,
    pub parameters: Arc<dyn ServiceParameters>,
}

pub struct EnvelopeClient<T> {
    endpoint: String,
    funnel: String,
    client_id: String,
    transport: T,
    context: ClientContext,
    state: Mutex<ClientState>,
}

impl<T: EnvelopeTransport> EnvelopeClient<T> {
    pub fn new(
        endpoint: impl Into<String>,
        funnel: impl Into<String>,
        transport: T,
        context: ClientContext,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            funnel: funnel.into(),
            client_id: uuid::Uuid::new_v4().to_string(),
            transport,
            context,
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn global_state(&self) -> Option<Value> {
        self.state.lock().await.global_state.clone()
    }

    pub async fn local_state(&self) -> Option<Value> {
        self.state.lock().await.local_state.clone()
    }

    pub async fn entries(&self) -> Vec<ServerEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Restore stored state; unless `silent`, open the conversation
    pub async fn start(&self, silent: bool) -> Option<Vec<MessageGroup>> {
        let mut state = self.state.lock().await;

        if let Some(global) = self.restore::<Value>(SessionKey::GlobalState).await {
            state.global_state = Some(global);
        }
        if let Some(local) = self.restore::<Value>(SessionKey::LocalState).await {
            state.local_state = Some(local);
        }
        if let Some(entries) = self.restore::<Vec<ServerEntry>>(SessionKey::Entries).await {
            state.entries = entries;
        }

        if silent {
            return None;
        }

        let envelope = ClientEnvelope {
            command: Some(Command {
                site: Some(self.endpoint.clone()),
                phrase: None,
            }),
            global_state: Some(json!({})),
            ..self.envelope(&state)
        };
        Some(self.post_envelope(&mut state, envelope, None).await)
    }

    /// Ask the bot a free-text question
    pub async fn send_message(&self, text: &str) -> Vec<MessageGroup> {
        let mut state = self.state.lock().await;
        let envelope = ClientEnvelope {
            command: Some(Command {
                site: None,
                phrase: Some(text.to_string()),
            }),
            ..self.envelope(&state)
        };
        self.post_envelope(&mut state, envelope, None).await
    }

    pub async fn help_action(&self) -> Vec<MessageGroup> {
        let mut state = self.state.lock().await;
        let envelope = ClientEnvelope {
            action: Some(EnvelopeAction {
                key: "help".to_string(),
                content: json!({ "$type": HELP_ACTION_TYPE }),
            }),
            ..self.envelope(&state)
        };
        self.post_envelope(&mut state, envelope, None).await
    }

    /// Fetch the next page of a paged list.
    ///
    /// Returns `group` with its link list grafted with the new page, or
    /// `None` when the group has no next action.
    pub async fn next_action(&self, group: &MessageGroup) -> Option<MessageGroup> {
        let paging = group.meta.paging.as_ref()?;
        let next = paging.next_action()?.clone();

        let mut state = self.state.lock().await;
        let envelope = ClientEnvelope {
            action: Some(EnvelopeAction {
                key: "next".to_string(),
                content: next,
            }),
            local_state: paging.local_state.clone(),
            ..self.envelope(&state)
        };
        let groups = self.post_envelope(&mut state, envelope, Some(group)).await;
        Some(graft_page(group, groups.first()))
    }

    /// Replay the action an entry offered for a contact method
    pub async fn show_contact_method_action(
        &self,
        request: &ContactMethodRequest,
    ) -> Option<Vec<MessageGroup>> {
        let mut state = self.state.lock().await;
        let (content, local_state) = {
            let entry = state.entries.iter().find(|e| e.id == request.entry_id)?;
            let content = entry.action(&request.action_key)?.clone();
            (content, entry.local_state.clone())
        };

        let envelope = ClientEnvelope {
            action: Some(EnvelopeAction {
                key: request.action_key.clone(),
                content,
            }),
            local_state,
            ..self.envelope(&state)
        };
        Some(self.post_envelope(&mut state, envelope, None).await)
    }

    /// Replay an action key offered by any received entry.
    ///
    /// The first entry offering the key wins.
    pub async fn default_action(&self, action_key: &str) -> Option<Vec<MessageGroup>> {
        let mut state = self.state.lock().await;
        let (content, local_state) = {
            let entry = state
                .entries
                .iter()
                .find(|e| e.action(action_key).is_some())?;
            let content = entry.action(action_key)?.clone();
            (content, entry.local_state.clone())
        };

        let envelope = ClientEnvelope {
            action: Some(EnvelopeAction {
                key: action_key.to_string(),
                content,
            }),
            local_state,
            ..self.envelope(&state)
        };
        Some(self.post_envelope(&mut state, envelope, None).await)
    }

    fn envelope(&self, state: &ClientState) -> ClientEnvelope {
        ClientEnvelope {
            global_state: state.global_state.clone(),
            client_id: self.client_id.clone(),
            funnel: self.funnel.clone(),
            ..Default::default()
        }
    }

    async fn post_envelope(
        &self,
        state: &mut ClientState,
        mut envelope: ClientEnvelope,
        prev_group: Option<&MessageGroup>,
    ) -> Vec<MessageGroup> {
        if envelope.local_state.is_none() {
            envelope.local_state.clone_from(&state.local_state);
        }

        let response = match self.transport.post(&self.endpoint, &envelope).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    client_id = %self.client_id,
                    kind = ?e.kind,
                    error = %e,
                    "Bot request failed"
                );
                ServerEnvelope::error(e.user_message())
            }
        };

        self.handle_response(state, response, prev_group).await
    }

    async fn handle_response(
        &self,
        state: &mut ClientState,
        response: ServerEnvelope,
        prev_group: Option<&MessageGroup>,
    ) -> Vec<MessageGroup> {
        state.entries.extend(response.entries.iter().cloned());
        self.persist(SessionKey::Entries, &state.entries).await;

        if let Some(widget) = response
            .entries
            .iter()
            .find(|e| e.kind == EntryKind::Widget)
        {
            self.context
                .widget_events
                .dispatch(WidgetEvent::WidgetEntry(widget.content.clone()));
        }

        if let Some(global) = response.global_state {
            self.persist(SessionKey::GlobalState, &global).await;
            state.global_state = Some(global);
        }

        if let Some(local) = response
            .entries
            .iter()
            .rev()
            .find_map(|e| e.local_state.clone())
        {
            state.local_state = Some(local);
        }
        self.persist(SessionKey::LocalState, &state.local_state).await;

        let batch = process_entries(&response.entries, prev_group);
        self.apply_effects(&batch.effects).await;
        batch.groups
    }

    async fn apply_effects(&self, effects: &[EntryEffect]) {
        for effect in effects {
            match effect {
                EntryEffect::SetServiceParameter { key, value } => {
                    if let Err(e) = self.context.parameters.set_parameter(key, value).await {
                        tracing::warn!(key = %key, error = %e, "Failed to set service parameter");
                    }
                }
            }
        }
    }

    async fn persist<V: Serialize + ?Sized + Sync>(&self, key: SessionKey, value: &V) {
        if let Err(e) = self.context.store.write(key, value).await {
            tracing::warn!(key = key.storage_key(), error = %e, "Failed to persist bot state");
        }
    }

    async fn restore<V: serde::de::DeserializeOwned>(&self, key: SessionKey) -> Option<V> {
        match self.context.store.read(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = key.storage_key(), error = %e, "Failed to restore bot state");
                None
            }
        }
    }
}

/// Graft the first list of a page response into the group's link list
fn graft_page(group: &MessageGroup, page: Option<&MessageGroup>) -> MessageGroup {
    let Some(page) = page else {
        return group.clone();
    };
    let Some(index) = group
        .items
        .iter()
        .position(|i| i.message.kind() == MessageKind::LinkList)
    else {
        return group.clone();
    };
    let Some(newer) = page
        .items
        .iter()
        .find(|i| i.message.is_list())
        .or_else(|| page.items.first())
    else {
        return group.clone();
    };

    let mut grafted = group.clone();
    grafted.meta = group.meta.merged(&page.meta);
    grafted.items[index].message = group.items[index].message.graft(&newer.message);
    grafted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::entry::{GUIDE_LIST_STATE, LAST_GUIDE_ID};
    use crate::bot::error::{TransportError, GENERIC_ERROR_MESSAGE, LOST_CONNECTION_MESSAGE};
    use crate::bot::parameters::MemoryParameters;
    use crate::bot::testing::MockTransport;
    use crate::message::MessageItem;
    use crate::storage::{KeyValueStorage, MemoryStorage};
    use std::sync::Mutex as StdMutex;

    const ENDPOINT: &str = "https://bot.example/conversations";

    struct Harness {
        client: EnvelopeClient<Arc<MockTransport>>,
        transport: Arc<MockTransport>,
        storage: Arc<MemoryStorage>,
        parameters: Arc<MemoryParameters>,
        widget_events: EventBus<WidgetEvent>,
    }

    fn harness() -> Harness {
        harness_with_storage(Arc::new(MemoryStorage::new()))
    }

    fn harness_with_storage(storage: Arc<MemoryStorage>) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let parameters = Arc::new(MemoryParameters::new());
        let widget_events = EventBus::new();
        let client = EnvelopeClient::new(
            ENDPOINT,
            "support",
            Arc::clone(&transport),
            ClientContext {
                store: BotStore::new(storage.clone()),
                widget_events: widget_events.clone(),
                parameters: parameters.clone(),
            },
        );
        Harness {
            client,
            transport,
            storage,
            parameters,
            widget_events,
        }
    }

    #[tokio::test]
    async fn test_silent_start_sends_nothing() {
        let h = harness();
        assert!(h.client.start(true).await.is_none());
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_start_sends_site_command() {
        let h = harness();
        h.transport.queue_entries(vec![
            json!({"id": "1", "type": "Text", "content": {"html": "Welcome"}}),
        ]);

        let groups = h.client.start(false).await.unwrap();
        assert_eq!(groups.len(), 1);

        let request = &h.transport.requests()[0];
        assert_eq!(request.command.as_ref().unwrap().site.as_deref(), Some(ENDPOINT));
        assert_eq!(request.global_state, Some(json!({})));
        assert_eq!(request.funnel, "support");
        assert_eq!(request.client_id, h.client.client_id());
        assert_eq!(h.transport.endpoints()[0], ENDPOINT);
    }

    #[tokio::test]
    async fn test_local_state_threads_through_requests() {
        let h = harness();
        h.transport.queue_entries(vec![
            json!({"id": "1", "type": "Text", "content": {"html": "a"}, "localState": {"step": 1}}),
            json!({"id": "2", "type": "Text", "content": {"html": "b"}, "localState": {"step": 2}}),
        ]);
        h.transport.queue_entries(vec![
            json!({"id": "3", "type": "Text", "content": {"html": "c"}}),
        ]);
        h.transport.queue_entries(vec![]);

        h.client.send_message("first").await;
        h.client.send_message("second").await;
        h.client.send_message("third").await;

        let requests = h.transport.requests();
        assert_eq!(requests[0].local_state, None);
        assert_eq!(requests[1].local_state, Some(json!({"step": 2})));
        // No entry declared a new one, previous value carries over
        assert_eq!(requests[2].local_state, Some(json!({"step": 2})));
        assert_eq!(requests[1].command.as_ref().unwrap().phrase.as_deref(), Some("second"));
        assert_eq!(h.client.entries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_global_state_replaced_and_persisted() {
        let h = harness();
        h.transport.queue_response(ServerEnvelope {
            global_state: Some(json!({"g": 1})),
            ..Default::default()
        });
        h.transport.queue_response(ServerEnvelope::default());

        h.client.send_message("one").await;
        h.client.send_message("two").await;

        assert_eq!(h.transport.requests()[1].global_state, Some(json!({"g": 1})));
        assert_eq!(
            h.storage.read("bot-provider-global-state").await.unwrap(),
            Some(json!({"g": 1}))
        );
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_group() {
        let h = harness();
        h.transport.queue_error(TransportError::network("offline"));
        h.transport.queue_error(TransportError::status(500, "boom"));

        let offline = h.client.send_message("hello").await;
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].items[0].message, MessageItem::html(LOST_CONNECTION_MESSAGE));

        let failed = h.client.send_message("hello").await;
        assert_eq!(failed[0].items[0].message, MessageItem::html(GENERIC_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_help_action_envelope() {
        let h = harness();
        h.transport.queue_entries(vec![]);
        h.client.help_action().await;

        let action = h.transport.requests()[0].action.clone().unwrap();
        assert_eq!(action.key, "help");
        assert_eq!(action.content, json!({"$type": HELP_ACTION_TYPE}));
    }

    #[tokio::test]
    async fn test_default_action_replays_first_matching_entry() {
        let h = harness();
        h.transport.queue_entries(vec![
            json!({"id": "1", "type": "Text", "actions": {"yes": {"v": 1}}, "localState": {"s": "one"}}),
            json!({"id": "2", "type": "Text", "actions": {"yes": {"v": 2}}, "localState": {"s": "two"}}),
        ]);
        h.transport.queue_entries(vec![]);

        h.client.send_message("q").await;
        assert!(h.client.default_action("missing").await.is_none());
        assert!(h.client.default_action("yes").await.is_some());

        let request = &h.transport.requests()[1];
        let action = request.action.as_ref().unwrap();
        assert_eq!(action.key, "yes");
        assert_eq!(action.content, json!({"v": 1}));
        assert_eq!(request.local_state, Some(json!({"s": "one"})));
    }

    #[tokio::test]
    async fn test_show_contact_method_requires_known_entry_and_action() {
        let h = harness();
        h.transport.queue_entries(vec![
            json!({"id": "CL", "type": "List", "actions": {"phone": {"guideId": 1}}}),
        ]);
        h.transport.queue_entries(vec![]);
        h.client.send_message("q").await;

        let unknown = ContactMethodRequest {
            contact_method: json!({}),
            entry_id: "nope".to_string(),
            action_key: "phone".to_string(),
        };
        assert!(h.client.show_contact_method_action(&unknown).await.is_none());

        let known = ContactMethodRequest {
            entry_id: "CL".to_string(),
            ..unknown
        };
        assert!(h.client.show_contact_method_action(&known).await.is_some());
        assert_eq!(h.transport.requests()[1].action.as_ref().unwrap().key, "phone");
    }

    #[tokio::test]
    async fn test_next_action_without_paging_is_none() {
        let h = harness();
        let group = MessageGroup::new(false);
        assert!(h.client.next_action(&group).await.is_none());
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_next_action_grafts_new_page() {
        let h = harness();
        h.transport.queue_entries(vec![
            json!({"id": "L", "type": "List", "localState": {"$type": GUIDE_LIST_STATE},
                   "content": {"header": "Questions", "items": [{"title": "A", "actionKey": "a"}]}}),
            json!({"id": "P", "type": "List", "relation": "L", "tags": ["paging"],
                   "content": {"items": [{"title": "More", "actionKey": "next"}]},
                   "actions": {"next": {"page": 2}}, "localState": {"paging": 1}}),
        ]);
        h.transport.queue_entries(vec![
            json!({"id": "L2", "type": "List", "localState": {"$type": GUIDE_LIST_STATE},
                   "content": {"items": [
                       {"title": "A", "actionKey": "a"}, {"title": "B", "actionKey": "b"}
                   ]}}),
        ]);

        let groups = h.client.send_message("q").await;
        let page = h.client.next_action(&groups[0]).await.unwrap();

        let request = &h.transport.requests()[1];
        let action = request.action.as_ref().unwrap();
        assert_eq!(action.key, "next");
        assert_eq!(action.content, json!({"page": 2}));
        assert_eq!(request.local_state, Some(json!({"paging": 1})));

        assert_eq!(page.id, groups[0].id);
        let list = page.items[0].message.list_content().unwrap();
        assert_eq!(list.header.as_deref(), Some("Questions"));
        assert_eq!(list.actions.len(), 2);
        assert_eq!(list.entry_id.as_deref(), Some("L2"));
        // The new page has no paging entry, the old paging survives the merge
        assert!(page.meta.paging.is_some());
    }

    #[tokio::test]
    async fn test_widget_entry_is_announced() {
        let h = harness();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = h.widget_events.subscribe(move |e| {
            if let WidgetEvent::WidgetEntry(content) = e {
                sink.lock().unwrap().push(content.clone());
            }
        });
        h.transport.queue_entries(vec![
            json!({"id": "W", "type": "Widget", "content": {"agent": {"name": "Guide"}}}),
        ]);

        let groups = h.client.send_message("q").await;
        assert!(groups.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![json!({"agent": {"name": "Guide"}})]);
    }

    #[tokio::test]
    async fn test_guide_hint_sets_service_parameter() {
        let h = harness();
        h.transport.queue_entries(vec![
            json!({"id": "1", "type": "Text", "tags": ["guide"], "content": {"html": "x", "hints": [{"id": "g7"}]}}),
        ]);
        h.client.send_message("q").await;
        assert_eq!(h.parameters.get(LAST_GUIDE_ID).as_deref(), Some("g7"));
    }

    #[tokio::test]
    async fn test_start_restores_stored_state() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let first = harness_with_storage(storage.clone());
            first.transport.queue_response(ServerEnvelope {
                entries: vec![serde_json::from_value(json!({
                    "id": "1", "type": "Text", "actions": {"again": true}, "localState": {"l": 1}
                }))
                .unwrap()],
                global_state: Some(json!({"g": 1})),
                ..Default::default()
            });
            first.client.send_message("q").await;
        }

        let second = harness_with_storage(storage);
        second.client.start(true).await;
        assert_eq!(second.client.global_state().await, Some(json!({"g": 1})));
        assert_eq!(second.client.local_state().await, Some(json!({"l": 1})));
        assert_eq!(second.client.entries().await.len(), 1);
    }
}
