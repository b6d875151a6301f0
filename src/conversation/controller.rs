//! Conversation controller
//!
//! Owns the ordered message list, typing indicators, the loading counter
//! and the set of active providers for one conversation. Every change is
//! announced on the controller's [`EventBus`]; the state lock is never held
//! while listeners run.

use super::event::ConversationEvent;
use super::history::{ConversationHistory, ConversationLogMessage};
use super::provider::{ConversationOptions, ConversationProvider, User};
use super::store::TranscriptStore;
use super::types::{
    normalize_message, AgentRecord, ConversationMessage, MessageContent, MessageInput,
    MessageSender, MessageStream, MessageType, UiAction,
};
use crate::events::{EventBus, WidgetEvent};
use crate::storage::KeyValueStorage;
use crate::sync::lock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    /// Persist the transcript and replay it when the conversation starts
    pub rehydrate: bool,
}

struct MessageSlot {
    slot: u64,
    message: ConversationMessage,
}

#[derive(Default)]
struct ControllerState {
    providers: Vec<String>,
    queued_providers: Vec<String>,
    registered: Vec<Arc<ConversationProvider>>,
    active: bool,
    component_mounted: bool,
    loaders: usize,
    messages: Vec<MessageSlot>,
    typing_actors: Vec<MessageSender>,
    next_slot: u64,
    disposed: bool,
}

pub struct ConversationController {
    id: String,
    events: EventBus<ConversationEvent>,
    state: Mutex<ControllerState>,
    store: Arc<TranscriptStore>,
    history: ConversationHistory,
    weak_self: Weak<ConversationController>,
}

impl ConversationController {
    pub fn new(
        id: impl Into<String>,
        widget_events: &EventBus<WidgetEvent>,
        storage: Arc<dyn KeyValueStorage>,
        options: ControllerOptions,
    ) -> Arc<Self> {
        let id = id.into();
        let controller = Arc::new_cyclic(|weak_self| Self {
            store: Arc::new(TranscriptStore::new(storage, &id, options.rehydrate)),
            history: ConversationHistory::new(widget_events),
            events: EventBus::new(),
            state: Mutex::new(ControllerState::default()),
            weak_self: weak_self.clone(),
            id,
        });
        TranscriptStore::attach(&controller.store, &controller);
        controller
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> &EventBus<ConversationEvent> {
        &self.events
    }

    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn user(&self) -> User {
        User::new(self.weak_self.clone())
    }

    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }

    pub fn component_mounted(&self) -> bool {
        lock(&self.state).component_mounted
    }

    pub fn providers(&self) -> Vec<String> {
        lock(&self.state).providers.clone()
    }

    pub fn queued_providers(&self) -> Vec<String> {
        lock(&self.state).queued_providers.clone()
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        lock(&self.state)
            .messages
            .iter()
            .map(|slot| slot.message.clone())
            .collect()
    }

    // ==================== Providers ====================

    /// Replace the active provider set, announcing the difference
    pub fn set_providers(&self, providers: Vec<String>) {
        let (added, removed) = {
            let mut state = lock(&self.state);
            let removed: Vec<String> = state
                .providers
                .iter()
                .filter(|p| !providers.contains(p))
                .cloned()
                .collect();
            state.providers.retain(|p| providers.contains(p));

            let mut added = Vec::new();
            for provider in providers {
                if !state.providers.contains(&provider) {
                    state.providers.push(provider.clone());
                    added.push(provider);
                }
            }
            (added, removed)
        };

        if !added.is_empty() || !removed.is_empty() {
            tracing::debug!(conversation_id = %self.id, ?added, ?removed, "Providers changed");
            self.events
                .dispatch(ConversationEvent::ProvidersChanged { added, removed });
        }
    }

    /// Provider instance for `name` on this conversation, created on first use
    pub fn create_provider(&self, name: &str) -> Arc<ConversationProvider> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.registered.iter().find(|p| p.name() == name) {
            return Arc::clone(existing);
        }
        let provider = Arc::new(ConversationProvider::new(name, self.weak_self.clone()));
        state.registered.push(Arc::clone(&provider));
        provider
    }

    pub fn provider_index(&self, name: &str) -> Option<usize> {
        lock(&self.state).providers.iter().position(|p| p == name)
    }

    pub fn registered_provider(&self, name: &str) -> Option<Arc<ConversationProvider>> {
        lock(&self.state)
            .registered
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn set_provider_options(&self, name: &str, options: ConversationOptions) {
        if let Some(provider) = self.registered_provider(name) {
            provider.set_options(options);
        }
    }

    /// Remove a provider; the controller disposes itself with the last one
    pub(crate) fn dispose_provider(&self, name: &str) {
        let last = {
            let mut state = lock(&self.state);
            state.registered.retain(|p| p.name() != name);
            state.registered.is_empty() && !state.disposed
        };

        self.events.dispatch(ConversationEvent::ProvidersChanged {
            added: Vec::new(),
            removed: vec![name.to_string()],
        });

        if last {
            self.dispose();
        }
    }

    /// Hand the conversation to `name`, queueing the current providers
    pub fn swap_provider(&self, name: &str) {
        let current = self.silence_providers();
        self.queue_providers(current);
        self.set_providers(vec![name.to_string()]);
    }

    /// Mark every active provider silent so it resumes without a greeting
    fn silence_providers(&self) -> Vec<String> {
        let current = self.providers();
        for provider in &current {
            self.set_provider_options(provider, ConversationOptions { silent: true });
        }
        current
    }

    /// Swap to `name` if a provider of that name is registered
    pub fn change_provider(&self, name: &str) -> bool {
        if self.registered_provider(name).is_none() {
            return false;
        }
        self.swap_provider(name);
        true
    }

    /// Providers to resume once the current one completes
    pub fn queue_providers(&self, providers: Vec<String>) {
        lock(&self.state).queued_providers = providers;
    }

    /// Hand the conversation back to the queued providers
    pub fn on_complete_provider(&self) {
        let queued = std::mem::take(&mut lock(&self.state).queued_providers);
        if queued.is_empty() {
            return;
        }
        self.silence_providers();
        self.set_providers(queued);
    }

    pub fn get_agent_by_id(&self, id: &str) -> Option<AgentRecord> {
        self.store.get_stored_agent(id)
    }

    pub fn set_initial_storage(&self, agents: Vec<AgentRecord>) {
        self.store.set_initial_agents(agents);
    }

    pub async fn is_rehydrated(&self) -> bool {
        match self.store.is_rehydrated().await {
            Ok(rehydrated) => rehydrated,
            Err(e) => {
                tracing::warn!(conversation_id = %self.id, error = %e, "Failed to read transcript");
                false
            }
        }
    }

    // ==================== Lifecycle ====================

    pub fn set_component_mounted_state(&self, mounted: bool) {
        let started = {
            let mut state = lock(&self.state);
            state.component_mounted = mounted;
            if mounted && !state.active {
                state.active = true;
                true
            } else {
                false
            }
        };

        self.events
            .dispatch(ConversationEvent::ComponentMountChanged(mounted));
        if mounted {
            self.events.dispatch(ConversationEvent::UnreadMessage(false));
        }
        if started {
            self.events.dispatch(ConversationEvent::Started);
        }
    }

    /// Detach every provider and drop all messages
    pub fn dispose(&self) {
        let providers = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.registered)
        };

        self.history.dispose();
        for provider in providers {
            provider.detach();
        }

        {
            let mut state = lock(&self.state);
            state.messages.clear();
            state.typing_actors.clear();
            state.active = false;
        }

        tracing::info!(conversation_id = %self.id, "Conversation disposed");
        self.events.dispatch(ConversationEvent::ControllerDisposed {
            conversation_id: self.id.clone(),
        });
    }

    // ==================== Messages ====================

    pub fn create_entry(
        &self,
        key: String,
        content: MessageContent,
        message_type: MessageType,
        sender: Option<MessageSender>,
        timestamp: Option<i64>,
    ) -> ConversationEntry {
        let message = ConversationMessage {
            key,
            timestamp,
            content: Some(content),
            sender,
            message_type,
        };

        let (slot, mounted) = {
            let mut state = lock(&self.state);
            if state.disposed {
                tracing::warn!(conversation_id = %self.id, "Entry created on disposed conversation");
            }
            state.next_slot += 1;
            let slot = state.next_slot;
            state.messages.push(MessageSlot {
                slot,
                message: message.clone(),
            });
            if message_type == MessageType::Agent {
                if let Some(sender) = &message.sender {
                    state.typing_actors.retain(|actor| actor != sender);
                }
            }
            (slot, state.component_mounted)
        };

        self.events.dispatch(ConversationEvent::MessageCreated(message));
        self.update();
        if !mounted {
            self.events.dispatch(ConversationEvent::UnreadMessage(true));
        }

        ConversationEntry {
            controller: self.weak_self.clone(),
            slot,
        }
    }

    /// Print a system message
    pub fn print(&self, input: impl Into<MessageInput>) -> ConversationEntry {
        let normalized = normalize_message(input.into(), None);
        self.create_entry(
            normalized.key,
            normalized.content,
            MessageType::System,
            None,
            normalized.timestamp,
        )
    }

    fn write_entry(&self, slot: u64, update: Option<(MessageContent, Option<i64>)>) {
        let message = {
            let mut state = lock(&self.state);
            let Some(index) = state.messages.iter().position(|m| m.slot == slot) else {
                return;
            };
            match update {
                Some((content, timestamp)) => {
                    let message = &mut state.messages[index].message;
                    message.content = Some(content);
                    if timestamp.is_some() {
                        message.timestamp = timestamp;
                    }
                    message.clone()
                }
                None => {
                    let mut removed = state.messages.remove(index).message;
                    removed.content = None;
                    removed
                }
            }
        };

        self.events.dispatch(ConversationEvent::MessageUpdated(message));
        self.update();
    }

    pub fn get_message_stream(&self) -> MessageStream {
        let state = lock(&self.state);
        MessageStream {
            messages: state.messages.iter().map(|m| m.message.clone()).collect(),
            loading: state.loaders > 0,
            typing_actors: state.typing_actors.clone(),
        }
    }

    /// Announce the current message stream
    pub fn update(&self) {
        self.events
            .dispatch(ConversationEvent::Updated(self.get_message_stream()));
    }

    pub fn get_history(&self) -> Vec<ConversationLogMessage> {
        self.history.get_conversation_logs(&self.messages())
    }

    // ==================== Indicators ====================

    /// Show `sender` as typing until the handle is cleared or the sender
    /// prints an agent message
    pub fn set_typing_state(&self, sender: MessageSender) -> TypingHandle {
        let changed = {
            let mut state = lock(&self.state);
            if state.typing_actors.contains(&sender) {
                false
            } else {
                state.typing_actors.push(sender.clone());
                true
            }
        };
        if changed {
            self.update();
        }
        TypingHandle {
            controller: self.weak_self.clone(),
            sender,
        }
    }

    fn remove_typing_state(&self, sender: &MessageSender) {
        let changed = {
            let mut state = lock(&self.state);
            let before = state.typing_actors.len();
            state.typing_actors.retain(|actor| actor != sender);
            before != state.typing_actors.len()
        };
        if changed {
            self.update();
        }
    }

    /// Raise the loading counter until the handle is cancelled or dropped
    pub fn loader(&self) -> LoaderHandle {
        let first = {
            let mut state = lock(&self.state);
            state.loaders += 1;
            state.loaders == 1
        };
        if first {
            self.update();
        }
        LoaderHandle {
            controller: self.weak_self.clone(),
            dismissed: AtomicBool::new(false),
        }
    }

    fn release_loader(&self) {
        let idle = {
            let mut state = lock(&self.state);
            state.loaders = state.loaders.saturating_sub(1);
            state.loaders == 0
        };
        if idle {
            self.update();
        }
    }

    // ==================== UI actions ====================

    pub fn user_submit(&self, text: impl Into<String>) {
        self.events
            .dispatch(ConversationEvent::UserSubmit { text: text.into() });
    }

    pub fn action(&self, action: UiAction) {
        self.events.dispatch(ConversationEvent::Action(action));
    }

    pub fn evaluate(&self, payload: Value) {
        self.events.dispatch(ConversationEvent::Evaluate(payload));
    }

    pub fn submit_form(&self, payload: Value) {
        self.events.dispatch(ConversationEvent::FormSubmitted(payload));
    }
}

/// Handle to a printed message
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    controller: Weak<ConversationController>,
    slot: u64,
}

impl ConversationEntry {
    /// Replace the message content
    pub fn update(&self, input: impl Into<MessageInput>) {
        if let Some(controller) = self.controller.upgrade() {
            controller.write_entry(self.slot, Some(input.into().into_update()));
        }
    }

    /// Remove the message from the conversation
    pub fn remove(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.write_entry(self.slot, None);
        }
    }

    /// Current message, `None` once removed
    pub fn message(&self) -> Option<ConversationMessage> {
        let controller = self.controller.upgrade()?;
        let state = lock(&controller.state);
        state
            .messages
            .iter()
            .find(|m| m.slot == self.slot)
            .map(|m| m.message.clone())
    }
}

#[derive(Debug)]
pub struct TypingHandle {
    controller: Weak<ConversationController>,
    sender: MessageSender,
}

impl TypingHandle {
    pub(crate) fn detached(sender: MessageSender) -> Self {
        Self {
            controller: Weak::new(),
            sender,
        }
    }

    pub fn clear(self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.remove_typing_state(&self.sender);
        }
    }
}

/// Loading indicator reference; releases on `cancel` or drop
#[derive(Debug)]
pub struct LoaderHandle {
    controller: Weak<ConversationController>,
    dismissed: AtomicBool,
}

impl LoaderHandle {
    pub(crate) fn detached() -> Self {
        Self {
            controller: Weak::new(),
            dismissed: AtomicBool::new(true),
        }
    }

    /// Release this loader. Later calls are no-ops.
    pub fn cancel(&self) {
        if self.dismissed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(controller) = self.controller.upgrade() {
            controller.release_loader();
        }
    }
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
