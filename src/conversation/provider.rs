//! Conversation providers, agents and the user

use super::controller::{ConversationController, ConversationEntry, LoaderHandle, TypingHandle};
use super::event::ConversationEvent;
use super::history::ConversationLogMessage;
use super::types::{
    normalize_message, AgentRecord, MessageContent, MessageInput, MessageSender, MessageType,
};
use crate::events::Subscription;
use crate::sync::lock;
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationOptions {
    /// Provider should not greet the user when (re)activated
    pub silent: bool,
}

/// One named participant source attached to a conversation
pub struct ConversationProvider {
    name: String,
    controller: Mutex<Weak<ConversationController>>,
    options: Mutex<ConversationOptions>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ConversationProvider {
    pub(crate) fn new(name: &str, controller: Weak<ConversationController>) -> Self {
        Self {
            name: name.to_string(),
            controller: Mutex::new(controller),
            options: Mutex::new(ConversationOptions::default()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning controller, `None` once disposed
    pub fn controller(&self) -> Option<Arc<ConversationController>> {
        lock(&self.controller).upgrade()
    }

    pub fn options(&self) -> ConversationOptions {
        *lock(&self.options)
    }

    pub fn set_options(&self, options: ConversationOptions) {
        *lock(&self.options) = options;
    }

    pub fn user(&self) -> Option<User> {
        self.controller().map(|c| c.user())
    }

    /// Create an agent, merging a stored agent record of the same id.
    ///
    /// Only agents unknown to the transcript are announced.
    pub fn create_agent(self: &Arc<Self>, settings: AgentSettings) -> Option<Agent> {
        let controller = self.controller()?;
        let stored = settings
            .id
            .as_deref()
            .and_then(|id| controller.get_agent_by_id(id));

        let agent = match &stored {
            Some(record) => Agent::new(
                Arc::clone(self),
                AgentSettings {
                    id: Some(record.id.clone()),
                    name: settings.name.or_else(|| record.name.clone()),
                    avatar: settings.avatar.or_else(|| record.avatar.clone()),
                },
            ),
            None => Agent::new(Arc::clone(self), settings),
        };

        if stored.is_none() {
            controller
                .events()
                .dispatch(ConversationEvent::AgentCreated(agent.record()));
        }
        Some(agent)
    }

    /// Print a system message
    pub fn print(&self, input: impl Into<MessageInput>) -> Option<ConversationEntry> {
        self.controller().map(|c| c.print(input))
    }

    pub fn create_entry(
        &self,
        key: String,
        content: MessageContent,
        message_type: MessageType,
        sender: Option<MessageSender>,
        timestamp: Option<i64>,
    ) -> Option<ConversationEntry> {
        self.controller()
            .map(|c| c.create_entry(key, content, message_type, sender, timestamp))
    }

    pub fn set_typing_state(&self, sender: MessageSender) -> TypingHandle {
        match self.controller() {
            Some(controller) => controller.set_typing_state(sender),
            None => TypingHandle::detached(sender),
        }
    }

    pub fn loading(&self) -> LoaderHandle {
        match self.controller() {
            Some(controller) => controller.loader(),
            None => LoaderHandle::detached(),
        }
    }

    pub async fn is_rehydrated(&self) -> bool {
        match self.controller() {
            Some(controller) => controller.is_rehydrated().await,
            None => false,
        }
    }

    pub fn get_history(&self) -> Vec<ConversationLogMessage> {
        self.controller()
            .map(|c| c.get_history())
            .unwrap_or_default()
    }

    /// Signal that this provider is done and the queued one may resume
    pub fn complete(&self) {
        if let Some(controller) = self.controller() {
            controller.on_complete_provider();
        }
    }

    /// Invoke `listener` whenever the unread state changes
    pub fn on_unread_message<F>(&self, listener: F) -> Option<Subscription>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let controller = self.controller()?;
        let subscription = controller.events().subscribe(move |event| {
            if let ConversationEvent::UnreadMessage(unread) = event {
                listener(*unread);
            }
        });
        lock(&self.subscriptions).push(subscription.clone());
        Some(subscription)
    }

    /// Invoke `listener` with the current mount state and on every change
    pub fn on_mounted<F>(&self, listener: F) -> Option<Subscription>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let controller = self.controller()?;
        listener(controller.component_mounted());
        let subscription = controller.events().subscribe(move |event| {
            if let ConversationEvent::ComponentMountChanged(mounted) = event {
                listener(*mounted);
            }
        });
        lock(&self.subscriptions).push(subscription.clone());
        Some(subscription)
    }

    /// Leave the conversation
    pub fn dispose(&self) {
        let controller = std::mem::take(&mut *lock(&self.controller)).upgrade();
        self.cancel_subscriptions();
        if let Some(controller) = controller {
            controller.dispose_provider(&self.name);
        }
    }

    /// Drop the controller link without notifying it
    pub(crate) fn detach(&self) {
        *lock(&self.controller) = Weak::new();
        self.cancel_subscriptions();
    }

    fn cancel_subscriptions(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for subscription in subscriptions {
            subscription.cancel();
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSettings {
    pub id: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Profile change; `Some(None)` clears a field, empty strings are ignored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentUpdate {
    pub name: Option<Option<String>>,
    pub avatar: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
struct AgentProfile {
    name: Option<String>,
    avatar: Option<String>,
}

/// A named participant printing messages on behalf of a provider
pub struct Agent {
    provider: Arc<ConversationProvider>,
    id: String,
    profile: Mutex<AgentProfile>,
}

impl Agent {
    pub(crate) fn new(provider: Arc<ConversationProvider>, settings: AgentSettings) -> Self {
        Self {
            provider,
            id: settings
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            profile: Mutex::new(AgentProfile {
                name: settings.name,
                avatar: settings.avatar,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<String> {
        lock(&self.profile).name.clone()
    }

    pub fn avatar(&self) -> Option<String> {
        lock(&self.profile).avatar.clone()
    }

    pub fn sender(&self) -> MessageSender {
        let profile = lock(&self.profile);
        MessageSender {
            name: profile.name.clone(),
            avatar: profile.avatar.clone(),
            id: Some(self.id.clone()),
        }
    }

    pub fn record(&self) -> AgentRecord {
        let profile = lock(&self.profile);
        AgentRecord {
            id: self.id.clone(),
            name: profile.name.clone(),
            avatar: profile.avatar.clone(),
            provider_name: self.provider.name().to_string(),
        }
    }

    pub fn print(
        &self,
        input: impl Into<MessageInput>,
        key: Option<&str>,
    ) -> Option<ConversationEntry> {
        let normalized = normalize_message(input.into(), key);
        self.provider.create_entry(
            normalized.key,
            normalized.content,
            MessageType::Agent,
            Some(self.sender()),
            normalized.timestamp,
        )
    }

    pub fn typing(&self) -> TypingHandle {
        self.provider.set_typing_state(self.sender())
    }

    pub fn update(&self, update: AgentUpdate) {
        {
            let mut profile = lock(&self.profile);
            apply_field(&mut profile.name, update.name);
            apply_field(&mut profile.avatar, update.avatar);
        }
        if let Some(controller) = self.provider.controller() {
            controller
                .events()
                .dispatch(ConversationEvent::AgentUpdated(self.record()));
        }
    }
}

fn apply_field(field: &mut Option<String>, change: Option<Option<String>>) {
    match change {
        Some(None) => *field = None,
        Some(Some(value)) if !value.is_empty() => *field = Some(value),
        _ => {}
    }
}

// ============================================================================
// User
// ============================================================================

/// The person on the widget side of the conversation
#[derive(Debug, Clone)]
pub struct User {
    controller: Weak<ConversationController>,
}

impl User {
    pub(crate) fn new(controller: Weak<ConversationController>) -> Self {
        Self { controller }
    }

    pub fn print(
        &self,
        input: impl Into<MessageInput>,
        key: Option<&str>,
    ) -> Option<ConversationEntry> {
        let controller = self.controller.upgrade()?;
        let normalized = normalize_message(input.into(), key);
        Some(controller.create_entry(
            normalized.key,
            normalized.content,
            MessageType::User,
            None,
            normalized.timestamp,
        ))
    }
}
