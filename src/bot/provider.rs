//! Bot provider
//!
//! Binds one conversation provider to the envelope client: user input and
//! UI actions become envelopes, the resulting message groups are printed
//! by the bot agent (or the user, for echoed choices).

use super::client::{ClientContext, EnvelopeClient};
use super::parameters::ServiceParameters;
use super::store::{AgentMeta, BotStore, ConversationMeta, SessionKey};
use super::transport::EnvelopeTransport;
use super::types::MessageGroup;
use crate::conversation::{
    Agent, AgentSettings, AgentUpdate, ConversationEvent, ConversationProvider, UiAction,
};
use crate::events::{ContactMethodRequest, EventBus, Subscription, WidgetEvent};
use crate::message::MessageItem;
use crate::sync::{lock, spawn_detached};
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};

/// Stable agent id; lets stored transcripts find the bot again
pub const AGENT_ID: &str = "knowledge-bot-agent";
/// Service parameter holding the user's last phrase
pub const PHRASE_PARAMETER: &str = "phrase";

/// Collaborators shared by every bot provider of a widget
pub struct BotContext<T> {
    pub transport: T,
    pub store: BotStore,
    pub widget_events: EventBus<WidgetEvent>,
    pub parameters: Arc<dyn ServiceParameters>,
    pub endpoint: String,
    pub funnel: String,
}

pub struct KnowledgeBotProvider<T> {
    conversation: Arc<ConversationProvider>,
    agent: Agent,
    client: EnvelopeClient<T>,
    store: BotStore,
    widget_events: EventBus<WidgetEvent>,
    parameters: Arc<dyn ServiceParameters>,
    groups: Mutex<Vec<MessageGroup>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl<T: EnvelopeTransport + 'static> KnowledgeBotProvider<T> {
    /// Create the bot agent and wire widget and conversation events.
    ///
    /// `None` when the provider has already left its conversation.
    pub fn new(conversation: Arc<ConversationProvider>, ctx: BotContext<T>) -> Option<Arc<Self>> {
        let agent = conversation.create_agent(AgentSettings {
            id: Some(AGENT_ID.to_string()),
            name: Some(String::new()),
            avatar: None,
        })?;
        let controller = conversation.controller()?;

        let client = EnvelopeClient::new(
            ctx.endpoint,
            ctx.funnel,
            ctx.transport,
            ClientContext {
                store: ctx.store.clone(),
                widget_events: ctx.widget_events.clone(),
                parameters: Arc::clone(&ctx.parameters),
            },
        );

        let provider = Arc::new(Self {
            conversation,
            agent,
            client,
            store: ctx.store,
            widget_events: ctx.widget_events,
            parameters: ctx.parameters,
            groups: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&provider);
        let widget = provider.widget_events.subscribe(move |event| {
            let Some(provider) = weak.upgrade() else {
                return;
            };
            match event {
                WidgetEvent::WidgetEntry(content) => {
                    provider.on_widget_entry_received(content);
                }
                WidgetEvent::OpenContactMethod(request) => {
                    let request = request.clone();
                    spawn_detached("open contact method", async move {
                        provider.on_open_contact_method(request).await;
                    });
                }
                _ => {}
            }
        });

        let weak = Arc::downgrade(&provider);
        let conversation = controller
            .events()
            .subscribe(move |event| on_conversation_event(&weak, event));

        lock(&provider.subscriptions).extend([widget, conversation]);
        Some(provider)
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn client(&self) -> &EnvelopeClient<T> {
        &self.client
    }

    /// Groups printed so far
    pub fn groups(&self) -> Vec<MessageGroup> {
        lock(&self.groups).clone()
    }

    /// Restore branding and open the conversation.
    ///
    /// Rehydrated conversations only restore client state.
    pub async fn initialize(&self) {
        match self.store.read::<ConversationMeta>(SessionKey::Meta).await {
            Ok(Some(ConversationMeta { agent: Some(meta) })) => self.apply_agent_meta(&meta),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to restore conversation meta"),
        }

        if self.conversation.is_rehydrated().await {
            self.client.start(true).await;
            return;
        }

        let loader = self.conversation.loading();
        let silent = self.conversation.options().silent;
        if let Some(groups) = self.client.start(silent).await {
            self.on_messages_received(groups);
        }
        loader.cancel();
    }

    /// Print groups and remember their writers
    pub fn on_messages_received(&self, groups: Vec<MessageGroup>) {
        let user = self.conversation.user();
        let mut printed = Vec::with_capacity(groups.len());
        for mut group in groups {
            group.writer = if group.is_user {
                user.as_ref().and_then(|u| u.print(group.messages(), None))
            } else {
                self.agent.print(group.messages(), None)
            };
            printed.push(group);
        }
        lock(&self.groups).extend(printed);
    }

    pub async fn on_input(&self, action: UiAction) {
        match action.action_key.as_str() {
            "next" => self.next_page(&action).await,
            "help" => {
                let loader = self.conversation.loading();
                let groups = self.client.help_action().await;
                self.on_messages_received(groups);
                loader.cancel();
            }
            key => {
                if let Some(label) = action.label.as_deref().filter(|l| !l.is_empty()) {
                    self.print_user_message(label);
                }
                let loader = self.conversation.loading();
                if let Some(groups) = self.client.default_action(key).await {
                    self.on_messages_received(groups);
                }
                loader.cancel();
            }
        }
    }

    async fn next_page(&self, action: &UiAction) {
        let Some(group_id) = action
            .data
            .as_ref()
            .and_then(|d| d.get("groupId"))
            .and_then(Value::as_str)
        else {
            tracing::debug!("Next action without a target group");
            return;
        };

        let Some(group) = lock(&self.groups).iter().find(|g| g.id == group_id).cloned() else {
            tracing::debug!(group_id, "Next action for an unknown group");
            return;
        };

        let Some(mut updated) = self.client.next_action(&group).await else {
            return;
        };
        updated.writer.clone_from(&group.writer);
        if let Some(writer) = &updated.writer {
            writer.update(updated.messages());
        }

        let mut groups = lock(&self.groups);
        if let Some(slot) = groups.iter_mut().find(|g| g.id == updated.id) {
            *slot = updated;
        }
    }

    /// Echo text as a user bubble
    pub fn print_user_message(&self, text: &str) {
        let group = MessageGroup::with_items(true, vec![MessageItem::html(text)]);
        self.on_messages_received(vec![group]);
    }

    pub async fn on_message_send(&self, text: &str) {
        self.print_user_message(text);

        let loader = self.conversation.loading();
        let typing = self.agent.typing();
        let groups = self.client.send_message(text).await;
        typing.clear();
        self.on_messages_received(groups);
        loader.cancel();

        if let Err(e) = self.parameters.set_parameter(PHRASE_PARAMETER, text).await {
            tracing::warn!(error = %e, "Failed to sync phrase");
        }
    }

    /// Apply agent branding from a `Widget` entry and persist it
    pub fn on_widget_entry_received(&self, content: &Value) {
        let Some(meta) = content
            .get("agent")
            .and_then(|a| serde_json::from_value::<AgentMeta>(a.clone()).ok())
        else {
            return;
        };
        self.apply_agent_meta(&meta);

        let store = self.store.clone();
        spawn_detached("conversation meta write", async move {
            let meta = ConversationMeta { agent: Some(meta) };
            if let Err(e) = store.write(SessionKey::Meta, &meta).await {
                tracing::warn!(error = %e, "Failed to persist conversation meta");
            }
        });
    }

    pub async fn on_open_contact_method(&self, request: ContactMethodRequest) {
        let loader = self.conversation.loading();
        if let Some(groups) = self.client.show_contact_method_action(&request).await {
            if !groups.is_empty() {
                if let Some(title) = request
                    .contact_method
                    .get("title")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                {
                    self.print_user_message(title);
                }
                self.on_messages_received(groups);
            }
        }
        loader.cancel();
    }

    /// Stop reacting to events; printed messages stay
    pub fn dispose(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for subscription in subscriptions {
            subscription.cancel();
        }
        tracing::debug!(provider = %self.conversation.name(), "Bot provider disposed");
    }

    fn apply_agent_meta(&self, meta: &AgentMeta) {
        self.agent.update(AgentUpdate {
            name: meta.name.clone().map(Some),
            avatar: meta.avatar.clone().map(Some),
        });
    }
}

fn on_conversation_event<T: EnvelopeTransport + 'static>(
    provider: &Weak<KnowledgeBotProvider<T>>,
    event: &ConversationEvent,
) {
    let Some(provider) = provider.upgrade() else {
        return;
    };

    match event {
        ConversationEvent::UserSubmit { text } => {
            let text = text.clone();
            spawn_detached("user submit", async move {
                provider.on_message_send(&text).await;
            });
        }
        ConversationEvent::Action(action) => {
            let action = action.clone();
            spawn_detached("ui action", async move {
                provider.on_input(action).await;
            });
        }
        ConversationEvent::Evaluate(payload) => {
            provider
                .widget_events
                .dispatch(WidgetEvent::Evaluate(payload.clone()));
        }
        ConversationEvent::FormSubmitted(payload) => {
            provider
                .widget_events
                .dispatch(WidgetEvent::FormSubmitted(payload.clone()));
        }
        _ => {}
    }
}
