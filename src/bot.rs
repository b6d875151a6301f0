//! Knowledge-bot provider
//!
//! Turns bot envelopes into conversation messages. [`register`] installs
//! the `ace-knowledge-bot` provider on a [`ConversationPlatform`]; every
//! conversation listing it gets its own [`KnowledgeBotProvider`] with its
//! own [`EnvelopeClient`].

mod client;
mod contact;
mod entry;
mod error;
mod parameters;
mod provider;
mod store;
mod transport;
mod types;

#[cfg(test)]
pub mod testing;

#[cfg(test)]
mod proptests;

pub use client::{ClientContext, EnvelopeClient, HELP_ACTION_TYPE};
pub use contact::{ContactMethodSettings, Symbol};
pub use entry::{
    get_list_type, process_entries, EntryBatch, EntryEffect, CONTACT_STATE, GUIDE_FEEDBACK_STATE,
    GUIDE_LIST_STATE, LAST_GUIDE_ID,
};
pub use error::{TransportError, TransportErrorKind, GENERIC_ERROR_MESSAGE, LOST_CONNECTION_MESSAGE};
pub use parameters::{MemoryParameters, ServiceParameters};
pub use provider::{BotContext, KnowledgeBotProvider, AGENT_ID, PHRASE_PARAMETER};
pub use store::{AgentMeta, BotStore, ConversationMeta, SessionKey};
pub use transport::{EnvelopeTransport, HttpTransport, LoggingTransport};
pub use types::*;

use crate::config::{knowledge_bot_endpoint, WidgetSettings};
use crate::conversation::{
    ConversationComponent, ConversationHandler, ConversationPlatform, ConversationProvider,
    Disposer,
};
use crate::events::{EventBus, WidgetEvent};
use crate::storage::KeyValueStorage;
use crate::sync::spawn_detached;
use std::sync::Arc;

/// Name the bot provider is registered under
pub const PROVIDER_NAME: &str = "ace-knowledge-bot";

/// Everything the bot needs besides the conversation itself
#[derive(Clone)]
pub struct BotRegistration {
    pub transport: Arc<dyn EnvelopeTransport>,
    pub storage: Arc<dyn KeyValueStorage>,
    pub widget_events: EventBus<WidgetEvent>,
    pub parameters: Arc<dyn ServiceParameters>,
    pub settings: WidgetSettings,
}

/// Register the knowledge-bot provider
pub fn register(platform: &ConversationPlatform, registration: BotRegistration) {
    let handler: ConversationHandler = Arc::new(
        move |conversation: Arc<ConversationProvider>,
              component: &ConversationComponent|
              -> Option<Disposer> { attach(&registration, conversation, component) },
    );
    platform.register_provider(PROVIDER_NAME, handler);
}

fn attach(
    registration: &BotRegistration,
    conversation: Arc<ConversationProvider>,
    component: &ConversationComponent,
) -> Option<Disposer> {
    let endpoint = match knowledge_bot_endpoint(&component.properties, &registration.settings) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::error!(component = %component.name, error = %e, "Cannot start knowledge bot");
            return None;
        }
    };

    let bot = KnowledgeBotProvider::new(
        conversation,
        BotContext {
            transport: Arc::clone(&registration.transport),
            store: BotStore::new(Arc::clone(&registration.storage)),
            widget_events: registration.widget_events.clone(),
            parameters: Arc::clone(&registration.parameters),
            endpoint,
            funnel: registration.settings.funnel(),
        },
    )?;

    tracing::info!(
        component = %component.name,
        endpoint = %bot.client().endpoint(),
        client_id = %bot.client().client_id(),
        "Knowledge bot attached"
    );

    let initializing = Arc::clone(&bot);
    spawn_detached("knowledge bot initialize", async move {
        initializing.initialize().await;
    });

    Some(Box::new(move || bot.dispose()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::MockTransport;
    use crate::config::ENDPOINT_PROPERTY;
    use crate::conversation::{ControllerOptions, ConversationController, MessageType};
    use crate::storage::MemoryStorage;
    use serde_json::{json, Map};

    fn platform_with_bot(transport: Arc<MockTransport>) -> ConversationPlatform {
        let widget_events = EventBus::new();
        let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
        let platform = ConversationPlatform::new(widget_events.clone(), Arc::clone(&storage));
        register(
            &platform,
            BotRegistration {
                transport,
                storage,
                widget_events,
                parameters: Arc::new(MemoryParameters::new()),
                settings: WidgetSettings {
                    widget_name: "support_contact".to_string(),
                    ..Default::default()
                },
            },
        );
        platform
    }

    fn component(endpoint: Option<&str>) -> ConversationComponent {
        let mut properties = Map::new();
        if let Some(endpoint) = endpoint {
            properties.insert(ENDPOINT_PROPERTY.to_string(), json!(endpoint));
        }
        ConversationComponent {
            name: "conversation".to_string(),
            properties,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn conversation(
        platform: &ConversationPlatform,
        endpoint: Option<&str>,
    ) -> Arc<ConversationController> {
        let controller = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        controller.set_providers(vec![PROVIDER_NAME.to_string()]);
        platform.register_controller(&controller, component(endpoint));
        controller
    }

    #[tokio::test]
    async fn test_registered_bot_greets() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_entries(vec![
            json!({"id": "1", "type": "Text", "content": {"html": "Welcome"}}),
        ]);
        let platform = platform_with_bot(Arc::clone(&transport));

        let controller = conversation(&platform, Some("https://bot.example")).await;
        settle().await;

        assert_eq!(transport.endpoints(), vec!["https://bot.example/conversations"]);
        assert_eq!(transport.requests()[0].funnel, "support");
        let messages = controller.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::Agent);
    }

    #[tokio::test]
    async fn test_user_submit_reaches_bot() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_entries(vec![]);
        transport.queue_entries(vec![
            json!({"id": "2", "type": "Text", "content": {"html": "Answer"}}),
        ]);
        let platform = platform_with_bot(Arc::clone(&transport));
        let controller = conversation(&platform, Some("https://bot.example")).await;
        settle().await;

        controller.user_submit("question");
        settle().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].command.as_ref().unwrap().phrase.as_deref(),
            Some("question")
        );
        assert_eq!(controller.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_endpoint_skips_conversation() {
        let transport = Arc::new(MockTransport::new());
        let platform = platform_with_bot(Arc::clone(&transport));

        let controller = conversation(&platform, None).await;
        settle().await;

        assert!(transport.requests().is_empty());
        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn test_swapped_out_bot_stops_listening() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_entries(vec![]);
        let platform = platform_with_bot(Arc::clone(&transport));
        let controller = conversation(&platform, Some("https://bot.example")).await;
        settle().await;

        controller.set_providers(vec!["live-chat".to_string()]);
        controller.user_submit("anyone there?");
        settle().await;

        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_resumed_bot_stays_silent_and_answers() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_entries(vec![
            json!({"id": "1", "type": "Text", "content": {"html": "Welcome"}}),
        ]);
        let platform = platform_with_bot(Arc::clone(&transport));
        let controller = conversation(&platform, Some("https://bot.example")).await;
        settle().await;
        assert_eq!(controller.messages().len(), 1);

        assert!(platform.swap_provider("c1", "live-chat"));
        settle().await;
        controller.on_complete_provider();
        settle().await;

        assert_eq!(controller.providers(), vec![PROVIDER_NAME.to_string()]);
        assert!(controller.queued_providers().is_empty());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(controller.messages().len(), 1);

        transport.queue_entries(vec![
            json!({"id": "2", "type": "Text", "content": {"html": "Back again"}}),
        ]);
        controller.user_submit("still there?");
        settle().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].command.as_ref().unwrap().phrase.as_deref(),
            Some("still there?")
        );
        assert_eq!(controller.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_second_conversation_keeps_its_bot() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_entries(vec![]);
        transport.queue_entries(vec![]);
        let platform = platform_with_bot(Arc::clone(&transport));
        let first = conversation(&platform, Some("https://bot.example")).await;
        let second = platform
            .create_controller("c2", ControllerOptions::default())
            .await;
        second.set_providers(vec![PROVIDER_NAME.to_string()]);
        platform.register_controller(&second, component(Some("https://bot.example")));
        settle().await;
        assert_eq!(transport.requests().len(), 2);

        first.set_providers(vec!["live-chat".to_string()]);
        transport.queue_entries(vec![
            json!({"id": "3", "type": "Text", "content": {"html": "Answer"}}),
        ]);
        second.user_submit("question");
        settle().await;

        assert_eq!(transport.requests().len(), 3);
        assert_eq!(second.messages().len(), 2);
        assert!(first.messages().is_empty());
    }
}
