//! Conversation platform
//!
//! Registry of provider handlers keyed by name. A handler runs once for
//! every registered conversation that lists its provider, including
//! conversations registered before the handler and providers activated
//! later. Whatever the handler returns is run when the provider leaves
//! the conversation.

use super::controller::{ControllerOptions, ConversationController};
use super::event::ConversationEvent;
use super::provider::ConversationProvider;
use super::store::{read_stored, transcript_key};
use crate::events::{EventBus, Subscription, WidgetEvent};
use crate::storage::KeyValueStorage;
use crate::sync::lock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Cleanup returned by a provider handler
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Called with the provider instance created for a conversation
pub type ConversationHandler =
    Arc<dyn Fn(Arc<ConversationProvider>, &ConversationComponent) -> Option<Disposer> + Send + Sync>;

/// The UI component a conversation is rendered in
#[derive(Debug, Clone, Default)]
pub struct ConversationComponent {
    pub name: String,
    pub properties: Map<String, Value>,
}

#[derive(Clone)]
struct ProviderRegistration {
    name: String,
    handler: ConversationHandler,
}

struct RegisteredConversation {
    controller: Arc<ConversationController>,
    component: ConversationComponent,
    subscription: Subscription,
}

/// Conversation id and provider name a disposer belongs to
type DisposerKey = (String, String);

#[derive(Default)]
struct PlatformState {
    conversations: Vec<RegisteredConversation>,
    providers: Vec<ProviderRegistration>,
    disposers: HashMap<DisposerKey, Vec<Disposer>>,
}

struct PlatformInner {
    events: EventBus<WidgetEvent>,
    storage: Arc<dyn KeyValueStorage>,
    state: Mutex<PlatformState>,
}

#[derive(Clone)]
pub struct ConversationPlatform {
    inner: Arc<PlatformInner>,
}

impl ConversationPlatform {
    pub fn new(events: EventBus<WidgetEvent>, storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            inner: Arc::new(PlatformInner {
                events,
                storage,
                state: Mutex::new(PlatformState::default()),
            }),
        }
    }

    pub fn events(&self) -> &EventBus<WidgetEvent> {
        &self.inner.events
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.inner.storage
    }

    /// Registered controller for a conversation id
    pub fn controller(&self, conversation_id: &str) -> Option<Arc<ConversationController>> {
        lock(&self.inner.state)
            .conversations
            .iter()
            .find(|c| c.controller.id() == conversation_id)
            .map(|c| Arc::clone(&c.controller))
    }

    /// Create a controller seeded with the agents of a stored transcript
    pub async fn create_controller(
        &self,
        conversation_id: &str,
        options: ControllerOptions,
    ) -> Arc<ConversationController> {
        if let Some(existing) = self.controller(conversation_id) {
            return existing;
        }

        let controller = ConversationController::new(
            conversation_id,
            &self.inner.events,
            Arc::clone(&self.inner.storage),
            options,
        );

        if options.rehydrate {
            let key = transcript_key(conversation_id);
            match read_stored(self.inner.storage.as_ref(), &key).await {
                Ok(stored) => controller.set_initial_storage(stored.agents),
                Err(e) => tracing::warn!(conversation_id, error = %e, "Failed to read stored agents"),
            }
        }

        controller
    }

    /// Register a provider handler and run it for existing conversations
    pub fn register_provider(&self, name: &str, handler: ConversationHandler) {
        let registration = ProviderRegistration {
            name: name.to_string(),
            handler,
        };

        let targets: Vec<(Arc<ConversationController>, ConversationComponent)> = {
            let mut state = lock(&self.inner.state);
            state.providers.push(registration.clone());
            state
                .conversations
                .iter()
                .filter(|c| c.controller.provider_index(name).is_some())
                .map(|c| (Arc::clone(&c.controller), c.component.clone()))
                .collect()
        };

        tracing::info!(provider = name, conversations = targets.len(), "Provider registered");
        for (controller, component) in targets {
            self.inner.invoke(&registration, &controller, &component);
        }
    }

    /// Track a conversation; `false` if it is already registered
    pub fn register_controller(
        &self,
        controller: &Arc<ConversationController>,
        component: ConversationComponent,
    ) -> bool {
        if self.controller(controller.id()).is_some() {
            return false;
        }

        let weak_inner = Arc::downgrade(&self.inner);
        let weak_controller = Arc::downgrade(controller);
        let subscription = controller
            .events()
            .subscribe(move |event| on_conversation_event(&weak_inner, &weak_controller, event));

        let registrations: Vec<ProviderRegistration> = {
            let mut state = lock(&self.inner.state);
            state.conversations.push(RegisteredConversation {
                controller: Arc::clone(controller),
                component: component.clone(),
                subscription,
            });
            let active = controller.providers();
            state
                .providers
                .iter()
                .filter(|p| active.contains(&p.name))
                .cloned()
                .collect()
        };

        for registration in &registrations {
            self.inner.invoke(registration, controller, &component);
        }
        true
    }

    /// Move a conversation over to `provider`
    pub fn swap_provider(&self, conversation_id: &str, provider: &str) -> bool {
        match self.controller(conversation_id) {
            Some(controller) => {
                controller.swap_provider(provider);
                true
            }
            None => false,
        }
    }

    /// Run every disposer and forget all conversations
    pub fn dispose(&self) {
        let (disposers, conversations) = {
            let mut state = lock(&self.inner.state);
            (
                std::mem::take(&mut state.disposers),
                std::mem::take(&mut state.conversations),
            )
        };

        for conversation in &conversations {
            conversation.subscription.cancel();
        }
        for disposer in disposers.into_values().flatten() {
            disposer();
        }
    }
}

impl PlatformInner {
    fn invoke(
        &self,
        registration: &ProviderRegistration,
        controller: &Arc<ConversationController>,
        component: &ConversationComponent,
    ) {
        let provider = controller.create_provider(&registration.name);
        tracing::debug!(
            provider = %registration.name,
            conversation_id = %controller.id(),
            "Invoking provider handler"
        );
        if let Some(disposer) = (registration.handler)(provider, component) {
            lock(&self.state)
                .disposers
                .entry((controller.id().to_string(), registration.name.clone()))
                .or_default()
                .push(disposer);
        }
    }

    fn on_providers_changed(
        &self,
        controller: &Arc<ConversationController>,
        added: &[String],
        removed: &[String],
    ) {
        let disposers: Vec<Disposer> = {
            let mut state = lock(&self.state);
            removed
                .iter()
                .filter_map(|name| {
                    state
                        .disposers
                        .remove(&(controller.id().to_string(), name.clone()))
                })
                .flatten()
                .collect()
        };
        for disposer in disposers {
            disposer();
        }

        let targets = {
            let state = lock(&self.state);
            let component = state
                .conversations
                .iter()
                .find(|c| c.controller.id() == controller.id())
                .map(|c| c.component.clone());
            let registrations: Vec<ProviderRegistration> = state
                .providers
                .iter()
                .filter(|p| added.contains(&p.name))
                .cloned()
                .collect();
            component.map(|component| (component, registrations))
        };

        if let Some((component, registrations)) = targets {
            for registration in &registrations {
                self.invoke(registration, controller, &component);
            }
        }
    }

    fn forget(&self, conversation_id: &str) {
        let removed = {
            let mut state = lock(&self.state);
            let before = state.conversations.len();
            state
                .conversations
                .retain(|c| c.controller.id() != conversation_id);
            before != state.conversations.len()
        };

        if removed {
            self.events.dispatch(WidgetEvent::ConversationEnded {
                conversation_id: conversation_id.to_string(),
            });
        }
    }
}

fn on_conversation_event(
    inner: &Weak<PlatformInner>,
    controller: &Weak<ConversationController>,
    event: &ConversationEvent,
) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    match event {
        ConversationEvent::ProvidersChanged { added, removed } => {
            if let Some(controller) = controller.upgrade() {
                inner.on_providers_changed(&controller, added, removed);
            }
        }
        ConversationEvent::ControllerDisposed { conversation_id } => {
            inner.forget(conversation_id);
        }
        ConversationEvent::UnreadMessage(unread) => {
            inner.events.dispatch(WidgetEvent::UnreadMessage(*unread));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageCategory};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn platform() -> ConversationPlatform {
        ConversationPlatform::new(EventBus::new(), Arc::new(MemoryStorage::new()))
    }

    fn counting_handler(
        invoked: &Arc<AtomicUsize>,
        disposed: &Arc<AtomicUsize>,
    ) -> ConversationHandler {
        let invoked = Arc::clone(invoked);
        let disposed = Arc::clone(disposed);
        Arc::new(
            move |_provider: Arc<ConversationProvider>,
                  _component: &ConversationComponent|
                  -> Option<Disposer> {
                invoked.fetch_add(1, Ordering::SeqCst);
                let disposed = Arc::clone(&disposed);
                Some(Box::new(move || {
                    disposed.fetch_add(1, Ordering::SeqCst);
                }))
            },
        )
    }

    #[tokio::test]
    async fn test_late_registration_reaches_existing_conversation() {
        let platform = platform();
        let controller = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        controller.set_providers(vec!["bot".to_string()]);
        assert!(platform.register_controller(&controller, ConversationComponent::default()));

        let invoked = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        platform.register_provider("bot", counting_handler(&invoked, &disposed));

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert!(controller.registered_provider("bot").is_some());
    }

    #[tokio::test]
    async fn test_providers_changed_invokes_and_disposes() {
        let platform = platform();
        let invoked = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        platform.register_provider("bot", counting_handler(&invoked, &disposed));

        let controller = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        platform.register_controller(&controller, ConversationComponent::default());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        controller.set_providers(vec!["bot".to_string()]);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);

        controller.set_providers(vec!["chat".to_string()]);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removing_provider_only_disposes_its_conversation() {
        let platform = platform();
        let invoked = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        platform.register_provider("bot", counting_handler(&invoked, &disposed));

        let first = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        let second = platform
            .create_controller("c2", ControllerOptions::default())
            .await;
        for controller in [&first, &second] {
            controller.set_providers(vec!["bot".to_string()]);
            platform.register_controller(controller, ConversationComponent::default());
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 2);

        first.set_providers(vec!["chat".to_string()]);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        first.set_providers(vec!["bot".to_string()]);
        assert_eq!(invoked.load(Ordering::SeqCst), 3);

        platform.dispose();
        assert_eq!(disposed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let platform = platform();
        let controller = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        assert!(platform.register_controller(&controller, ConversationComponent::default()));
        assert!(!platform.register_controller(&controller, ConversationComponent::default()));

        let again = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        assert!(Arc::ptr_eq(&controller, &again));
    }

    #[tokio::test]
    async fn test_disposed_conversation_ends() {
        let platform = platform();
        let ended = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ended);
        let _ = platform.events().subscribe(move |e| {
            if let WidgetEvent::ConversationEnded { conversation_id } = e {
                sink.lock().unwrap().push(conversation_id.clone());
            }
        });

        let controller = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        platform.register_controller(&controller, ConversationComponent::default());
        controller.dispose();

        assert_eq!(*ended.lock().unwrap(), vec!["c1".to_string()]);
        assert!(platform.controller("c1").is_none());
    }

    #[tokio::test]
    async fn test_unread_signal_is_forwarded() {
        let platform = platform();
        let unread = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&unread);
        let _ = platform.events().subscribe(move |e| {
            if let WidgetEvent::UnreadMessage(u) = e {
                sink.lock().unwrap().push(*u);
            }
        });

        let controller = platform
            .create_controller("c1", ControllerOptions::default())
            .await;
        platform.register_controller(&controller, ConversationComponent::default());
        controller.print("ping");

        assert_eq!(*unread.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_create_controller_seeds_stored_agents() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write(
                "conversation-c1",
                json!({"agents": [{"id": "a1", "name": "Bot", "providerName": "bot"}], "messages": []}),
                StorageCategory::Necessary,
            )
            .await
            .unwrap();
        let platform = ConversationPlatform::new(EventBus::new(), storage);

        let controller = platform
            .create_controller("c1", ControllerOptions { rehydrate: true })
            .await;
        assert_eq!(
            controller.get_agent_by_id("a1").unwrap().name.as_deref(),
            Some("Bot")
        );
    }
}
