//! Transcript persistence
//!
//! Messages and agents of a conversation are stored as one JSON document
//! under `conversation-{id}`. Every read-modify-write runs under a FIFO
//! [`Locker`] whose tickets are taken when the write is submitted, so writes
//! queued from synchronous listeners apply in submission order.

use super::controller::ConversationController;
use super::event::ConversationEvent;
use super::provider::{Agent, AgentSettings};
use super::types::{AgentRecord, ConversationMessage, MessageType};
use crate::storage::{KeyValueStorage, StorageCategory, StorageError};
use crate::sync::{lock, spawn_detached};
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub fn transcript_key(conversation_id: &str) -> String {
    format!("conversation-{conversation_id}")
}

/// Persisted transcript document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

pub(crate) async fn read_stored(
    storage: &dyn KeyValueStorage,
    key: &str,
) -> Result<StoredConversation, StorageError> {
    match storage.read(key).await? {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value)?),
        _ => Ok(StoredConversation::default()),
    }
}

// ============================================================================
// Locker
// ============================================================================

#[derive(Default)]
struct LockState {
    held: bool,
    /// Held plus queued tickets
    pending: usize,
    waiters: VecDeque<oneshot::Sender<LockGuard>>,
}

/// FIFO async mutual exclusion with eagerly issued tickets
#[derive(Clone, Default)]
pub struct Locker {
    state: Arc<Mutex<LockState>>,
}

/// Exclusive access; the next ticket is granted on drop
pub struct LockGuard {
    state: Arc<Mutex<LockState>>,
}

impl Locker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        lock(&self.state).pending > 0
    }

    /// Take a ticket now; the future resolves when the ticket comes up.
    ///
    /// Resolves to `None` only if the lock was torn down while waiting.
    pub fn lock(&self) -> BoxFuture<'static, Option<LockGuard>> {
        let mut state = lock(&self.state);
        state.pending += 1;

        if state.held {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            drop(state);
            async move { rx.await.ok() }.boxed()
        } else {
            state.held = true;
            drop(state);
            let guard = LockGuard {
                state: Arc::clone(&self.state),
            };
            future::ready(Some(guard)).boxed()
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let next = {
            let mut state = lock(&self.state);
            state.pending = state.pending.saturating_sub(1);
            let next = state.waiters.pop_front();
            if next.is_none() {
                state.held = false;
            }
            next
        };

        if let Some(next) = next {
            // An abandoned ticket hands the guard back, which releases it in turn
            let _ = next.send(LockGuard {
                state: Arc::clone(&self.state),
            });
        }
    }
}

// ============================================================================
// Transcript store
// ============================================================================

/// A single transcript mutation
#[derive(Debug, Clone)]
pub enum TranscriptWrite {
    /// Append unless a message with the same key is stored
    Message(ConversationMessage),
    /// Append a new agent
    Agent(AgentRecord),
    /// Replace the stored profile of an agent
    UpdateAgent(AgentRecord),
}

pub struct TranscriptStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    enabled: bool,
    locker: Locker,
    initial_agents: Mutex<Vec<AgentRecord>>,
}

impl TranscriptStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, conversation_id: &str, enabled: bool) -> Self {
        Self {
            storage,
            key: transcript_key(conversation_id),
            enabled,
            locker: Locker::new(),
            initial_agents: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_initial_agents(&self, agents: Vec<AgentRecord>) {
        *lock(&self.initial_agents) = agents;
    }

    /// Agent known from a previous session
    pub fn get_stored_agent(&self, id: &str) -> Option<AgentRecord> {
        if !self.enabled {
            return None;
        }
        lock(&self.initial_agents)
            .iter()
            .find(|agent| agent.id == id)
            .cloned()
    }

    /// Queue a mutation. The ticket is taken before this returns.
    pub fn write(&self, write: TranscriptWrite) -> BoxFuture<'static, Result<(), StorageError>> {
        if !self.enabled {
            return future::ready(Ok(())).boxed();
        }

        let ticket = self.locker.lock();
        let storage = Arc::clone(&self.storage);
        let key = self.key.clone();

        async move {
            let _guard = ticket
                .await
                .ok_or_else(|| StorageError::Backend("transcript lock closed".to_string()))?;
            let mut stored = read_stored(storage.as_ref(), &key).await?;

            match write {
                TranscriptWrite::Message(message) => {
                    if stored.messages.iter().any(|m| m.key == message.key) {
                        return Ok(());
                    }
                    stored.messages.push(message);
                }
                TranscriptWrite::Agent(agent) => {
                    if stored.agents.iter().any(|a| a.id == agent.id) {
                        return Ok(());
                    }
                    stored.agents.push(agent);
                }
                TranscriptWrite::UpdateAgent(agent) => {
                    for existing in stored.agents.iter_mut().filter(|a| a.id == agent.id) {
                        existing.name.clone_from(&agent.name);
                        existing.avatar.clone_from(&agent.avatar);
                    }
                }
            }

            storage
                .write(&key, serde_json::to_value(&stored)?, StorageCategory::Necessary)
                .await
        }
        .boxed()
    }

    /// Read the transcript after every write queued so far
    pub fn read(&self) -> BoxFuture<'static, Result<StoredConversation, StorageError>> {
        let ticket = self.locker.lock();
        let storage = Arc::clone(&self.storage);
        let key = self.key.clone();

        async move {
            let _guard = ticket
                .await
                .ok_or_else(|| StorageError::Backend("transcript lock closed".to_string()))?;
            read_stored(storage.as_ref(), &key).await
        }
        .boxed()
    }

    pub async fn is_rehydrated(&self) -> Result<bool, StorageError> {
        if !self.enabled {
            return Ok(false);
        }
        Ok(!self.read().await?.messages.is_empty())
    }

    /// Replay the stored transcript into an empty conversation
    pub async fn rehydrate(&self, controller: &ConversationController) -> Result<(), StorageError> {
        if !self.enabled || !controller.messages().is_empty() {
            return Ok(());
        }

        let stored = self.read().await?;
        let agents: Vec<Agent> = stored
            .agents
            .iter()
            .map(|record| {
                let provider = controller
                    .registered_provider(&record.provider_name)
                    .unwrap_or_else(|| controller.create_provider(&record.provider_name));
                Agent::new(
                    provider,
                    AgentSettings {
                        id: Some(record.id.clone()),
                        name: record.name.clone(),
                        avatar: record.avatar.clone(),
                    },
                )
            })
            .collect();

        let mut restored = 0usize;
        for message in stored.messages {
            let Some(content) = message.content else {
                continue;
            };

            let sender = match message.message_type {
                MessageType::Agent => {
                    let sender_id = message.sender.as_ref().and_then(|s| s.id.as_deref());
                    match agents.iter().find(|a| Some(a.id()) == sender_id) {
                        Some(agent) => Some(agent.sender()),
                        None => continue,
                    }
                }
                MessageType::User | MessageType::System => None,
            };

            controller.create_entry(
                message.key,
                content,
                message.message_type,
                sender,
                message.timestamp,
            );
            restored += 1;
        }

        tracing::info!(
            conversation_id = %controller.id(),
            agents = agents.len(),
            messages = restored,
            "Transcript rehydrated"
        );
        Ok(())
    }

    /// Persist controller activity and rehydrate when the conversation starts
    pub(crate) fn attach(store: &Arc<Self>, controller: &Arc<ConversationController>) {
        if !store.enabled {
            return;
        }

        let store = Arc::clone(store);
        let weak = Arc::downgrade(controller);
        // Lives as long as the controller's bus
        let _ = controller.events().subscribe(move |event| match event {
            ConversationEvent::Started => {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                if !controller.messages().is_empty() {
                    return;
                }
                let store = Arc::clone(&store);
                spawn_detached("transcript rehydrate", async move {
                    if let Err(e) = store.rehydrate(&controller).await {
                        tracing::warn!(error = %e, "Failed to rehydrate transcript");
                    }
                });
            }
            ConversationEvent::MessageCreated(message) => {
                persist(store.write(TranscriptWrite::Message(message.clone())));
            }
            ConversationEvent::AgentCreated(agent) => {
                persist(store.write(TranscriptWrite::Agent(agent.clone())));
            }
            ConversationEvent::AgentUpdated(agent) => {
                persist(store.write(TranscriptWrite::UpdateAgent(agent.clone())));
            }
            _ => {}
        });
    }
}

fn persist(write: BoxFuture<'static, Result<(), StorageError>>) {
    spawn_detached("transcript write", async move {
        if let Err(e) = write.await {
            tracing::warn!(error = %e, "Failed to persist transcript");
        }
    });
}
