//! Conversation core
//!
//! A [`ConversationController`] holds one conversation; providers attach to
//! it through the [`ConversationPlatform`] and print messages as agents.

mod controller;
mod event;
mod history;
mod platform;
mod provider;
mod store;
mod types;

pub use controller::{
    ControllerOptions, ConversationController, ConversationEntry, LoaderHandle, TypingHandle,
};
pub use event::ConversationEvent;
pub use history::{ConversationHistory, ConversationLogMessage};
pub use platform::{ConversationComponent, ConversationHandler, ConversationPlatform, Disposer};
pub use provider::{
    Agent, AgentSettings, AgentUpdate, ConversationOptions, ConversationProvider, User,
};
pub use store::{transcript_key, LockGuard, Locker, StoredConversation, TranscriptStore, TranscriptWrite};
pub use types::{
    normalize_message, AgentRecord, ConversationMessage, MessageContent, MessageInput,
    MessageSender, MessageSettings, MessageStream, MessageType, NormalizedMessage, UiAction,
};
