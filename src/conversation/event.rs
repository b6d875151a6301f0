//! Conversation events

use super::types::{AgentRecord, ConversationMessage, MessageStream, UiAction};
use serde_json::Value;

/// Events dispatched on a conversation controller's bus
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Full message stream after any change
    Updated(MessageStream),
    MessageCreated(ConversationMessage),
    /// Content replaced, or removed when `content` is `None`
    MessageUpdated(ConversationMessage),
    UnreadMessage(bool),
    /// The component mounted for the first time
    Started,
    ComponentMountChanged(bool),
    ProvidersChanged {
        added: Vec<String>,
        removed: Vec<String>,
    },
    AgentCreated(AgentRecord),
    AgentUpdated(AgentRecord),
    ControllerDisposed {
        conversation_id: String,
    },

    // UI actions
    UserSubmit {
        text: String,
    },
    Action(UiAction),
    Evaluate(Value),
    FormSubmitted(Value),
}
