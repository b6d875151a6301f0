//! Knowledge bot conversation core
//!
//! Bridges a remote knowledge-bot service with a conversation UI: server
//! entries are turned into renderable message groups, the bot's opaque
//! conversation state is threaded through every request, and transcripts
//! survive reloads through a key/value storage.

pub mod bot;
pub mod config;
pub mod conversation;
pub mod events;
pub mod message;
pub mod storage;

mod sync;
