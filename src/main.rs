//! Knowledge bot console
//!
//! Hosts one knowledge-bot conversation on stdin/stdout. Logs go to
//! stderr so the transcript stays readable.

use knowledge_bot::bot::{self, BotRegistration, HttpTransport, LoggingTransport, MemoryParameters};
use knowledge_bot::config::{WidgetSettings, ENDPOINT_PROPERTY};
use knowledge_bot::conversation::{
    ControllerOptions, ConversationComponent, ConversationController, ConversationEvent,
    ConversationPlatform, UiAction,
};
use knowledge_bot::events::EventBus;
use knowledge_bot::storage::{KeyValueStorage, SqliteStorage};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "/help      ask the bot for help\n/action K  send action key K\n/quit      leave";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "knowledge_bot=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Configuration
    let settings = WidgetSettings::from_env();
    let db_path = std::env::var("KNOWLEDGE_BOT_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.knowledge-bot/session.db")
    });
    let conversation_id =
        std::env::var("KNOWLEDGE_BOT_CONVERSATION").unwrap_or_else(|_| "main".to_string());

    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening session storage");
    let storage: Arc<dyn KeyValueStorage> = Arc::new(SqliteStorage::open(&db_path)?);

    let widget_events = EventBus::new();
    let platform = ConversationPlatform::new(widget_events.clone(), Arc::clone(&storage));
    let transport = LoggingTransport::new(HttpTransport::new(settings.request_timeout)?);

    bot::register(
        &platform,
        BotRegistration {
            transport: Arc::new(transport),
            storage,
            widget_events,
            parameters: Arc::new(MemoryParameters::new()),
            settings,
        },
    );

    let controller = platform
        .create_controller(&conversation_id, ControllerOptions { rehydrate: true })
        .await;
    let printer = tokio::spawn(print_transcript(Arc::clone(&controller)));

    let mut properties = Map::new();
    if let Ok(endpoint) = std::env::var("KNOWLEDGE_BOT_ENDPOINT") {
        properties.insert(ENDPOINT_PROPERTY.to_string(), Value::String(endpoint));
    }
    platform.register_controller(
        &controller,
        ConversationComponent {
            name: "console".to_string(),
            properties,
        },
    );
    controller.set_providers(vec![bot::PROVIDER_NAME.to_string()]);
    controller.set_component_mounted_state(true);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/help" => controller.action(UiAction::from("help")),
            _ if line.starts_with("/action ") => {
                let key = line.trim_start_matches("/action ").trim();
                controller.action(UiAction::from(key));
            }
            _ if line.starts_with('/') => println!("{HELP}"),
            text => controller.user_submit(text),
        }
    }

    controller.dispose();
    platform.dispose();
    printer.abort();
    Ok(())
}

/// Print new and updated messages as plain text
async fn print_transcript(controller: Arc<ConversationController>) {
    let mut events = BroadcastStream::new(controller.events().stream());
    while let Some(event) = events.next().await {
        let message = match event {
            Ok(ConversationEvent::MessageCreated(message)) => message,
            Ok(ConversationEvent::MessageUpdated(message)) if message.content.is_some() => message,
            Ok(ConversationEvent::ControllerDisposed { .. }) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Transcript printer lagged");
                continue;
            }
        };

        let log = controller.history().parse_entry(&message);
        if let Some(text) = &log.message {
            println!("[{}] {text}", log.alias);
        }
        for (i, option) in log.options.iter().enumerate() {
            println!("    {}. {option}", i + 1);
        }
    }
}
