// Realtime Core
// Realtime канал чата: WebSocket уведомления, "печатает", прочтения

#![warn(clippy::all)]

// Модули
pub mod api;
pub mod config;
pub mod protocol;
pub mod realtime;
pub mod state;
pub mod utils;

// Re-exports для удобства
pub use api::{ChatClient, HttpRestClient, RestApi};
pub use config::Config;
pub use realtime::connection::ConnectionState;
pub use state::events::ChatEvent;
pub use state::models::{Conversation, Message, MessageKind};
pub use state::session::Session;
pub use utils::error::{RealtimeError, Result};

// WASM-specific bindings
#[cfg(target_arch = "wasm32")]
pub mod wasm;
