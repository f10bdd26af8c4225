//! LAIM Bakery chat server library
//!
//! Exposes the server components for the binary and for integration tests.

mod config;
mod connection;
mod state;

pub use bakery_chat::protocol::{Role, WsMessage};
pub use config::{ServerConfig, DEFAULT_WELCOME};
pub use connection::{handle_connection, handle_message, Client};
pub use state::ServerState;
