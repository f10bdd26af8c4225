//! Chat layer for the LAIM Bakery & Pastry storefront.
//!
//! Customers talk to the shop from an anonymous, device-persistent session;
//! operators see every session with unread counts and reply. All state lives
//! in one message log reached through [`store::MessageStore`], either
//! in-process ([`store::LiveStore`]) or over a WebSocket ([`store::RemoteStore`]).

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod inquiry;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod read_state;
pub mod storage;
pub mod store;
pub mod uploads;
pub mod utils;
pub mod views;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use models::input::{ChatMessageDraft, FileUpload};
pub use models::{Attachment, CatalogItem, ChatMessage, ChatSession, PendingInquiry};
pub use store::{LiveStore, MessageStore, RemoteStore, SessionFilter, Subscription};
