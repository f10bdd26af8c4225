mod catalog;
pub mod input;
mod message;
mod session;

pub use catalog::{CatalogItem, PendingInquiry};
pub use message::{Attachment, ChatMessage};
pub use session::ChatSession;
