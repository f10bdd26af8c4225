use tracing::info;

use crate::error::Result;
use crate::identity::get_or_create_session_id;
use crate::models::input::ChatMessageDraft;
use crate::models::{Attachment, CatalogItem, PendingInquiry};
use crate::storage::ClientStorage;
use crate::utils::validation::MAX_ATTACHMENT_NAME_LENGTH;

/// Well-known client storage key for the parked inquiry
pub const INQUIRY_KEY: &str = "productInquiry";

/// Park an inquiry about `item` for the chat view and return the session it
/// will be posted to.
pub fn request_inquiry(storage: &ClientStorage, item: &CatalogItem) -> Result<String> {
    let session_id = get_or_create_session_id(storage)?;
    storage.set_json(INQUIRY_KEY, &PendingInquiry::for_item(item))?;
    info!(session_id = %session_id, product = %item.name, "Product inquiry requested");
    Ok(session_id)
}

/// Remove and return the parked inquiry, if any.
pub fn take_pending_inquiry(storage: &ClientStorage) -> Result<Option<PendingInquiry>> {
    storage.take_json(INQUIRY_KEY)
}

/// The synthetic first message for an inquiry.
pub fn inquiry_draft(session_id: &str, inquiry: &PendingInquiry) -> ChatMessageDraft {
    let name = inquiry.product_name.as_deref().unwrap_or("product");
    let text = format!(
        "Hello! I'm interested in the {}. Is it currently available?",
        name
    );
    let attachments = inquiry
        .product_image
        .as_ref()
        .map(|url| Attachment {
            name: image_name(inquiry.product_name.as_deref()),
            media_type: "image".to_string(),
            url: url.clone(),
            size_bytes: None,
        })
        .into_iter()
        .collect();

    ChatMessageDraft::customer(session_id, text).with_attachments(attachments)
}

/// Attachment name for the product photo, cut to the allowed length on a
/// char boundary.
fn image_name(product_name: Option<&str>) -> String {
    let Some(name) = product_name.map(str::trim).filter(|n| !n.is_empty()) else {
        return "Product Image".to_string();
    };
    let mut end = name.len().min(MAX_ATTACHMENT_NAME_LENGTH);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
