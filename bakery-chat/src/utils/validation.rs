//! Validation limits shared by the input DTOs and the upload path.

/// Maximum lengths for various fields
pub const MAX_SESSION_ID_LENGTH: usize = 128;
pub const MAX_MESSAGE_LENGTH: usize = 10000;
pub const MAX_ATTACHMENT_NAME_LENGTH: usize = 255;
pub const MAX_URL_LENGTH: usize = 2048;

/// Per-message attachment limits
pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 5;
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Media types a customer may attach
pub const ALLOWED_MEDIA_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

pub fn is_allowed_media_type(media_type: &str) -> bool {
    ALLOWED_MEDIA_TYPES.contains(&media_type)
}

/// Custom garde rule for upload media types
pub fn validate_media_type(value: &str, _ctx: &()) -> garde::Result {
    if is_allowed_media_type(value) {
        Ok(())
    } else {
        Err(garde::Error::new(
            "Invalid file type. Allowed types: JPEG, PNG, GIF, PDF, DOC, DOCX",
        ))
    }
}
