//! Input DTOs with garde validation.
//!
//! Everything that reaches the message store or object storage is validated
//! here first; a failure maps to `ChatError::Validation` and blocks the send.

use garde::Validate;
use serde::{Deserialize, Serialize};

use super::message::Attachment;
use crate::error::{ChatError, Result};
use crate::utils::validation::{
    validate_media_type, MAX_ATTACHMENTS_PER_MESSAGE, MAX_ATTACHMENT_NAME_LENGTH,
    MAX_MESSAGE_LENGTH, MAX_SESSION_ID_LENGTH, MAX_UPLOAD_BYTES,
};

/// A message as submitted to `MessageStore::append`, before the store assigns
/// its id and timestamp.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct ChatMessageDraft {
    #[garde(length(min = 1, max = MAX_SESSION_ID_LENGTH))]
    pub session_id: String,
    #[garde(length(max = MAX_MESSAGE_LENGTH))]
    pub message: String,
    #[serde(default)]
    #[garde(length(max = MAX_ATTACHMENTS_PER_MESSAGE), dive)]
    pub attachments: Vec<Attachment>,
    #[garde(skip)]
    pub is_customer_authored: bool,
}

impl ChatMessageDraft {
    pub fn customer(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            attachments: Vec::new(),
            is_customer_authored: true,
        }
    }

    pub fn operator(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_customer_authored: false,
            ..Self::customer(session_id, message)
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Field rules plus the cross-field rule that a message carries text or at
    /// least one attachment.
    pub fn validate_draft(&self) -> Result<()> {
        self.validate_input()?;
        if self.message.trim().is_empty() && self.attachments.is_empty() {
            return Err(ChatError::Validation(
                "Message must have text or at least one attachment".to_string(),
            ));
        }
        Ok(())
    }
}

/// A local file the customer picked, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
#[garde(context(()))]
pub struct FileUpload {
    #[garde(length(min = 1, max = MAX_ATTACHMENT_NAME_LENGTH))]
    pub name: String,
    #[garde(custom(validate_media_type))]
    pub media_type: String,
    #[garde(length(max = MAX_UPLOAD_BYTES))]
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Extension taken from the file name, as the upload key suffix.
    pub fn extension(&self) -> Option<&str> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty())
    }
}

/// Helper trait to convert garde reports into `ChatError::Validation`
pub trait ValidateExt {
    fn validate_input(&self) -> Result<()>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<()> {
        self.validate().map_err(|e| ChatError::Validation(e.to_string()))
    }
}
