//! Attachment uploads to object storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::input::{FileUpload, ValidateExt};
use crate::models::Attachment;
use crate::utils::random_base36;
use crate::utils::validation::MAX_ATTACHMENTS_PER_MESSAGE;

/// Object storage that accepts a file under a generated key and returns a
/// publicly resolvable URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, media_type: &str, bytes: &[u8]) -> Result<String>;
}

/// Filesystem-backed object storage. Objects land under `root`; URLs are
/// `public_url` joined with the key.
pub struct FsObjectStorage {
    root: PathBuf,
    public_url: String,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.upload_dir.clone(), config.public_url.clone())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(ChatError::Validation(format!("Invalid object key {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put(&self, key: &str, _media_type: &str, bytes: &[u8]) -> Result<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(format!("{}/{}", self.public_url, key))
    }
}

/// `{session}/{unix millis}_{random}.{ext}`
pub fn object_key(session_id: &str, file: &FileUpload) -> String {
    let stem = format!("{}_{}", Utc::now().timestamp_millis(), random_base36(11));
    match file.extension() {
        Some(ext) => format!("{}/{}.{}", session_id, stem, ext),
        None => format!("{}/{}", session_id, stem),
    }
}

/// Check the whole batch before anything is uploaded.
pub fn validate_files(files: &[FileUpload]) -> Result<()> {
    if files.len() > MAX_ATTACHMENTS_PER_MESSAGE {
        return Err(ChatError::Validation(format!(
            "You can only upload up to {} files at a time",
            MAX_ATTACHMENTS_PER_MESSAGE
        )));
    }
    for file in files {
        file.validate_input()
            .map_err(|e| ChatError::Validation(format!("{}: {}", file.name, e.message())))?;
    }
    Ok(())
}

/// Validate every file, then upload them in order. Nothing is uploaded if any
/// file is rejected; an upload failure aborts the batch with a transport error.
pub async fn upload_attachments<O>(
    storage: &O,
    session_id: &str,
    files: &[FileUpload],
) -> Result<Vec<Attachment>>
where
    O: ObjectStorage + ?Sized,
{
    validate_files(files)?;

    let mut attachments = Vec::with_capacity(files.len());
    for file in files {
        let key = object_key(session_id, file);
        let url = storage
            .put(&key, &file.media_type, &file.bytes)
            .await
            .map_err(|e| {
                error!(file = %file.name, error = %e, "Attachment upload failed");
                ChatError::Transport(format!("Failed to upload {}: {}", file.name, e.message()))
            })?;
        info!(file = %file.name, key = %key, "Uploaded attachment");
        attachments.push(Attachment {
            name: file.name.clone(),
            media_type: file.media_type.clone(),
            url,
            size_bytes: Some(file.size_bytes()),
        });
    }
    Ok(attachments)
}
