use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::MessageCache;
use crate::config::{ChatConfig, DEFAULT_PAGE_SIZE};
use crate::error::{ChatError, Result};
use crate::identity::get_or_create_session_id;
use crate::inquiry::{inquiry_draft, take_pending_inquiry, INQUIRY_KEY};
use crate::models::input::{ChatMessageDraft, FileUpload, ValidateExt};
use crate::models::ChatMessage;
use crate::protocol::Role;
use crate::storage::ClientStorage;
use crate::store::{MessageStore, RemoteStore, SessionFilter, Subscription};
use crate::uploads::{upload_attachments, validate_files, FsObjectStorage, ObjectStorage};

/// The customer's chat screen for one session.
pub struct CustomerChat<S: ?Sized, O: ?Sized> {
    store: Arc<S>,
    uploads: Arc<O>,
    session_id: String,
    page_size: usize,
}

impl<S, O> CustomerChat<S, O>
where
    S: MessageStore + ?Sized,
    O: ObjectStorage + ?Sized,
{
    /// `session_id` comes from [`crate::identity::get_or_create_session_id`],
    /// resolved once at startup.
    pub fn new(store: Arc<S>, uploads: Arc<O>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            uploads,
            session_id: session_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to this session's recent messages.
    pub async fn open(&self) -> Result<MessageFeed> {
        let filter = SessionFilter::session(self.session_id.clone()).with_limit(self.page_size);
        let subscription = self.store.subscribe(filter).await?;
        info!(session_id = %self.session_id, "Customer chat opened");
        Ok(MessageFeed::new(subscription))
    }

    /// Send text and files. Validation happens before any upload; on error the
    /// caller still holds `text` and `files` and can retry as-is.
    pub async fn send(&self, text: &str, files: &[FileUpload]) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() && files.is_empty() {
            return Err(ChatError::Validation(
                "Message must have text or at least one attachment".to_string(),
            ));
        }
        // Field rules on the text and session id first, then every file
        let draft = ChatMessageDraft::customer(self.session_id.clone(), text);
        draft.validate_input()?;
        validate_files(files)?;

        let attachments = upload_attachments(self.uploads.as_ref(), &self.session_id, files).await?;
        let draft = draft.with_attachments(attachments);

        self.store.append(draft).await.map_err(|e| {
            warn!(session_id = %self.session_id, error = %e, "Failed to send message");
            e
        })
    }

    /// Post the parked product inquiry, if there is one, as this session's
    /// next customer message. The inquiry is removed from storage first and
    /// put back if the send fails for a reason a retry can fix.
    pub async fn take_inquiry(&self, storage: &ClientStorage) -> Result<Option<ChatMessage>> {
        let Some(inquiry) = take_pending_inquiry(storage)? else {
            return Ok(None);
        };

        match self.store.append(inquiry_draft(&self.session_id, &inquiry)).await {
            Ok(message) => {
                info!(session_id = %self.session_id, "Posted product inquiry");
                Ok(Some(message))
            }
            Err(e @ ChatError::Validation(_)) => {
                warn!(error = %e, "Inquiry rejected, discarding it");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Inquiry not sent, keeping it for retry");
                storage.set_json(INQUIRY_KEY, &inquiry)?;
                Err(e)
            }
        }
    }
}

impl CustomerChat<RemoteStore, FsObjectStorage> {
    /// Storefront setup: this device's session id from `storage`, a customer
    /// connection to the configured server, uploads under the upload dir.
    pub async fn connect(config: &ChatConfig, storage: &ClientStorage) -> Result<Self> {
        let session_id = get_or_create_session_id(storage)?;
        let store = RemoteStore::from_config(config, Role::Customer).await?;
        let uploads = FsObjectStorage::from_config(config);
        Ok(Self::new(Arc::new(store), Arc::new(uploads), session_id).with_page_size(config.page_size))
    }
}

/// Live, cache-reconciled message list for one session.
pub struct MessageFeed {
    subscription: Subscription,
    cache: MessageCache,
    current: Vec<Arc<ChatMessage>>,
}

impl MessageFeed {
    fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            cache: MessageCache::new(),
            current: Vec::new(),
        }
    }

    /// Wait for the next snapshot and return the messages to render. `None`
    /// when the feed has ended; [`MessageFeed::current`] still holds the last
    /// good list.
    pub async fn next(&mut self) -> Option<Vec<Arc<ChatMessage>>> {
        match self.subscription.next().await {
            Some(snapshot) => {
                self.current = self.cache.apply(&snapshot);
                Some(self.current.clone())
            }
            None => {
                warn!("Message feed ended, keeping last snapshot");
                None
            }
        }
    }

    pub fn current(&self) -> &[Arc<ChatMessage>] {
        &self.current
    }
}
