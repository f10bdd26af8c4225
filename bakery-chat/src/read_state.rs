//! Read-State Tracker: marks customer messages read as an operator views them.

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::ChatMessage;
use crate::store::MessageStore;

/// Ids in `delivered` that still need marking. The message's own field is the
/// only record of what was marked, so a snapshot that already reflects the
/// update yields nothing and the tracker cannot loop on its own writes.
pub fn unread_ids(delivered: &[ChatMessage]) -> Vec<&str> {
    delivered
        .iter()
        .filter(|m| m.is_unread())
        .map(|m| m.id.as_str())
        .collect()
}

/// Issue `mark_read` for every unread customer message in a delivery.
///
/// Every id is attempted; the first failure is returned after the rest ran.
/// A message deleted in the meantime is skipped quietly.
pub async fn mark_delivered_read<S>(store: &S, delivered: &[ChatMessage]) -> Result<usize>
where
    S: MessageStore + ?Sized,
{
    let mut marked = 0;
    let mut first_error = None;

    for id in unread_ids(delivered) {
        match store.mark_read(id).await {
            Ok(()) => marked += 1,
            Err(crate::error::ChatError::NotFound(_)) => {
                debug!(id, "Message gone before it could be marked read");
            }
            Err(e) => {
                warn!(id, error = %e, "Failed to mark message read");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(marked),
    }
}
