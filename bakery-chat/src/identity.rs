use tracing::info;

use crate::error::Result;
use crate::storage::ClientStorage;
use crate::utils::generate_session_id;

/// Well-known client storage key for the chat session id
pub const SESSION_ID_KEY: &str = "chatSessionId";

/// Return the persisted session id, creating and persisting one on first use.
///
/// Call once at startup and pass the value into the chat views.
pub fn get_or_create_session_id(storage: &ClientStorage) -> Result<String> {
    let mut created = false;
    let session_id = storage.get_or_insert_with(SESSION_ID_KEY, || {
        created = true;
        generate_session_id()
    })?;
    if created {
        info!(session_id = %session_id, "Created new chat session");
    }
    Ok(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_stable() {
        let storage = ClientStorage::open_in_memory().unwrap();
        let first = get_or_create_session_id(&storage).unwrap();
        let second = get_or_create_session_id(&storage).unwrap();
        assert_eq!(first, second);
        assert_eq!(storage.get(SESSION_ID_KEY).unwrap(), Some(first));
    }

    #[test]
    fn test_existing_session_id_is_reused() {
        let storage = ClientStorage::open_in_memory().unwrap();
        storage.set(SESSION_ID_KEY, "abc").unwrap();
        assert_eq!(get_or_create_session_id(&storage).unwrap(), "abc");
    }

    #[test]
    fn test_blank_session_id_is_replaced() {
        let storage = ClientStorage::open_in_memory().unwrap();
        storage.set(SESSION_ID_KEY, "").unwrap();
        let id = get_or_create_session_id(&storage).unwrap();
        assert!(!id.is_empty());
    }
}
