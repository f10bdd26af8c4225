//! Session Aggregator: operator-side projection of the global feed into one
//! summary per conversation. Recomputed in full on every snapshot.

use std::collections::HashMap;

use crate::models::{ChatMessage, ChatSession};

/// Group messages by session. Output is ordered by last-message timestamp
/// descending, then session id ascending.
///
/// Among messages sharing a session's latest timestamp, the one that comes
/// first in `messages` is the last message. Fed the global feed (newest
/// first), that is the one stored most recently.
pub fn aggregate(messages: &[ChatMessage]) -> Vec<ChatSession> {
    let mut sessions: HashMap<&str, ChatSession> = HashMap::new();

    for message in messages {
        let unread = usize::from(message.is_unread());
        match sessions.get_mut(message.session_id.as_str()) {
            Some(session) => {
                if message.timestamp > session.last_message.timestamp {
                    session.last_message = message.clone();
                }
                session.unread_count += unread;
            }
            None => {
                sessions.insert(
                    &message.session_id,
                    ChatSession {
                        session_id: message.session_id.clone(),
                        last_message: message.clone(),
                        unread_count: unread,
                    },
                );
            }
        }
    }

    let mut sorted: Vec<ChatSession> = sessions.into_values().collect();
    sorted.sort_by(|a, b| {
        b.last_message
            .timestamp
            .cmp(&a.last_message.timestamp)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    sorted
}

/// Unread customer messages across every session (the admin badge count).
pub fn total_unread(sessions: &[ChatSession]) -> usize {
    sessions.iter().map(|s| s.unread_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::msg;

    #[test]
    fn test_groups_and_counts_unread() {
        let messages = vec![
            msg("a1", "a", 1, true),
            msg("a2", "a", 3, false),
            msg("b1", "b", 2, true),
            msg("b2", "b", 4, true),
        ];
        let sessions = aggregate(&messages);

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "b");
        assert_eq!(sessions[0].last_message.id, "b2");
        assert_eq!(sessions[0].unread_count, 2);
        assert_eq!(sessions[1].session_id, "a");
        assert_eq!(sessions[1].last_message.id, "a2");
        assert_eq!(sessions[1].unread_count, 1);
        assert_eq!(total_unread(&sessions), 3);
    }

    #[test]
    fn test_read_messages_do_not_count() {
        let mut read = msg("a1", "a", 1, true);
        read.read_by_operator = true;
        let sessions = aggregate(&[read, msg("a2", "a", 2, true)]);
        assert_eq!(sessions[0].unread_count, 1);
    }

    #[test]
    fn test_is_idempotent_and_order_independent() {
        let messages = vec![
            msg("x", "s1", 5, true),
            msg("y", "s2", 5, true),
            msg("z", "s1", 1, false),
        ];
        let mut reversed = messages.clone();
        reversed.reverse();

        let once = aggregate(&messages);
        assert_eq!(once, aggregate(&messages));
        assert_eq!(once, aggregate(&reversed));
    }

    #[test]
    fn test_timestamp_tie_keeps_first_in_input() {
        let sessions = aggregate(&[msg("m-b", "s1", 7, true), msg("m-a", "s1", 7, true)]);
        assert_eq!(sessions[0].last_message.id, "m-b");

        let sessions = aggregate(&[msg("m-a", "s1", 7, true), msg("m-b", "s1", 7, true)]);
        assert_eq!(sessions[0].last_message.id, "m-a");
    }

    #[test]
    fn test_session_tie_broken_by_session_id() {
        let sessions = aggregate(&[msg("1", "zeta", 7, true), msg("2", "alpha", 7, true)]);
        let order: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(order, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&[]).is_empty());
        assert_eq!(total_unread(&[]), 0);
    }
}
