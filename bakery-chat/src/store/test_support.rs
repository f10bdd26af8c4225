//! Fixtures shared by the unit tests of this crate.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::models::ChatMessage;

pub(crate) fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap() + Duration::seconds(seconds)
}

/// A message `seconds` after a fixed base time. Operator messages start read.
pub(crate) fn msg(id: &str, session: &str, seconds: i64, customer: bool) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        session_id: session.to_string(),
        message: format!("message {}", id),
        attachments: vec![],
        timestamp: at(seconds),
        is_customer_authored: customer,
        read_by_operator: !customer,
    }
}
