pub mod helpers;
pub mod validation;

pub use helpers::{format_timestamp, generate_session_id, random_base36, to_base36};
