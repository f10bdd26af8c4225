//! Customer- and operator-facing chat views.
//!
//! A view holds a store handle and hands out feeds. A feed wraps one live
//! subscription: the view awaits `next()` and re-renders on each item, and
//! dropping the feed cancels the subscription.

mod customer;
mod operator;

pub use customer::{CustomerChat, MessageFeed};
pub use operator::{ConversationFeed, OperatorAuth, OperatorConsole, SessionListFeed};
