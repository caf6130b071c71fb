//! The ordered, mutable dialogue log and its JSON export format.

mod store;

pub use store::{ConversationStore, HistoryError, Turn};
