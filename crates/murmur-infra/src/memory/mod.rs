//! In-process storage layer.
//!
//! The volatile `ConversationStore` implementation used for fast, isolated
//! testing. Must stay behaviorally indistinguishable from the SQLite
//! backend, including its ordering and truncation choices.

pub mod conversation;
