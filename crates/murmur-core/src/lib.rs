//! Business logic and the conversation store trait for Murmur.
//!
//! This crate defines the "port" (the `ConversationStore` trait) that the
//! infrastructure layer implements. It depends only on `murmur-types` --
//! never on `murmur-infra` or any database/IO crate.

pub mod conversation;
