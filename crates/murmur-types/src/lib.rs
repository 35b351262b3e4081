//! Shared domain types for Murmur.
//!
//! This crate contains the conversation store's value types -- Channel,
//! Vendor, Message, MessageImage -- and the store error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod conversation;
pub mod error;
