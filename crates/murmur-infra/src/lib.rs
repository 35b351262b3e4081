//! Infrastructure layer for Murmur.
//!
//! Contains the two implementations of the `ConversationStore` trait
//! defined in `murmur-core` -- durable SQLite storage and a volatile
//! in-process store -- plus the backend selector and store configuration.

pub mod backend;
pub mod config;
pub mod memory;
pub mod sqlite;
