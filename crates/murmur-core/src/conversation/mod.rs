//! Conversation persistence abstractions for Murmur.
//!
//! This module defines the `ConversationStore` trait that the
//! infrastructure layer implements, plus the `ConversationService`
//! that orchestrates it for the bot's request flow.

pub mod repository;
pub mod service;
