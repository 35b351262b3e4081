//! In-memory conversation store implementation.
//!
//! Implements `ConversationStore` purely in-process behind a single
//! `tokio::sync::RwLock`: get-or-create is a check-and-insert inside one
//! write-lock critical section, so two concurrent creates for a brand-new
//! id resolve to one surviving entity just like the SQLite UNIQUE
//! constraint does.
//!
//! Every query replicates the SQLite backend's semantics exactly -- the
//! ascending context order, the oldest-N truncation of
//! `get_latest_messages`, and the (timestamp DESC, id DESC) window sort.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use murmur_core::conversation::repository::ConversationStore;
use murmur_types::conversation::{
    Channel, Message, MessageImage, MessageKind, NewMessage, Vendor, VendorFilter,
};
use murmur_types::error::StoreError;
use tokio::sync::RwLock;

/// All mutable state behind one lock: three "tables" plus the monotonic id
/// counters that stand in for AUTOINCREMENT.
struct State {
    channels: Vec<Channel>,
    vendors: Vec<Vendor>,
    messages: Vec<Message>,
    next_channel_id: i64,
    next_vendor_id: i64,
    next_message_id: i64,
}

impl State {
    fn new() -> Self {
        Self {
            channels: Vec::new(),
            vendors: Vec::new(),
            messages: Vec::new(),
            next_channel_id: 1,
            next_vendor_id: 1,
            next_message_id: 1,
        }
    }

    /// Whether a message passes the vendor filter. Name filters resolve
    /// through the vendor registry, mirroring the SQL name subquery.
    fn vendor_matches(&self, message: &Message, vendor: &VendorFilter) -> bool {
        match vendor {
            VendorFilter::Any => true,
            VendorFilter::Name(name) => self
                .vendors
                .iter()
                .any(|v| v.id == message.vendor_id && v.name == *name),
        }
    }

    /// The ascending-order text context: visible, not an image prompt,
    /// carrying no images, vendor-matched.
    fn text_context(&self, channel_id: &str, vendor: &VendorFilter) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| {
                m.channel_id == channel_id
                    && m.visible
                    && !m.is_image_prompt
                    && m.images.is_empty()
                    && self.vendor_matches(m, vendor)
            })
            .cloned()
            .collect();
        // Stable sort: same-timestamp rows keep insertion (id) order, as a
        // rowid scan does.
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}

/// In-process implementation of `ConversationStore`.
#[derive(Clone)]
pub struct MemoryConversationStore {
    state: Arc<RwLock<State>>,
}

impl MemoryConversationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::new())),
        }
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// SQLite stores timestamps with microsecond precision; truncate to match
/// so both backends agree on ordering and round-tripped equality.
fn truncate_to_micros(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.timestamp_micros()).unwrap_or(dt)
}

impl ConversationStore for MemoryConversationStore {
    async fn get_channel(&self, external_id: &str) -> Result<Option<Channel>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .channels
            .iter()
            .find(|c| c.external_id == external_id)
            .cloned())
    }

    async fn create_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        let mut state = self.state.write().await;
        // Check-and-insert under the write lock: first writer wins.
        if let Some(existing) = state.channels.iter().find(|c| c.external_id == external_id) {
            return Ok(existing.clone());
        }
        let channel = Channel {
            id: state.next_channel_id,
            external_id: external_id.to_string(),
        };
        state.next_channel_id += 1;
        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn get_or_create_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        self.create_channel(external_id).await
    }

    async fn get_vendor(&self, name: &str) -> Result<Option<Vendor>, StoreError> {
        let state = self.state.read().await;
        Ok(state.vendors.iter().find(|v| v.name == name).cloned())
    }

    async fn create_vendor(&self, name: &str, model_config: &str) -> Result<Vendor, StoreError> {
        let mut state = self.state.write().await;
        // An existing name wins; its stored model config is not overwritten.
        if let Some(existing) = state.vendors.iter().find(|v| v.name == name) {
            return Ok(existing.clone());
        }
        let vendor = Vendor {
            id: state.next_vendor_id,
            name: name.to_string(),
            model_config: model_config.to_string(),
        };
        state.next_vendor_id += 1;
        state.vendors.push(vendor.clone());
        Ok(vendor)
    }

    async fn get_or_create_vendor(
        &self,
        name: &str,
        model_config: &str,
    ) -> Result<Vendor, StoreError> {
        self.create_vendor(name, model_config).await
    }

    async fn save_message(&self, message: &NewMessage) -> Result<i64, StoreError> {
        self.save_message_with_images(message, &[]).await
    }

    async fn save_message_with_images(
        &self,
        message: &NewMessage,
        image_urls: &[String],
    ) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        if !state.vendors.iter().any(|v| v.id == message.vendor_id) {
            return Err(StoreError::VendorNotFound(message.vendor_id));
        }

        let id = state.next_message_id;
        state.next_message_id += 1;

        let timestamp = truncate_to_micros(message.timestamp.unwrap_or_else(Utc::now));
        let images = image_urls
            .iter()
            .map(|url| MessageImage {
                url: url.clone(),
                data: None,
            })
            .collect();

        state.messages.push(Message {
            id,
            channel_id: message.channel_id.clone(),
            vendor_id: message.vendor_id,
            kind: message.kind,
            content: message.content.clone(),
            timestamp,
            visible: true,
            is_image_prompt: message.is_image_prompt,
            images,
        });
        Ok(id)
    }

    async fn get_visible_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        Ok(state.text_context(channel_id, vendor))
    }

    async fn get_latest_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        // Deliberately the FIRST `limit` of the ascending result (oldest-N),
        // matching the SQLite query's truncation. See DESIGN.md.
        let state = self.state.read().await;
        let mut messages = state.text_context(channel_id, vendor);
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn get_latest_images(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| {
                m.channel_id == channel_id
                    && m.visible
                    && !m.is_image_prompt
                    && !m.images.is_empty()
                    && state.vendor_matches(m, vendor)
            })
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn has_images_in_context(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<bool, StoreError> {
        let latest = self.get_latest_images(channel_id, vendor, 1).await?;
        Ok(!latest.is_empty())
    }

    async fn deactivate_old_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        window: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let mut matching: Vec<(usize, DateTime<Utc>, i64)> = state
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.channel_id == channel_id && m.visible && state.vendor_matches(m, vendor)
            })
            .map(|(idx, m)| (idx, m.timestamp, m.id))
            .collect();

        // (timestamp DESC, id DESC): the id tie-break pins same-timestamp
        // writes to insertion order.
        matching.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));

        let deactivated = matching.len().saturating_sub(window.max(0) as usize);
        for (idx, _, _) in matching.into_iter().skip(window.max(0) as usize) {
            state.messages[idx].visible = false;
        }

        tracing::debug!(
            channel = channel_id,
            window,
            deactivated,
            "Deactivated old messages"
        );
        Ok(())
    }

    async fn clear_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let indices: Vec<usize> = state
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.channel_id == channel_id && m.visible && state.vendor_matches(m, vendor)
            })
            .map(|(idx, _)| idx)
            .collect();

        let cleared = indices.len();
        for idx in indices {
            state.messages[idx].visible = false;
        }

        tracing::info!(channel = channel_id, cleared, "Cleared channel messages");
        Ok(())
    }

    async fn get_recent_text_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> Result<i64, StoreError> {
        let cutoff = Utc::now() - Duration::hours(1);
        let state = self.state.read().await;
        let filter = VendorFilter::name(vendor_name);
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                m.channel_id == channel_id
                    && m.kind == MessageKind::Prompt
                    && m.timestamp > cutoff
                    && state.vendor_matches(m, &filter)
            })
            .count() as i64)
    }

    async fn get_recent_image_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> Result<i64, StoreError> {
        let cutoff = Utc::now() - Duration::hours(1);
        let state = self.state.read().await;
        let filter = VendorFilter::name(vendor_name);
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                m.channel_id == channel_id
                    && m.kind == MessageKind::Prompt
                    && m.is_image_prompt
                    && m.timestamp > cutoff
                    && state.vendor_matches(m, &filter)
            })
            .count() as i64)
    }
}
