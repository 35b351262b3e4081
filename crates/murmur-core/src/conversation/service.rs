//! Conversation service orchestrating the store for the bot's request flow.
//!
//! ConversationService sits between the chat frontend and the
//! ConversationStore: it registers channels and vendors, records prompts
//! and replies, builds the context window for vendor calls, trims the
//! window, and gates requests against hourly rate ceilings.

use chrono::Utc;
use murmur_types::conversation::{
    Channel, Message, MessageKind, NewMessage, Vendor, VendorFilter,
};
use murmur_types::error::StoreError;
use tracing::{debug, info};

use crate::conversation::repository::ConversationStore;

/// Orchestrates conversation persistence and context maintenance.
///
/// Generic over `ConversationStore` to maintain clean architecture
/// (murmur-core never depends on murmur-infra).
pub struct ConversationService<S: ConversationStore> {
    store: S,
}

impl<S: ConversationStore> ConversationService<S> {
    /// Create a new service over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // --- Registries ---

    /// Ensure a channel exists for the external id, creating it lazily on
    /// first interaction.
    pub async fn ensure_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        self.store.get_or_create_channel(external_id).await
    }

    /// Ensure a vendor exists. Called once per allow-list entry at startup;
    /// an existing vendor wins and keeps its stored model config.
    pub async fn ensure_vendor(
        &self,
        name: &str,
        model_config: &str,
    ) -> Result<Vendor, StoreError> {
        self.store.get_or_create_vendor(name, model_config).await
    }

    // --- Recording ---

    /// Record a user text prompt.
    pub async fn record_prompt(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        content: impl Into<String>,
    ) -> Result<i64, StoreError> {
        let draft = NewMessage::new(&channel.external_id, vendor.id, MessageKind::Prompt, content);
        self.store.save_message(&draft).await
    }

    /// Record a vendor text reply.
    pub async fn record_reply(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        content: impl Into<String>,
    ) -> Result<i64, StoreError> {
        let draft =
            NewMessage::new(&channel.external_id, vendor.id, MessageKind::Assistant, content);
        self.store.save_message(&draft).await
    }

    /// Record a behavior instruction injected into context.
    pub async fn record_behavior(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        content: impl Into<String>,
    ) -> Result<i64, StoreError> {
        let draft =
            NewMessage::new(&channel.external_id, vendor.id, MessageKind::Behavior, content);
        self.store.save_message(&draft).await
    }

    /// Record an image-generation request. Image prompts are counted by
    /// the image rate gate and never appear in text context.
    pub async fn record_image_prompt(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        content: impl Into<String>,
    ) -> Result<i64, StoreError> {
        let draft = NewMessage::new(&channel.external_id, vendor.id, MessageKind::Prompt, content)
            .image_prompt();
        self.store.save_message(&draft).await
    }

    /// Record a vendor reply carrying generated images.
    pub async fn record_image_result(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        content: impl Into<String>,
        image_urls: &[String],
    ) -> Result<i64, StoreError> {
        let draft =
            NewMessage::new(&channel.external_id, vendor.id, MessageKind::Assistant, content);
        self.store.save_message_with_images(&draft, image_urls).await
    }

    // --- Context ---

    /// The visible conversation context for a vendor call, oldest first.
    pub async fn context(
        &self,
        channel: &Channel,
        vendor: &VendorFilter,
    ) -> Result<Vec<Message>, StoreError> {
        self.store
            .get_visible_messages(&channel.external_id, vendor)
            .await
    }

    /// Trim the context window when the visible count has reached `window`.
    ///
    /// Returns true when a trim was performed. The check is
    /// greater-or-equal: a context already at the window size gets trimmed
    /// before it can grow past it.
    ///
    /// The trigger counts the text context (image prompts and image
    /// carriers excluded) while the trim windows over every visible row
    /// including image traffic. A channel carrying image traffic therefore
    /// holds more visible rows than `window` before the trigger fires, and
    /// a trim may deactivate image rows ahead of older text.
    pub async fn enforce_window(
        &self,
        channel: &Channel,
        vendor: &VendorFilter,
        window: i64,
    ) -> Result<bool, StoreError> {
        let visible = self
            .store
            .get_visible_messages(&channel.external_id, vendor)
            .await?;
        if (visible.len() as i64) < window {
            debug!(
                channel = %channel.external_id,
                visible = visible.len(),
                window,
                "Context below window, no trim"
            );
            return Ok(false);
        }

        self.store
            .deactivate_old_messages(&channel.external_id, vendor, window)
            .await?;
        info!(
            channel = %channel.external_id,
            visible = visible.len(),
            window,
            "Context window trimmed"
        );
        Ok(true)
    }

    /// Reset the channel's context entirely. No recovery path.
    pub async fn reset(
        &self,
        channel: &Channel,
        vendor: &VendorFilter,
    ) -> Result<(), StoreError> {
        self.store
            .clear_messages(&channel.external_id, vendor)
            .await?;
        info!(channel = %channel.external_id, "Context cleared");
        Ok(())
    }

    // --- Rate gates ---

    /// Whether another text request is allowed under the hourly ceiling.
    ///
    /// Allowed iff count < ceiling, strictly. `ceiling == count` denies;
    /// an off-by-one here changes real throughput.
    pub async fn text_request_allowed(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        ceiling: i64,
    ) -> Result<bool, StoreError> {
        let count = self
            .store
            .get_recent_text_request_count(&channel.external_id, &vendor.name)
            .await?;
        Ok(count < ceiling)
    }

    /// Whether another image request is allowed under the hourly ceiling.
    /// Strict less-than, same as the text gate.
    pub async fn image_request_allowed(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        ceiling: i64,
    ) -> Result<bool, StoreError> {
        let count = self
            .store
            .get_recent_image_request_count(&channel.external_id, &vendor.name)
            .await?;
        Ok(count < ceiling)
    }

    /// Record a prompt stamped with an explicit time. Used by replay and
    /// tests; the normal recording paths let the store assign `Utc::now()`.
    pub async fn record_prompt_at(
        &self,
        channel: &Channel,
        vendor: &Vendor,
        content: impl Into<String>,
        timestamp: chrono::DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let draft = NewMessage::new(&channel.external_id, vendor.id, MessageKind::Prompt, content)
            .at(timestamp);
        self.store.save_message(&draft).await
    }
}
