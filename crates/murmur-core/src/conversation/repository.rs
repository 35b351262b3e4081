//! ConversationStore trait definition.
//!
//! Defines the storage interface for channels, vendors, and conversation
//! messages. The infrastructure layer (murmur-infra) implements this trait
//! twice -- against SQLite and against an in-process store -- and the two
//! implementations must be behaviorally indistinguishable to callers:
//! identical ordering, identical truncation, identical edge cases.

use murmur_types::conversation::{Channel, Message, NewMessage, Vendor, VendorFilter};
use murmur_types::error::StoreError;

/// Repository trait for conversation state.
///
/// Covers four operation families:
/// - **Channels / Vendors:** Idempotent get-or-create registries.
/// - **Messages:** Save prompts/replies, optionally with attached images.
/// - **Context queries:** Visible-message windows and image extraction.
/// - **Rate counts:** Trailing-hour request counts per channel/vendor.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ConversationStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Channel registry
    // -----------------------------------------------------------------------

    /// Look up a channel by its external id. No side effects.
    fn get_channel(
        &self,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Channel>, StoreError>> + Send;

    /// Create a channel for the external id.
    ///
    /// Idempotent: if the external id already exists, the existing channel
    /// is returned unchanged. Two concurrent creates for a brand-new id
    /// resolve to exactly one surviving channel; the loser receives the
    /// winner's entity, never an error.
    fn create_channel(
        &self,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Channel, StoreError>> + Send;

    /// Composition of get + create. The only channel operation other
    /// components call in practice.
    fn get_or_create_channel(
        &self,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Channel, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Vendor registry
    // -----------------------------------------------------------------------

    /// Look up a vendor by name. No side effects.
    fn get_vendor(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Vendor>, StoreError>> + Send;

    /// Create a vendor.
    ///
    /// Idempotent: an existing name wins and its stored model config is NOT
    /// overwritten by the caller's.
    fn create_vendor(
        &self,
        name: &str,
        model_config: &str,
    ) -> impl std::future::Future<Output = Result<Vendor, StoreError>> + Send;

    /// Composition of get + create.
    fn get_or_create_vendor(
        &self,
        name: &str,
        model_config: &str,
    ) -> impl std::future::Future<Output = Result<Vendor, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Message persistence
    // -----------------------------------------------------------------------

    /// Persist a message, assigning its id and (when absent) the current
    /// timestamp. Returns the assigned id.
    ///
    /// Fails with `StoreError::VendorNotFound` when the draft's vendor id
    /// does not resolve to a known vendor.
    fn save_message(
        &self,
        message: &NewMessage,
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;

    /// Same as `save_message`, plus attaches one image per URL, each owned
    /// exclusively by the new message.
    fn save_message_with_images(
        &self,
        message: &NewMessage,
        image_urls: &[String],
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Context queries
    // -----------------------------------------------------------------------

    /// The literal conversational context handed to the vendor call: all
    /// messages for the channel that are visible, not image prompts, carry
    /// no images, and match the vendor filter -- ordered oldest first
    /// (ascending timestamp).
    fn get_visible_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// The first `limit` rows of `get_visible_messages` -- i.e. the OLDEST
    /// N visible messages, truncated.
    ///
    /// This is not the most-recent N by time. At least one caller depends
    /// on the oldest-first truncation, so both backends replicate it
    /// exactly instead of "correcting" it to newest-N. Flagged in DESIGN.md
    /// for product clarification.
    fn get_latest_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Visible, non-image-prompt messages carrying at least one image,
    /// ordered newest first and truncated to `limit`. This direction is
    /// intentional -- it feeds the image picker with the N most recent
    /// images.
    fn get_latest_images(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// True iff `get_latest_images(.., limit = 1)` is non-empty.
    fn has_images_in_context(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Window maintenance
    // -----------------------------------------------------------------------

    /// Among currently visible messages matching the filter, keep the first
    /// `window` sorted by (timestamp DESC, id DESC -- the tie-break for
    /// same-timestamp writes) visible and set `visible = false` on the
    /// remainder. Not triggered automatically; the caller invokes it when
    /// the visible count reaches the configured window.
    fn deactivate_old_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        window: i64,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Unconditionally set `visible = false` on every matching message.
    /// A full context reset with no recovery path.
    fn clear_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Rate counts
    // -----------------------------------------------------------------------

    /// Count of prompt messages for (channel, vendor) with timestamps in
    /// the trailing hour. Visibility is ignored: windowing and clearing
    /// must never refill rate budget.
    fn get_recent_text_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;

    /// Same as the text count, additionally requiring
    /// `is_image_prompt = true`.
    fn get_recent_image_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> impl std::future::Future<Output = Result<i64, StoreError>> + Send;
}
