//! SQLite conversation store implementation.
//!
//! Implements `ConversationStore` from `murmur-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, RFC3339 text
//! timestamps. Timestamps are written with fixed microsecond precision so
//! that lexicographic ordering in SQL matches chronological ordering.
//!
//! Idempotent creation relies on the UNIQUE constraints in the schema:
//! `INSERT .. ON CONFLICT DO NOTHING` followed by a re-select, so two
//! concurrent creates resolve to one surviving row and the loser
//! transparently reads the winner's entity.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use murmur_core::conversation::repository::ConversationStore;
use murmur_types::conversation::{
    Channel, Message, MessageImage, MessageKind, NewMessage, Vendor, VendorFilter,
};
use murmur_types::error::StoreError;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ConversationStore`.
#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: DatabasePool,
}

impl SqliteConversationStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`, running migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = DatabasePool::new(database_url).await.map_err(map_sqlx)?;
        Ok(Self::new(pool))
    }

    /// Close the underlying pools. Subsequent operations fail with
    /// `StoreError::NotConnected`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Load the images owned by a message, in insertion order.
    async fn load_images(&self, message_id: i64) -> Result<Vec<MessageImage>, StoreError> {
        let rows = sqlx::query(
            "SELECT url, data FROM message_images WHERE message_id = ? ORDER BY id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        let mut images = Vec::with_capacity(rows.len());
        for row in &rows {
            images.push(MessageImage {
                url: row.try_get("url").map_err(map_sqlx)?,
                data: row.try_get("data").map_err(map_sqlx)?,
            });
        }
        Ok(images)
    }

    /// Shared insert path for `save_message` and `save_message_with_images`.
    ///
    /// The message row and its image rows commit in one transaction: a save
    /// either lands whole or leaves no trace. A message committed without
    /// its images would otherwise leak into the text context.
    async fn insert_message(
        &self,
        message: &NewMessage,
        image_urls: &[String],
    ) -> Result<i64, StoreError> {
        let vendor = sqlx::query("SELECT id FROM vendors WHERE id = ?")
            .bind(message.vendor_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        if vendor.is_none() {
            return Err(StoreError::VendorNotFound(message.vendor_id));
        }

        let timestamp = message.timestamp.unwrap_or_else(Utc::now);

        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

        let result = sqlx::query(
            r#"INSERT INTO messages (channel_id, vendor_id, kind, content, timestamp, visible, is_image_prompt)
               VALUES (?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(&message.channel_id)
        .bind(message.vendor_id)
        .bind(message.kind.to_string())
        .bind(&message.content)
        .bind(format_datetime(&timestamp))
        .bind(message.is_image_prompt)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let id = result.last_insert_rowid();

        for url in image_urls {
            sqlx::query("INSERT INTO message_images (message_id, url, data) VALUES (?, ?, NULL)")
                .bind(id)
                .bind(url)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;

        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain Message.
struct MessageRow {
    id: i64,
    channel_id: String,
    vendor_id: i64,
    kind: String,
    content: String,
    timestamp: String,
    visible: bool,
    is_image_prompt: bool,
}

impl MessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            vendor_id: row.try_get("vendor_id")?,
            kind: row.try_get("kind")?,
            content: row.try_get("content")?,
            timestamp: row.try_get("timestamp")?,
            visible: row.try_get("visible")?,
            is_image_prompt: row.try_get("is_image_prompt")?,
        })
    }

    fn into_message(self, images: Vec<MessageImage>) -> Result<Message, StoreError> {
        let kind: MessageKind = self.kind.parse().map_err(StoreError::Io)?;
        let timestamp = parse_datetime(&self.timestamp)?;

        Ok(Message {
            id: self.id,
            channel_id: self.channel_id,
            vendor_id: self.vendor_id,
            kind,
            content: self.content,
            timestamp,
            visible: self.visible,
            is_image_prompt: self.is_image_prompt,
            images,
        })
    }
}

fn channel_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Channel, StoreError> {
    Ok(Channel {
        id: row.try_get("id").map_err(map_sqlx)?,
        external_id: row.try_get("external_id").map_err(map_sqlx)?,
    })
}

fn vendor_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Vendor, StoreError> {
    Ok(Vendor {
        id: row.try_get("id").map_err(map_sqlx)?,
        name: row.try_get("name").map_err(map_sqlx)?,
        model_config: row.try_get("model_config").map_err(map_sqlx)?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolClosed => StoreError::NotConnected,
        other => StoreError::Io(other.to_string()),
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Io(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC3339 (microseconds, Z suffix) so string comparison in SQL
/// agrees with chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Append the vendor scope for context queries. `VendorFilter::Name` binds
/// one extra parameter; `VendorFilter::Any` adds nothing.
fn push_vendor_clause(sql: &mut String, vendor: &VendorFilter) {
    if matches!(vendor, VendorFilter::Name(_)) {
        sql.push_str(" AND vendor_id IN (SELECT id FROM vendors WHERE name = ?)");
    }
}

// ---------------------------------------------------------------------------
// ConversationStore implementation
// ---------------------------------------------------------------------------

impl ConversationStore for SqliteConversationStore {
    async fn get_channel(&self, external_id: &str) -> Result<Option<Channel>, StoreError> {
        let row = sqlx::query("SELECT * FROM channels WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => Ok(Some(channel_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        // First writer wins on the UNIQUE constraint; everyone re-reads the
        // surviving row.
        sqlx::query("INSERT INTO channels (external_id) VALUES (?) ON CONFLICT (external_id) DO NOTHING")
            .bind(external_id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        self.get_channel(external_id)
            .await?
            .ok_or_else(|| StoreError::Io(format!("channel '{external_id}' missing after insert")))
    }

    async fn get_or_create_channel(&self, external_id: &str) -> Result<Channel, StoreError> {
        if let Some(channel) = self.get_channel(external_id).await? {
            return Ok(channel);
        }
        self.create_channel(external_id).await
    }

    async fn get_vendor(&self, name: &str) -> Result<Option<Vendor>, StoreError> {
        let row = sqlx::query("SELECT * FROM vendors WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => Ok(Some(vendor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_vendor(&self, name: &str, model_config: &str) -> Result<Vendor, StoreError> {
        // An existing name wins; its stored model config is not overwritten.
        sqlx::query("INSERT INTO vendors (name, model_config) VALUES (?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .bind(model_config)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        self.get_vendor(name)
            .await?
            .ok_or_else(|| StoreError::Io(format!("vendor '{name}' missing after insert")))
    }

    async fn get_or_create_vendor(
        &self,
        name: &str,
        model_config: &str,
    ) -> Result<Vendor, StoreError> {
        if let Some(vendor) = self.get_vendor(name).await? {
            return Ok(vendor);
        }
        self.create_vendor(name, model_config).await
    }

    async fn save_message(&self, message: &NewMessage) -> Result<i64, StoreError> {
        self.insert_message(message, &[]).await
    }

    async fn save_message_with_images(
        &self,
        message: &NewMessage,
        image_urls: &[String],
    ) -> Result<i64, StoreError> {
        self.insert_message(message, image_urls).await
    }

    async fn get_visible_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<Vec<Message>, StoreError> {
        let mut sql = String::from(
            r#"SELECT * FROM messages
               WHERE channel_id = ? AND visible = 1 AND is_image_prompt = 0
                 AND id NOT IN (SELECT message_id FROM message_images)"#,
        );
        push_vendor_clause(&mut sql, vendor);
        sql.push_str(" ORDER BY timestamp ASC");

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let VendorFilter::Name(name) = vendor {
            query = query.bind(name);
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg_row = MessageRow::from_row(row).map_err(map_sqlx)?;
            // Rows here carry no images by construction.
            messages.push(msg_row.into_message(Vec::new())?);
        }
        Ok(messages)
    }

    async fn get_latest_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        // Deliberately the FIRST `limit` rows of the ascending result, i.e.
        // the oldest N. See DESIGN.md.
        let mut sql = String::from(
            r#"SELECT * FROM messages
               WHERE channel_id = ? AND visible = 1 AND is_image_prompt = 0
                 AND id NOT IN (SELECT message_id FROM message_images)"#,
        );
        push_vendor_clause(&mut sql, vendor);
        // SQLite reads a negative LIMIT as unlimited; clamp to keep both
        // backends agreeing on degenerate inputs.
        sql.push_str(&format!(" ORDER BY timestamp ASC LIMIT {}", limit.max(0)));

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let VendorFilter::Name(name) = vendor {
            query = query.bind(name);
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg_row = MessageRow::from_row(row).map_err(map_sqlx)?;
            messages.push(msg_row.into_message(Vec::new())?);
        }
        Ok(messages)
    }

    async fn get_latest_images(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let mut sql = String::from(
            r#"SELECT * FROM messages
               WHERE channel_id = ? AND visible = 1 AND is_image_prompt = 0
                 AND id IN (SELECT message_id FROM message_images)"#,
        );
        push_vendor_clause(&mut sql, vendor);
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {}", limit.max(0)));

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let VendorFilter::Name(name) = vendor {
            query = query.bind(name);
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg_row = MessageRow::from_row(row).map_err(map_sqlx)?;
            let images = self.load_images(msg_row.id).await?;
            messages.push(msg_row.into_message(images)?);
        }
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
        // Keep the `window` most recent by (timestamp DESC, id DESC); the id
        // tie-break pins same-timestamp writes to insertion order.
        let mut keep_sql = String::from(
            "SELECT id FROM messages WHERE channel_id = ? AND visible = 1",
        );
        push_vendor_clause(&mut keep_sql, vendor);
        keep_sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT {}",
            window.max(0)
        ));

        let mut sql = String::from(
            "UPDATE messages SET visible = 0 WHERE channel_id = ? AND visible = 1",
        );
        push_vendor_clause(&mut sql, vendor);
        sql.push_str(&format!(" AND id NOT IN ({keep_sql})"));

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let VendorFilter::Name(name) = vendor {
            query = query.bind(name);
        }
        query = query.bind(channel_id);
        if let VendorFilter::Name(name) = vendor {
            query = query.bind(name);
        }

        let result = query
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        tracing::debug!(
            channel = channel_id,
            window,
            deactivated = result.rows_affected(),
            "Deactivated old messages"
        );
        Ok(())
    }

    async fn clear_messages(
        &self,
        channel_id: &str,
        vendor: &VendorFilter,
    ) -> Result<(), StoreError> {
        let mut sql = String::from(
            "UPDATE messages SET visible = 0 WHERE channel_id = ? AND visible = 1",
        );
        push_vendor_clause(&mut sql, vendor);

        let mut query = sqlx::query(&sql).bind(channel_id);
        if let VendorFilter::Name(name) = vendor {
            query = query.bind(name);
        }

        let result = query
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx)?;

        tracing::info!(
            channel = channel_id,
            cleared = result.rows_affected(),
            "Cleared channel messages"
        );
        Ok(())
    }

    async fn get_recent_text_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> Result<i64, StoreError> {
        let cutoff = Utc::now() - Duration::hours(1);

        let row = sqlx::query(
            r#"SELECT COUNT(*) as cnt FROM messages
               WHERE channel_id = ? AND kind = 'prompt'
                 AND vendor_id IN (SELECT id FROM vendors WHERE name = ?)
                 AND timestamp > ?"#,
        )
        .bind(channel_id)
        .bind(vendor_name)
        .bind(format_datetime(&cutoff))
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        row.try_get("cnt").map_err(map_sqlx)
    }

    async fn get_recent_image_request_count(
        &self,
        channel_id: &str,
        vendor_name: &str,
    ) -> Result<i64, StoreError> {
        let cutoff = Utc::now() - Duration::hours(1);

        let row = sqlx::query(
            r#"SELECT COUNT(*) as cnt FROM messages
               WHERE channel_id = ? AND kind = 'prompt' AND is_image_prompt = 1
                 AND vendor_id IN (SELECT id FROM vendors WHERE name = ?)
                 AND timestamp > ?"#,
        )
        .bind(channel_id)
        .bind(vendor_name)
        .bind(format_datetime(&cutoff))
        .fetch_one(&self.pool.reader)
        .await
        .map_err(map_sqlx)?;

        row.try_get("cnt").map_err(map_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Returns the TempDir guard alongside the store so the directory is
    // cleaned up when the test drops it.
    async fn test_store() -> (SqliteConversationStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let store = SqliteConversationStore::connect(&url).await.unwrap();
        (store, dir)
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn prompt_at(channel: &str, vendor_id: i64, content: &str, offset_secs: i64) -> NewMessage {
        NewMessage::new(channel, vendor_id, MessageKind::Prompt, content)
            .at(base_time() + Duration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn test_channel_get_or_create_idempotent() {
        let (store, _dir) = test_store().await;

        let first = store.get_or_create_channel("chan-1").await.unwrap();
        let second = store.get_or_create_channel("chan-1").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.external_id, "chan-1");

        // Plain create on an existing id returns the survivor, not an error.
        let third = store.create_channel("chan-1").await.unwrap();
        assert_eq!(third.id, first.id);
    }

    #[tokio::test]
    async fn test_vendor_create_keeps_existing_config() {
        let (store, _dir) = test_store().await;

        let first = store.create_vendor("openai", "gpt-4o").await.unwrap();
        let second = store.create_vendor("openai", "gpt-5-nope").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.model_config, "gpt-4o");

        let missing = store.get_vendor("stability").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_save_message_assigns_id_and_timestamp() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        let before = Utc::now();
        let draft = NewMessage::new("chan-1", vendor.id, MessageKind::Prompt, "hello");
        let id = store.save_message(&draft).await.unwrap();
        assert!(id > 0);

        let messages = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert!(messages[0].timestamp >= before - Duration::seconds(1));
        assert!(messages[0].visible);
    }

    #[tokio::test]
    async fn test_save_message_unknown_vendor() {
        let (store, _dir) = test_store().await;

        let draft = NewMessage::new("chan-1", 999, MessageKind::Prompt, "hello");
        let err = store.save_message(&draft).await.unwrap_err();
        assert!(matches!(err, StoreError::VendorNotFound(999)));
    }

    #[tokio::test]
    async fn test_visible_messages_ordering_and_exclusions() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        store
            .save_message(&prompt_at("chan-1", vendor.id, "second", 10))
            .await
            .unwrap();
        store
            .save_message(&prompt_at("chan-1", vendor.id, "first", 0))
            .await
            .unwrap();
        // Image prompt: never in text context.
        store
            .save_message(&prompt_at("chan-1", vendor.id, "draw a cat", 20).image_prompt())
            .await
            .unwrap();
        // Image carrier: excluded from text context.
        store
            .save_message_with_images(
                &prompt_at("chan-1", vendor.id, "here it is", 30),
                &["https://img.example/cat.png".to_string()],
            )
            .await
            .unwrap();
        // Different channel: scoped out.
        store
            .save_message(&prompt_at("chan-2", vendor.id, "elsewhere", 5))
            .await
            .unwrap();

        let messages = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_vendor_filter_scoping() {
        let (store, _dir) = test_store().await;
        let openai = store.create_vendor("openai", "gpt-4o").await.unwrap();
        let stability = store.create_vendor("stability", "sdxl").await.unwrap();

        store
            .save_message(&prompt_at("chan-1", openai.id, "from openai", 0))
            .await
            .unwrap();
        store
            .save_message(&prompt_at("chan-1", stability.id, "from stability", 10))
            .await
            .unwrap();

        let all = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let scoped = store
            .get_visible_messages("chan-1", &VendorFilter::name("openai"))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].content, "from openai");
    }

    #[tokio::test]
    async fn test_latest_messages_returns_oldest_n() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        for (i, content) in ["m1", "m2", "m3", "m4", "m5"].iter().enumerate() {
            store
                .save_message(&prompt_at("chan-1", vendor.id, content, i as i64 * 10))
                .await
                .unwrap();
        }

        // Oldest-N truncation: the oldest 2, not the newest 2.
        let latest = store
            .get_latest_messages("chan-1", &VendorFilter::Any, 2)
            .await
            .unwrap();
        let contents: Vec<&str> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_latest_images_newest_first() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        for (i, url) in ["a.png", "b.png", "c.png"].iter().enumerate() {
            store
                .save_message_with_images(
                    &prompt_at("chan-1", vendor.id, "image", i as i64 * 10),
                    &[format!("https://img.example/{url}")],
                )
                .await
                .unwrap();
        }

        let latest = store
            .get_latest_images("chan-1", &VendorFilter::Any, 2)
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].images[0].url, "https://img.example/c.png");
        assert_eq!(latest[1].images[0].url, "https://img.example/b.png");
        assert!(latest[0].images[0].data.is_none());

        assert!(store
            .has_images_in_context("chan-1", &VendorFilter::Any)
            .await
            .unwrap());
        assert!(!store
            .has_images_in_context("chan-2", &VendorFilter::Any)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_deactivate_keeps_newest_window() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        for (i, content) in ["m1", "m2", "m3", "m4", "m5"].iter().enumerate() {
            store
                .save_message(&prompt_at("chan-1", vendor.id, content, i as i64 * 10))
                .await
                .unwrap();
        }

        store
            .deactivate_old_messages("chan-1", &VendorFilter::Any, 3)
            .await
            .unwrap();

        let visible = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        let contents: Vec<&str> = visible.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);

        // Oldest-N of what remains.
        let latest = store
            .get_latest_messages("chan-1", &VendorFilter::Any, 2)
            .await
            .unwrap();
        let contents: Vec<&str> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_deactivate_tie_break_by_id() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        // Same timestamp for all four: the id tie-break keeps the two most
        // recently inserted.
        for content in ["m1", "m2", "m3", "m4"] {
            store
                .save_message(&prompt_at("chan-1", vendor.id, content, 0))
                .await
                .unwrap();
        }

        store
            .deactivate_old_messages("chan-1", &VendorFilter::Any, 2)
            .await
            .unwrap();

        let visible = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        let contents: Vec<&str> = visible.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_deactivate_respects_vendor_filter() {
        let (store, _dir) = test_store().await;
        let openai = store.create_vendor("openai", "gpt-4o").await.unwrap();
        let stability = store.create_vendor("stability", "sdxl").await.unwrap();

        store
            .save_message(&prompt_at("chan-1", openai.id, "keepable", 0))
            .await
            .unwrap();
        store
            .save_message(&prompt_at("chan-1", stability.id, "other vendor", 10))
            .await
            .unwrap();

        store
            .deactivate_old_messages("chan-1", &VendorFilter::name("openai"), 0)
            .await
            .unwrap();

        let visible = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, "other vendor");
    }

    #[tokio::test]
    async fn test_clear_messages_is_total() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();

        for i in 0..4 {
            store
                .save_message(&prompt_at("chan-1", vendor.id, "msg", i * 10))
                .await
                .unwrap();
        }

        store
            .clear_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();

        let visible = store
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test]
    async fn test_recent_request_counts() {
        let (store, _dir) = test_store().await;
        let vendor = store.create_vendor("openai", "gpt-4o").await.unwrap();
        let now = Utc::now();

        // Two recent text prompts, one recent image prompt, one stale prompt,
        // one recent assistant reply (not counted).
        store
            .save_message(
                &NewMessage::new("chan-1", vendor.id, MessageKind::Prompt, "q1")
                    .at(now - Duration::minutes(10)),
            )
            .await
            .unwrap();
        store
            .save_message(
                &NewMessage::new("chan-1", vendor.id, MessageKind::Prompt, "q2")
                    .at(now - Duration::minutes(30)),
            )
            .await
            .unwrap();
        store
            .save_message(
                &NewMessage::new("chan-1", vendor.id, MessageKind::Prompt, "draw")
                    .image_prompt()
                    .at(now - Duration::minutes(5)),
            )
            .await
            .unwrap();
        store
            .save_message(
                &NewMessage::new("chan-1", vendor.id, MessageKind::Prompt, "stale")
                    .at(now - Duration::minutes(90)),
            )
            .await
            .unwrap();
        store
            .save_message(
                &NewMessage::new("chan-1", vendor.id, MessageKind::Assistant, "answer")
                    .at(now - Duration::minutes(1)),
            )
            .await
            .unwrap();

        let text = store
            .get_recent_text_request_count("chan-1", "openai")
            .await
            .unwrap();
        assert_eq!(text, 3); // both text prompts + the image prompt

        let image = store
            .get_recent_image_request_count("chan-1", "openai")
            .await
            .unwrap();
        assert_eq!(image, 1);

        // Windowing must not refill rate budget.
        store
            .clear_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        let text_after_clear = store
            .get_recent_text_request_count("chan-1", "openai")
            .await
            .unwrap();
        assert_eq!(text_after_clear, 3);
    }

    #[tokio::test]
    async fn test_closed_store_reports_not_connected() {
        let (store, _dir) = test_store().await;
        store.close().await;

        let err = store.get_channel("chan-1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
    }

    #[tokio::test]
    async fn test_failed_image_save_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let store = SqliteConversationStore::connect(&url).await.unwrap();
        let vendor = store.create_vendor("stability", "sdxl").await.unwrap();
        store.close().await;

        // The save must fail as a whole: no committed message row that the
        // text context would then pick up as imageless.
        let draft = NewMessage::new("chan-1", vendor.id, MessageKind::Assistant, "fox");
        let err = store
            .save_message_with_images(&draft, &["https://img.example/fox.png".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));

        let reopened = SqliteConversationStore::connect(&url).await.unwrap();
        let visible = reopened
            .get_visible_messages("chan-1", &VendorFilter::Any)
            .await
            .unwrap();
        assert!(visible.is_empty());
        assert!(!reopened
            .has_images_in_context("chan-1", &VendorFilter::Any)
            .await
            .unwrap());
    }
}
