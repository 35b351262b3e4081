use thiserror::Error;

/// Errors from conversation store operations (used by the trait definition
/// in murmur-core and both backend implementations in murmur-infra).
///
/// The store performs no internal retries and no silent recovery: every
/// failure is surfaced to the immediate caller, and no operation partially
/// succeeds while reporting success.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation invoked before the backend finished initializing, or after
    /// it was closed. Fatal to the calling operation, not the process.
    #[error("store not connected")]
    NotConnected,

    /// A save referenced a vendor id the store does not know. Callers are
    /// expected to have registered vendors at startup.
    #[error("vendor id {0} not found")]
    VendorNotFound(i64),

    /// The durable backend's physical I/O failed. Not retried internally.
    #[error("backend I/O error: {0}")]
    Io(String),
}
