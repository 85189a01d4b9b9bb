//! The data-plane boundary (§1): this crate owns metadata only, but the
//! TTL/eviction controller (§4.4) needs to ask *something* to delete bytes
//! once their locators are gone. `ObjectStore` is that seam.
//!
//! Grounded in the teacher's `blob_store.rs` trait shape (an async trait
//! the metadata layer calls out to, implemented by a real cloud adapter in
//! production and a local/no-op double in tests) — generalized here from a
//! single-object get/put interface to the batched `delete_objects` call
//! `clean_object` actually needs.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Best-effort delete of `keys` under `location_tag`. On success,
    /// every key's physical locator row is removed by the caller; on
    /// error, the caller rolls back its pending transitions and retries
    /// on the next sweep (§4.4).
    async fn delete_objects(&self, location_tag: &str, keys: &[String]) -> anyhow::Result<()>;
}

/// Logging no-op adapter used when `local_test = true` (§6 config
/// surface): `clean_object` still exercises its full metadata transition
/// without needing a real cloud credential.
pub struct LocalObjectStore;

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn delete_objects(&self, location_tag: &str, keys: &[String]) -> anyhow::Result<()> {
        info!(location_tag, count = keys.len(), "local_test: skipping real delete_objects");
        Ok(())
    }
}
