//! Persistent image cache storage.
//!
//! [`CacheStore`] is the contract; [`SqliteStore`] and [`MemoryStore`] are
//! the two backends. [`open_store`] picks one from configuration.

mod memory;
mod sqlite;
mod traits;

use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::config::{StoreBackend, StoreSettings};

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, DEFAULT_MAX_CONNECTIONS};
pub use traits::{CacheStore, CachedImage, StoreError, StoreStats, ZoomStats};

/// Open the backend selected in `settings`.
pub async fn open_store(
    settings: &StoreSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CacheStore>, StoreError> {
    let store: Arc<dyn CacheStore> = match settings.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&settings.path, settings.max_connections, clock).await?,
        ),
        StoreBackend::Memory => Arc::new(MemoryStore::with_clock(clock)),
    };

    info!(backend = store.name(), "Cache store ready");
    Ok(store)
}
