//! Application bootstrap and lifecycle management.
//!
//! This module provides the `MapVaultApp` type which wires the cache store,
//! the providers, the retriever and the eviction task together from one
//! [`SettingsHandle`], in one place.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        MapVaultApp                           │
//! │                                                              │
//! │  1. CacheStore (sqlite | memory)                             │
//! │                                                              │
//! │  2. ReqwestHttpClient ──► PdokGeocoder                       │
//! │                      └──► GoogleStaticMapsProvider           │
//! │                                                              │
//! │  3. MapImageRetriever (store + geocoder + imagery)           │
//! │                                                              │
//! │  4. CacheEvictionTask (store + retention policy)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mapvault::app::MapVaultApp;
//! use mapvault::config::SettingsHandle;
//!
//! let settings = SettingsHandle::load(config_file_path())?;
//! let app = MapVaultApp::start(settings).await?;
//!
//! let image = app.retriever().get_image(Some("1012 JS"), Some(1), zoom, &token).await?;
//! let report = app.eviction().run_sweep(&token).await;
//!
//! app.shutdown();
//! ```

mod bootstrap;
mod error;

pub use bootstrap::MapVaultApp;
pub use error::AppError;
