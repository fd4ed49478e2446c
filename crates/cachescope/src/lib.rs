//! # Cachescope
//!
//! A desktop-side inspector for remote query caches. Devices stream
//! dehydrated snapshots of their cache; the inspector mirrors each device,
//! filters what the dashboard sees by storage category and passes cache
//! actions back.
//!
//! ## Overview
//!
//! - **Devices**: keyed by persistent id, surviving reconnects
//! - **Mirrors**: one rehydrated cache per device, never filtered
//! - **Views**: what the dashboard shows, filtered by storage category
//! - **Actions**: invalidate, refetch and remove, applied to the mirror and
//!   queued for the device
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cachescope::{forward_actions, Inspector, InspectorConfig};
//! use cachescope::sync::MemoryNetwork;
//!
//! async fn example() -> cachescope::Result<()> {
//!     let network = MemoryNetwork::new(64);
//!     let transport = network.inspector_transport()?;
//!
//!     let config = InspectorConfig::default().with_preferences_path("cachescope.db");
//!     let codec = config.frame_codec;
//!     let (inspector, actions) = Inspector::open(config).await;
//!
//!     tokio::join!(
//!         inspector.run(&transport),
//!         forward_actions(actions, &transport, codec),
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `cachescope::core` - Value model, serializer, snapshot types
//! - `cachescope::store` - Live cache, dehydrate/rehydrate, preferences
//! - `cachescope::sync` - Envelope, transport, registry, publisher

pub mod config;
pub mod error;
pub mod inspector;
pub mod view;

pub use cachescope_core as core;
pub use cachescope_store as store;
pub use cachescope_sync as sync;

pub use config::InspectorConfig;
pub use error::{InspectorError, Result};
pub use inspector::{forward_actions, DashboardAction, IngestOutcome, Inspector};
pub use view::CacheView;

pub use cachescope_core::{
    DehydratedMutation, DehydratedQuery, DehydratedState, EnabledCategories, QueryHash, QueryKey,
    StorageCategory, Value,
};
pub use cachescope_sync::{Device, PersistentDeviceId, SocketId};
