//! Feature Flags for Flagstaff
//!
//! Resolves named features against scopes, remembers the result in a
//! pluggable store and caches it for the life of the process.
//!
//! # Features
//!
//! - **Lazy resolution** - A feature's resolver runs once per scope; the
//!   result is stored and reused
//! - **Scopes** - Evaluate features per user, team, string or globally
//! - **Lotteries** - Randomised rollout drawn once per scope
//! - **Stores** - In-memory, Redis (`redis` feature) and SQLite (`database`
//!   feature) drivers, plus custom drivers
//! - **Batched loading** - Check many features for many scopes in one round trip
//!
//! # Quick Start
//!
//! ```
//! use flagstaff_features::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), FeatureError> {
//! let manager = FeatureManager::new(FeaturesConfig::default())?;
//!
//! manager.define("new-dashboard", |scope: &Scope| scope.as_str() == Some("taylor"));
//! manager.define_value("purchase-button", "blue");
//!
//! let store = manager.driver().await?;
//! assert!(store.for_scope("taylor").active("new-dashboard").await?);
//! assert!(store.for_scope("tim").inactive("new-dashboard").await?);
//! assert_eq!(store.value("purchase-button").await?, "blue");
//! # Ok(())
//! # }
//! ```
//!
//! # Updating Features
//!
//! ```
//! use flagstaff_features::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), FeatureError> {
//! let manager = FeatureManager::new(FeaturesConfig::default())?;
//! manager.define_value("beta", false);
//!
//! let store = manager.driver().await?;
//! store.for_scope("tim").activate("beta").await?;
//!
//! assert!(store.for_scope("tim").active("beta").await?);
//! assert!(store.inactive("beta").await?);
//! # Ok(())
//! # }
//! ```
//!
//! # Long-running Processes
//!
//! Each store caches resolved values. Call [`FeatureManager::flush_cache`]
//! between independent units of work (requests, jobs) so one unit never sees
//! values cached by another.

pub mod config;
pub mod decorator;
pub mod drivers;
pub mod error;
pub mod events;
pub mod interaction;
pub mod lottery;
pub mod manager;
pub mod registry;
pub mod scope;

pub use config::{FeaturesConfig, StoreConfig};
pub use decorator::{DefaultScopeResolver, FeatureStore, LoadRequest};
pub use drivers::{
    ArrayDriver, Driver, DriverContext, FeatureScopes, ResolvedValues, is_active,
};
#[cfg(feature = "database")]
pub use drivers::DatabaseDriver;
#[cfg(feature = "redis")]
pub use drivers::RedisDriver;
pub use error::{FeatureError, FeatureResult};
pub use events::{EventDispatcher, FeatureEvent};
pub use interaction::{IntoFeatureNames, ScopedInteraction};
pub use lottery::Lottery;
pub use manager::{DriverCreator, FeatureManager};
pub use registry::{
    DiscoveredFeature, FeatureClass, FeatureRegistry, Resolved, ResolverFn, class_key,
};
pub use scope::{EntityScope, FeatureScopeable, Scope, ScopeEntity, canonical_json};

/// Prelude for common imports.
///
/// ```
/// use flagstaff_features::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{FeaturesConfig, StoreConfig};
    pub use crate::decorator::FeatureStore;
    pub use crate::error::{FeatureError, FeatureResult};
    pub use crate::events::FeatureEvent;
    pub use crate::lottery::Lottery;
    pub use crate::manager::FeatureManager;
    pub use crate::registry::{FeatureClass, Resolved};
    pub use crate::scope::{EntityScope, FeatureScopeable, Scope, ScopeEntity};
}
