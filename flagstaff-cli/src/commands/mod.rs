//! CLI commands

pub mod list;
pub mod purge;

use crate::error::CliResult;
use flagstaff_features::{FeatureManager, FeatureStore};
use std::sync::Arc;

/// Select the named store, or the manager's default store.
pub(crate) async fn select_store(
    manager: &FeatureManager,
    store: Option<&str>,
) -> CliResult<Arc<FeatureStore>> {
    let selected = match store {
        Some(name) => manager.store(name).await?,
        None => manager.driver().await?,
    };
    Ok(selected)
}
