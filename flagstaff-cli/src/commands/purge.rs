//! Feature purge command
//!
//! Removes stored values so features resolve afresh on their next check.

use super::select_store;
use crate::error::CliResult;
use colored::Colorize;
use flagstaff_features::FeatureManager;
use std::io::Write;
use tracing::debug;

/// Purge the named features, or every stored feature.
///
/// Names in `except` are never purged. With no names and no exceptions the
/// whole store is purged; with exceptions only, every stored name except
/// those is purged.
pub async fn execute(
    manager: &FeatureManager,
    features: &[String],
    except: &[String],
    store: Option<&str>,
    out: &mut impl Write,
) -> CliResult<()> {
    let selected = select_store(manager, store).await?;

    if features.is_empty() && except.is_empty() {
        selected.purge_all().await?;
        writeln!(
            out,
            "{} All features purged from [{}].",
            "✓".green().bold(),
            selected.name()
        )?;
        return Ok(());
    }

    let candidates = if features.is_empty() {
        selected.stored().await?
    } else {
        features.to_vec()
    };

    let mut targets: Vec<String> = Vec::new();
    for name in candidates {
        if !except.contains(&name) && !targets.contains(&name) {
            targets.push(name);
        }
    }

    debug!(store = %selected.name(), count = targets.len(), "Purging features");

    if targets.is_empty() {
        writeln!(out, "{} No features to purge.", "!".yellow().bold())?;
        return Ok(());
    }

    selected.purge(Some(targets.clone())).await?;
    writeln!(
        out,
        "{} Purged from [{}]: {}",
        "✓".green().bold(),
        selected.name(),
        targets.join(", ")
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstaff_features::FeaturesConfig;

    async fn seeded() -> FeatureManager {
        let manager = FeatureManager::new(FeaturesConfig::default()).unwrap();
        for name in ["alpha", "beta", "gamma"] {
            manager.define_value(name, true);
            manager.active(name).await.unwrap();
        }
        manager
    }

    async fn stored(manager: &FeatureManager) -> Vec<String> {
        manager.driver().await.unwrap().stored().await.unwrap()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn purges_everything_without_arguments() {
        let manager = seeded().await;

        let mut out = Vec::new();
        execute(&manager, &[], &[], None, &mut out).await.unwrap();

        assert!(stored(&manager).await.is_empty());
        assert!(String::from_utf8(out).unwrap().contains("All features purged"));
    }

    #[tokio::test]
    async fn purges_named_features() {
        let manager = seeded().await;

        let mut out = Vec::new();
        execute(&manager, &strings(&["alpha", "gamma"]), &[], None, &mut out)
            .await
            .unwrap();

        assert_eq!(stored(&manager).await, vec!["beta"]);
    }

    #[tokio::test]
    async fn except_filters_named_features() {
        let manager = seeded().await;

        let mut out = Vec::new();
        execute(
            &manager,
            &strings(&["alpha", "beta"]),
            &strings(&["beta"]),
            None,
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(stored(&manager).await, vec!["beta", "gamma"]);
    }

    #[tokio::test]
    async fn except_alone_keeps_only_exceptions() {
        let manager = seeded().await;

        let mut out = Vec::new();
        execute(&manager, &[], &strings(&["gamma"]), None, &mut out)
            .await
            .unwrap();

        assert_eq!(stored(&manager).await, vec!["gamma"]);
    }

    #[tokio::test]
    async fn nothing_left_to_purge() {
        let manager = seeded().await;

        let mut out = Vec::new();
        execute(
            &manager,
            &strings(&["alpha"]),
            &strings(&["alpha"]),
            None,
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(stored(&manager).await.len(), 3);
        assert!(String::from_utf8(out).unwrap().contains("No features to purge"));
    }
}
