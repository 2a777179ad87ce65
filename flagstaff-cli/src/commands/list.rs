//! Feature listing command
//!
//! Lists the features defined in the process, or the names a store holds
//! values for.

use super::select_store;
use crate::error::CliResult;
use colored::Colorize;
use flagstaff_features::FeatureManager;
use std::io::Write;

/// List defined (or stored) feature names.
pub async fn execute(
    manager: &FeatureManager,
    store: Option<&str>,
    stored: bool,
    out: &mut impl Write,
) -> CliResult<()> {
    let selected = select_store(manager, store).await?;

    let (heading, names) = if stored {
        ("Stored features", selected.stored().await?)
    } else {
        ("Defined features", selected.defined())
    };

    writeln!(
        out,
        "{} {}",
        heading.bright_cyan().bold(),
        format!("[{}]", selected.name()).dimmed()
    )?;

    if names.is_empty() {
        writeln!(out, "  No features found.")?;
        return Ok(());
    }

    for name in &names {
        writeln!(out, "  {} {}", "•".dimmed(), name.green())?;
    }
    writeln!(out)?;
    writeln!(out, "  Total: {}", names.len())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstaff_features::FeaturesConfig;

    fn render(buffer: Vec<u8>) -> String {
        String::from_utf8(buffer).unwrap()
    }

    #[tokio::test]
    async fn lists_defined_features() {
        let manager = FeatureManager::new(FeaturesConfig::default()).unwrap();
        manager.define_value("beta", true);
        manager.define_value("alpha", false);

        let mut out = Vec::new();
        execute(&manager, None, false, &mut out).await.unwrap();
        let output = render(out);

        assert!(output.contains("Defined features"));
        assert!(output.contains("alpha"));
        assert!(output.contains("beta"));
        assert!(output.contains("Total: 2"));
    }

    #[tokio::test]
    async fn lists_only_stored_features() {
        let manager = FeatureManager::new(FeaturesConfig::default()).unwrap();
        manager.define_value("beta", true);
        manager.define_value("alpha", false);
        manager.active("beta").await.unwrap();

        let mut out = Vec::new();
        execute(&manager, None, true, &mut out).await.unwrap();
        let output = render(out);

        assert!(output.contains("Stored features"));
        assert!(output.contains("beta"));
        assert!(!output.contains("alpha"));
    }

    #[tokio::test]
    async fn reports_empty_store() {
        let manager = FeatureManager::new(FeaturesConfig::default()).unwrap();

        let mut out = Vec::new();
        execute(&manager, Some("array"), true, &mut out)
            .await
            .unwrap();

        assert!(render(out).contains("No features found."));
    }

    #[tokio::test]
    async fn unknown_store_is_an_error() {
        let manager = FeatureManager::new(FeaturesConfig::default()).unwrap();

        let mut out = Vec::new();
        let result = execute(&manager, Some("missing"), false, &mut out).await;

        assert!(result.is_err());
    }
}
