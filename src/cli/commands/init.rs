//! Initialize command.

use anyhow::Context;
use console::style;

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::repository::Store;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings
        .ensure_directories()
        .with_context(|| format!("Failed to create {}", settings.data_dir.display()))?;

    let db_path = settings.database_path();
    Store::open(&db_path)?.close()?;
    println!(
        "  {} Database ready: {}",
        style("✓").green(),
        db_path.display()
    );

    if settings.catalog_path.exists() {
        let catalog = Catalog::load(&settings.catalog_path)?;
        println!(
            "  {} Catalog lists {} products in {} categories",
            style("✓").green(),
            catalog.len(),
            catalog.categories.len()
        );
    } else {
        println!(
            "{} No catalog at {}",
            style("!").yellow(),
            settings.catalog_path.display()
        );
        println!("  Run the link harvester or pass --catalog to `stocktrail crawl`");
    }

    println!(
        "{} Initialized stocktrail in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
