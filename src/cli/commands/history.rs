//! Read-only commands: observation history, product list, snapshot export.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use console::style;

use crate::config::Settings;
use crate::models::{ObservationRecord, ProductId};
use crate::repository::{ObservationQuery, Store};

fn open_existing(settings: &Settings) -> anyhow::Result<Store> {
    if !settings.database_exists() {
        bail!(
            "No database at {} (run `stocktrail init` or `stocktrail crawl` first)",
            settings.database_path().display()
        );
    }
    Ok(Store::open(&settings.database_path())?)
}

/// Parse a time bound given as RFC 3339 or a bare date. A bare date means
/// the start of that day, or its last second when `end_of_day` is set.
fn parse_time_bound(value: &str, end_of_day: bool) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid time '{}': expected RFC 3339 or YYYY-MM-DD", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .context("invalid time of day")?;
    Ok(date.and_time(time).and_utc())
}

#[allow(clippy::too_many_arguments)]
pub fn build_query(
    product_id: Option<ProductId>,
    category: Option<String>,
    subcategory: Option<String>,
    name: Option<String>,
    from: Option<&str>,
    to: Option<&str>,
    limit: Option<u32>,
) -> anyhow::Result<ObservationQuery> {
    Ok(ObservationQuery {
        product_id,
        category,
        subcategory,
        name,
        from: from.map(|s| parse_time_bound(s, false)).transpose()?,
        to: to.map(|s| parse_time_bound(s, true)).transpose()?,
        limit,
    })
}

/// Stock change of each record relative to the previous record of the same
/// product; `None` when either side has no stock value.
fn stock_changes(records: &[ObservationRecord]) -> Vec<Option<i64>> {
    let mut last: HashMap<ProductId, Option<i64>> = HashMap::new();
    records
        .iter()
        .map(|record| {
            let previous = last.insert(record.product_id, record.stock_amount).flatten();
            match (previous, record.stock_amount) {
                (Some(prev), Some(current)) => Some(current - prev),
                _ => None,
            }
        })
        .collect()
}

/// Print observations joined with product metadata, one JSON object per line.
pub fn cmd_history(settings: &Settings, query: &ObservationQuery, changes: bool) -> anyhow::Result<()> {
    let store = open_existing(settings)?;
    let records = store.observations(query)?;
    store.close()?;

    let deltas = if changes {
        stock_changes(&records)
    } else {
        Vec::new()
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (idx, record) in records.iter().enumerate() {
        let mut value = serde_json::to_value(record)?;
        if let (Some(Some(delta)), Some(obj)) = (deltas.get(idx), value.as_object_mut()) {
            obj.insert("stock_change".to_string(), (*delta).into());
        }
        writeln!(out, "{}", value)?;
    }

    Ok(())
}

/// List tracked products.
pub fn cmd_products(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = open_existing(settings)?;
    let products = store.products()?;
    store.close()?;

    if json {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for product in &products {
            writeln!(out, "{}", serde_json::to_string(product)?)?;
        }
        return Ok(());
    }

    if products.is_empty() {
        println!("{} No products tracked yet", style("!").yellow());
        return Ok(());
    }

    let mut current_path = None;
    for product in &products {
        let path = (&product.category, &product.subcategory);
        if current_path != Some(path) {
            println!(
                "\n{} {} / {}",
                style("→").cyan(),
                style(&product.category).bold(),
                product.subcategory
            );
            current_path = Some(path);
        }
        println!(
            "  {:>5}  {}  {}",
            style(product.id).dim(),
            product.name,
            style(&product.link).dim()
        );
    }

    Ok(())
}

/// Write an observation's snapshot to a file.
pub fn cmd_snapshot(settings: &Settings, observation_id: i64, output: &Path) -> anyhow::Result<()> {
    let store = open_existing(settings)?;
    let snapshot = store.snapshot(observation_id)?;
    store.close()?;

    let Some(bytes) = snapshot else {
        bail!("Observation {} has no snapshot", observation_id);
    };

    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "{} Wrote {} bytes to {}",
        style("✓").green(),
        bytes.len(),
        output.display()
    );

    Ok(())
}
