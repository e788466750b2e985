//! Row parsing helpers for the store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rust_decimal::Decimal;

use super::parse_timestamp;
use crate::models::{Observation, ObservationRecord, Price, Product};

fn timestamp_column(row: &rusqlite::Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            row.as_ref().column_index(column).unwrap_or(0),
            Type::Text,
            Box::new(e),
        )
    })
}

fn price_columns(row: &rusqlite::Row) -> rusqlite::Result<Option<Price>> {
    let amount: Option<String> = row.get("price_amount")?;
    let units: Option<u32> = row.get("price_units")?;

    let Some(amount) = amount else {
        return Ok(None);
    };
    let amount = Decimal::from_str(&amount).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            row.as_ref().column_index("price_amount").unwrap_or(0),
            Type::Text,
            Box::new(e),
        )
    })?;

    Ok(Some(Price { amount, units }))
}

/// Parse a `products` row.
pub fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get("id")?,
        category: row.get("category")?,
        subcategory: row.get("subcategory")?,
        name: row.get("name")?,
        link: row.get("link")?,
        first_seen: timestamp_column(row, "first_seen")?,
    })
}

/// Parse an `observations` row selected with a `has_snapshot` column.
pub fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get("id")?,
        product_id: row.get("product_id")?,
        observed_at: timestamp_column(row, "observed_at")?,
        stock_amount: row.get("stock_amount")?,
        price: price_columns(row)?,
        has_snapshot: row.get("has_snapshot")?,
    })
}

/// Parse a row of the joined history query.
pub fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ObservationRecord> {
    Ok(ObservationRecord {
        observation_id: row.get("observation_id")?,
        product_id: row.get("product_id")?,
        category: row.get("category")?,
        subcategory: row.get("subcategory")?,
        name: row.get("name")?,
        observed_at: timestamp_column(row, "observed_at")?,
        stock_amount: row.get("stock_amount")?,
        price: price_columns(row)?,
        has_snapshot: row.get("has_snapshot")?,
    })
}
