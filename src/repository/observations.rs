//! Observation history: append and query.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::types::Value;
use rusqlite::{ffi, params, params_from_iter};

use super::helpers::{row_to_observation, row_to_record};
use super::{classify_write_error, format_timestamp, to_option, Result, Store, StoreError};
use crate::models::{NewObservation, Observation, ObservationId, ObservationRecord, ProductId};

/// Filters for the joined history query. Empty filters match everything.
#[derive(Debug, Clone, Default)]
pub struct ObservationQuery {
    pub product_id: Option<ProductId>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Case-insensitive substring match on the product name (Unicode
    /// lowercase on both sides).
    pub name: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl ObservationQuery {
    pub fn for_product(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Default::default()
        }
    }
}

impl Store {
    /// Append one observation. Existing observations are never modified.
    pub fn append_observation(&self, observation: &NewObservation) -> Result<ObservationId> {
        let (price_amount, price_units) = match &observation.price {
            Some(price) => (Some(price.amount.to_string()), price.units),
            None => (None, None),
        };

        let result = self.conn.execute(
            r#"
            INSERT INTO observations (
                product_id, observed_at, stock_amount, price_amount, price_units, snapshot
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                observation.product_id,
                format_timestamp(&observation.observed_at),
                observation.stock_amount,
                price_amount,
                price_units,
                observation.snapshot.as_deref(),
            ],
        );

        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(e) => Err(classify_insert_error(e, observation.product_id)),
        }
    }

    /// Observations of one product in chronological order.
    pub fn history(&self, product_id: ProductId) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, product_id, observed_at, stock_amount, price_amount, price_units,
                   snapshot IS NOT NULL AS has_snapshot
            FROM observations
            WHERE product_id = ?
            ORDER BY observed_at, id
            "#,
        )?;
        let observations = stmt
            .query_map(params![product_id], row_to_observation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(observations)
    }

    /// Joined observation history, ordered by observation time.
    pub fn observations(&self, query: &ObservationQuery) -> Result<Vec<ObservationRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(id) = query.product_id {
            clauses.push("o.product_id = ?");
            args.push(Value::Integer(id));
        }
        if let Some(ref category) = query.category {
            clauses.push("p.category = ?");
            args.push(Value::Text(category.clone()));
        }
        if let Some(ref subcategory) = query.subcategory {
            clauses.push("p.subcategory = ?");
            args.push(Value::Text(subcategory.clone()));
        }
        if let Some(ref name) = query.name {
            clauses.push("fold_case(p.name) LIKE ? ESCAPE '\\'");
            args.push(Value::Text(format!("%{}%", escape_like(&name.to_lowercase()))));
        }
        if let Some(from) = query.from {
            clauses.push("o.observed_at >= ?");
            args.push(Value::Text(format_timestamp(&lower_bound(&from))));
        }
        if let Some(to) = query.to {
            clauses.push("o.observed_at <= ?");
            args.push(Value::Text(format_timestamp(&to)));
        }

        let mut sql = String::from(
            r#"
            SELECT o.id AS observation_id, o.product_id, p.category, p.subcategory, p.name,
                   o.observed_at, o.stock_amount, o.price_amount, o.price_units,
                   o.snapshot IS NOT NULL AS has_snapshot
            FROM observations o
            JOIN products p ON p.id = o.product_id
            "#,
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY o.observed_at, o.id");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Stored snapshot bytes of an observation, if it has one.
    pub fn snapshot(&self, observation_id: ObservationId) -> Result<Option<Vec<u8>>> {
        let blob: Option<Option<Vec<u8>>> = to_option(self.conn.query_row(
            "SELECT snapshot FROM observations WHERE id = ?",
            params![observation_id],
            |row| row.get(0),
        ))?;
        Ok(blob.flatten())
    }

    /// Total number of stored observations.
    pub fn count_observations(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn classify_insert_error(e: rusqlite::Error, product_id: ProductId) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            StoreError::Referential(product_id)
        }
        other => classify_write_error(other),
    }
}

/// Stored timestamps are whole seconds, so a fractional lower bound starts
/// at the next second.
fn lower_bound(from: &DateTime<Utc>) -> DateTime<Utc> {
    let whole = from.trunc_subsecs(0);
    if whole < *from {
        whole + Duration::seconds(1)
    } else {
        whole
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
