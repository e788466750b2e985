//! Observation models: one timestamped measurement of a product page.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ProductId;

/// Row ID of an observation.
pub type ObservationId = i64;

/// Price shown on a product page.
///
/// `units` is set when the page quotes the price for a pack of several
/// pieces. The amount stays numeric either way so histories remain
/// comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<u32>,
}

impl Price {
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount,
            units: None,
        }
    }

    pub fn per_units(amount: Decimal, units: u32) -> Self {
        Self {
            amount,
            units: Some(units),
        }
    }

    /// Whether this is the composite "amount for N units" form.
    pub fn is_composite(&self) -> bool {
        self.units.is_some()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.units {
            Some(units) => write!(f, "{} for {} pieces", self.amount, units),
            None => write!(f, "{}", self.amount),
        }
    }
}

/// Observation to be appended to a product's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservation {
    pub product_id: ProductId,
    pub observed_at: DateTime<Utc>,
    pub stock_amount: Option<i64>,
    pub price: Option<Price>,
    /// JPEG-encoded page snapshot.
    pub snapshot: Option<Vec<u8>>,
}

/// Stored observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub product_id: ProductId,
    pub observed_at: DateTime<Utc>,
    pub stock_amount: Option<i64>,
    pub price: Option<Price>,
    /// Whether a snapshot blob is stored (fetch it separately, blobs are large).
    pub has_snapshot: bool,
}

/// Observation joined with its product's metadata, as returned by history queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub observation_id: ObservationId,
    pub product_id: ProductId,
    pub category: String,
    pub subcategory: String,
    pub name: String,
    pub observed_at: DateTime<Utc>,
    pub stock_amount: Option<i64>,
    pub price: Option<Price>,
    pub has_snapshot: bool,
}
