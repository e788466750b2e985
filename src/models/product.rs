//! Product identity models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable numeric key of a tracked product.
pub type ProductId = i64;

/// One physical product tracked over time, keyed by its canonical link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Database row ID, assigned on first sight and never reused.
    pub id: ProductId,
    pub category: String,
    pub subcategory: String,
    /// Display name, refreshed on re-crawl under [`MetadataPolicy::Refresh`].
    pub name: String,
    /// Canonical product link (unique).
    pub link: String,
    /// When the link was first resolved.
    pub first_seen: DateTime<Utc>,
}

/// What to do with the stored display metadata when a known link is resolved again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataPolicy {
    /// Last write wins on category, subcategory and name.
    #[default]
    Refresh,
    /// Keep whatever was stored when the product was first seen.
    Keep,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_policy_config_names() {
        let keep: MetadataPolicy = serde_json::from_str("\"keep\"").unwrap();
        assert_eq!(keep, MetadataPolicy::Keep);
        assert_eq!(serde_json::to_string(&MetadataPolicy::Refresh).unwrap(), "\"refresh\"");
        assert!(serde_json::from_str::<MetadataPolicy>("\"overwrite\"").is_err());
    }
}
