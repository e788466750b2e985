//! Product identity resolution.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::helpers::row_to_product;
use super::{classify_write_error, format_timestamp, to_option, Result, Store};
use crate::catalog::CatalogEntry;
use crate::models::{MetadataPolicy, Product, ProductId};

impl Store {
    /// Map a catalog entry to its stable product id, creating the identity
    /// on first sight.
    ///
    /// The link is the identity key. Resolving the same link again returns
    /// the same id; under [`MetadataPolicy::Refresh`] the stored category,
    /// subcategory and name are replaced with the entry's. `seen_at` becomes
    /// `first_seen` of a new identity; crawls pass the run timestamp.
    pub fn resolve(
        &self,
        entry: &CatalogEntry,
        policy: MetadataPolicy,
        seen_at: DateTime<Utc>,
    ) -> Result<ProductId> {
        let on_conflict = match policy {
            MetadataPolicy::Refresh => {
                "category = excluded.category, subcategory = excluded.subcategory, name = excluded.name"
            }
            // No-op update so RETURNING still yields the existing row
            MetadataPolicy::Keep => "name = products.name",
        };

        let sql = format!(
            r#"
            INSERT INTO products (category, subcategory, name, link, first_seen)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(link) DO UPDATE SET {}
            RETURNING id
            "#,
            on_conflict
        );

        self.conn
            .query_row(
                &sql,
                params![
                    entry.category,
                    entry.subcategory,
                    entry.name,
                    entry.link,
                    format_timestamp(&seen_at),
                ],
                |row| row.get(0),
            )
            .map_err(classify_write_error)
    }

    /// Get a product by id.
    pub fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let mut stmt = self.conn.prepare("SELECT * FROM products WHERE id = ?")?;
        to_option(stmt.query_row(params![id], row_to_product))
    }

    /// Get a product by its link.
    pub fn product_by_link(&self, link: &str) -> Result<Option<Product>> {
        let mut stmt = self.conn.prepare("SELECT * FROM products WHERE link = ?")?;
        to_option(stmt.query_row(params![link], row_to_product))
    }

    /// All known products ordered by category path, then name.
    pub fn products(&self) -> Result<Vec<Product>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM products ORDER BY category, subcategory, name, id")?;
        let products = stmt
            .query_map([], row_to_product)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(products)
    }
}
