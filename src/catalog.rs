//! Product catalog input.
//!
//! The catalog is produced by the link-harvesting step and nests products
//! by category and subcategory:
//!
//! ```json
//! {
//!   "Boxes": {
//!     "Postal boxes": {
//!       "url": "https://shop.example/c/postal-boxes",
//!       "products": [{ "Name": "Box A", "link": "https://shop.example/p/box-a" }]
//!     }
//!   }
//! }
//! ```
//!
//! It is validated once at load time so malformed entries never reach the
//! crawl pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while loading a catalog. These are configuration errors:
/// the catalog is rejected as a whole.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed catalog at {path}: {message}")]
    Malformed { path: String, message: String },
}

impl CatalogError {
    fn malformed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// One product to visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub category: String,
    pub subcategory: String,
    pub name: String,
    pub link: String,
}

/// Products of one subcategory, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subcategory {
    pub name: String,
    /// Listing page the products were harvested from.
    pub source_url: Option<String>,
    pub products: Vec<CatalogProduct>,
}

/// A product as listed in the catalog file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogProduct {
    pub name: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub subcategories: Vec<Subcategory>,
}

/// Validated catalog, preserving file order at every level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub categories: Vec<Category>,
}

impl Catalog {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate catalog JSON.
    pub fn parse(json: &str) -> Result<Self, CatalogError> {
        let value: Value = serde_json::from_str(json)?;
        let root = as_object(&value, "$")?;

        let mut categories = Vec::with_capacity(root.len());
        for (category, subcategories) in root {
            let path = format!("$[{:?}]", category);
            let subcategories = as_object(subcategories, &path)?
                .iter()
                .map(|(name, value)| parse_subcategory(name, value, &format!("{}[{:?}]", path, name)))
                .collect::<Result<Vec<_>, _>>()?;
            categories.push(Category {
                name: category.clone(),
                subcategories,
            });
        }

        Ok(Self { categories })
    }

    /// Build a catalog from flat entries, grouping by category and subcategory
    /// in first-seen order.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            let existing = catalog
                .categories
                .iter()
                .position(|c| c.name == entry.category);
            let cat_idx = match existing {
                Some(idx) => idx,
                None => {
                    catalog.categories.push(Category {
                        name: entry.category.clone(),
                        subcategories: Vec::new(),
                    });
                    catalog.categories.len() - 1
                }
            };
            let category = &mut catalog.categories[cat_idx];

            let existing = category
                .subcategories
                .iter()
                .position(|s| s.name == entry.subcategory);
            let sub_idx = match existing {
                Some(idx) => idx,
                None => {
                    category.subcategories.push(Subcategory {
                        name: entry.subcategory.clone(),
                        source_url: None,
                        products: Vec::new(),
                    });
                    category.subcategories.len() - 1
                }
            };
            let subcategory = &mut category.subcategories[sub_idx];
            subcategory.products.push(CatalogProduct {
                name: entry.name,
                link: entry.link,
            });
        }
        catalog
    }

    /// Flatten into crawl order: categories, then subcategories, then products.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.categories
            .iter()
            .flat_map(|category| {
                category.subcategories.iter().flat_map(move |sub| {
                    sub.products.iter().map(move |product| CatalogEntry {
                        category: category.name.clone(),
                        subcategory: sub.name.clone(),
                        name: product.name.clone(),
                        link: product.link.clone(),
                    })
                })
            })
            .collect()
    }

    /// Number of products in the catalog.
    pub fn len(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.subcategories)
            .map(|s| s.products.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_subcategory(name: &str, value: &Value, path: &str) -> Result<Subcategory, CatalogError> {
    let obj = as_object(value, path)?;

    let source_url = match obj.get("url") {
        None | Some(Value::Null) => None,
        Some(Value::String(url)) => Some(url.clone()),
        Some(_) => return Err(CatalogError::malformed(format!("{}.url", path), "expected a string")),
    };

    let products = obj
        .get("products")
        .ok_or_else(|| CatalogError::malformed(path, "missing \"products\" list"))?
        .as_array()
        .ok_or_else(|| CatalogError::malformed(format!("{}.products", path), "expected a list"))?
        .iter()
        .enumerate()
        .map(|(idx, product)| parse_product(product, &format!("{}.products[{}]", path, idx)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Subcategory {
        name: name.to_string(),
        source_url,
        products,
    })
}

fn parse_product(value: &Value, path: &str) -> Result<CatalogProduct, CatalogError> {
    let obj = as_object(value, path)?;
    let name = required_string(obj, &["Name", "name"], path)?;
    let link = required_string(obj, &["link", "Link"], path)?;

    if url::Url::parse(&link).is_err() {
        return Err(CatalogError::malformed(
            format!("{}.link", path),
            format!("not an absolute URL: {}", link),
        ));
    }

    Ok(CatalogProduct { name, link })
}

fn required_string(obj: &Map<String, Value>, keys: &[&str], path: &str) -> Result<String, CatalogError> {
    let value = keys
        .iter()
        .find_map(|k| obj.get(*k).map(|v| (*k, v)));

    match value {
        Some((_, Value::String(s))) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some((key, _)) => Err(CatalogError::malformed(
            format!("{}.{}", path, key),
            "expected a non-empty string",
        )),
        None => Err(CatalogError::malformed(
            path,
            format!("missing \"{}\"", keys[0]),
        )),
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, CatalogError> {
    value
        .as_object()
        .ok_or_else(|| CatalogError::malformed(path, "expected an object"))
}
