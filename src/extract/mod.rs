//! Field extraction from product page documents.
//!
//! Extraction is a pure transformation from a raw HTML body to structured
//! fields. A missing anchor element or an unparseable value yields an
//! absent field, never an error, so a layout change on the shop side shows
//! up as gaps in the history rather than as failed runs.

mod numbers;

pub use numbers::{first_integer, parse_amount};

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::Price;

/// Errors raised while building an extractor from a profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Invalid {field} selector '{selector}': {message}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
        message: String,
    },
}

/// Fields extracted from one product page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub stock_amount: Option<i64>,
    pub price: Option<Price>,
}

/// Turns a raw document body into structured observation fields.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, body: &str) -> ExtractedFields;
}

/// Which fields to expect on a product page and where they live.
///
/// A `None` selector declares the field as not expected; it is then always
/// absent from the extracted result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionProfile {
    /// Descriptive text block carrying the stock indicator.
    #[serde(default = "default_stock_selector")]
    pub stock_selector: Option<String>,
    /// Element inside the stock block whose text is scanned. Falls back to
    /// the whole block when it has no such child.
    #[serde(default = "default_stock_text_selector")]
    pub stock_text_selector: Option<String>,
    /// Price display element.
    #[serde(default = "default_price_selector")]
    pub price_selector: Option<String>,
    /// "Price per piece" element carrying the pack size.
    #[serde(default = "default_per_unit_selector")]
    pub per_unit_selector: Option<String>,
}

fn default_stock_selector() -> Option<String> {
    Some("div.text.collapse".to_string())
}

fn default_stock_text_selector() -> Option<String> {
    Some("p".to_string())
}

fn default_price_selector() -> Option<String> {
    Some("div.price-block span.woocommerce-Price-amount.amount".to_string())
}

fn default_per_unit_selector() -> Option<String> {
    Some("div.price-per-piece".to_string())
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self {
            stock_selector: default_stock_selector(),
            stock_text_selector: default_stock_text_selector(),
            price_selector: default_price_selector(),
            per_unit_selector: default_per_unit_selector(),
        }
    }
}

/// Extractor for the shop's product page layout.
#[derive(Debug, Clone)]
pub struct ProductPageExtractor {
    stock: Option<Selector>,
    stock_text: Option<Selector>,
    price: Option<Selector>,
    per_unit: Option<Selector>,
}

impl ProductPageExtractor {
    /// Compile the selectors of a profile.
    pub fn new(profile: &ExtractionProfile) -> Result<Self, ProfileError> {
        Ok(Self {
            stock: compile("stock", profile.stock_selector.as_deref())?,
            stock_text: compile("stock text", profile.stock_text_selector.as_deref())?,
            price: compile("price", profile.price_selector.as_deref())?,
            per_unit: compile("per-unit", profile.per_unit_selector.as_deref())?,
        })
    }

    fn stock_amount(&self, document: &Html) -> Option<i64> {
        let block = document.select(self.stock.as_ref()?).next()?;
        let text = self
            .stock_text
            .as_ref()
            .and_then(|sel| block.select(sel).next())
            .map(element_text)
            .unwrap_or_else(|| element_text(block));
        first_integer(&text)
    }

    fn price_amount(&self, document: &Html) -> Option<rust_decimal::Decimal> {
        let element = document.select(self.price.as_ref()?).next()?;
        parse_amount(&element_text(element))
    }

    fn units(&self, document: &Html) -> Option<u32> {
        let element = document.select(self.per_unit.as_ref()?).next()?;
        first_integer(&element_text(element)).filter(|&units| units > 0)
    }
}

impl Default for ProductPageExtractor {
    fn default() -> Self {
        Self::new(&ExtractionProfile::default()).expect("built-in selectors are valid")
    }
}

impl FieldExtractor for ProductPageExtractor {
    fn extract(&self, body: &str) -> ExtractedFields {
        let document = Html::parse_document(body);

        let stock_amount = self.stock_amount(&document);
        let amount = self.price_amount(&document);
        let units = self.units(&document);

        let price = match (amount, units) {
            (Some(amount), Some(units)) => Some(Price::per_units(amount, units)),
            (Some(amount), None) => Some(Price::new(amount)),
            (None, Some(units)) => {
                debug!("Found pack size {} without a price, ignoring", units);
                None
            }
            (None, None) => None,
        };

        ExtractedFields {
            stock_amount,
            price,
        }
    }
}

fn compile(field: &'static str, selector: Option<&str>) -> Result<Option<Selector>, ProfileError> {
    selector
        .map(|s| {
            Selector::parse(s).map_err(|e| ProfileError::InvalidSelector {
                field,
                selector: s.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// Whitespace-trimmed text of an element, text nodes joined by single spaces.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
