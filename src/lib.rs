//! stocktrail - stock and price history for product catalog pages.
//!
//! Visits every product page of a catalog one at a time, extracts the stock
//! indicator and price, and appends them to a per-product time series in
//! SQLite, optionally with a JPEG snapshot of the rendered page.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod extract;
pub mod models;
pub mod repository;
pub mod scrapers;
pub mod snapshot;
