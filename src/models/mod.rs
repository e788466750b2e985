//! Data models for stocktrail.

mod observation;
mod product;

pub use observation::{NewObservation, Observation, ObservationId, ObservationRecord, Price};
pub use product::{MetadataPolicy, Product, ProductId};
