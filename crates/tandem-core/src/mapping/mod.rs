//! Declarative field mapping between Frappe documents and Supabase rows.

mod complex;
mod config;
mod engine;
mod transform;

pub use complex::{coerce_bool, ComplexMapping, DateInputFormat, DateOutputFormat, LookupMiss};
pub use config::{DirectionPolicy, MappingConfig};
pub use engine::MappingEngine;
pub use transform::FRAPPE_INTERNAL_FIELDS;
