//! The COPY sub-protocol (spec.md §4.6): streaming CSV parse/encode plus
//! the ingest and export pipelines `pgwire`'s session machine drives.
//! Grounded in `sqlx-postgres`'s `copy.rs` for the overall shape
//! (`CopyIn`/`Copy` stream types, flush-on-done); the teacher itself
//! never implements COPY.

pub mod csv;
pub mod export;
pub mod ingest;

pub use csv::{CsvOptions, Field};
pub use export::CopyOutPipeline;
pub use ingest::CopyInPipeline;
