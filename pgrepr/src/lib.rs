//! PostgreSQL wire representations: the `Type`/OID table, text and binary
//! value codecs, format-code resolution, and the IRIS-specific conversions
//! layered on top of them (spec.md §4.2).

pub mod format;
pub mod iris;
pub mod numeric;
pub mod types;
pub mod value;

pub use format::{resolve_format_codes, Format};
pub use types::{NumericConstraints, Type, VarcharLength, VECTOR_OID};
pub use value::Value;
