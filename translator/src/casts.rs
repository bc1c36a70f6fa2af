//! The PostgreSQL-type → IRIS-type table used by stage 3 (explicit-cast
//! normalization) and stage 7 (parameter-OID inference), spec.md §4.4.

use pgrepr::Type;

/// Maps a PostgreSQL type name, as it would appear after `::` in client
/// SQL, to the IRIS type name to emit inside `CAST(? AS ...)` and the
/// `pgrepr::Type` used to report the parameter's OID in Parse's
/// ParameterDescription.
pub fn lookup(pg_type_name: &str) -> Option<(&'static str, Type)> {
    Some(match pg_type_name.to_ascii_lowercase().as_str() {
        "int" | "integer" | "int4" => ("INTEGER", Type::Int4),
        "smallint" | "int2" => ("SMALLINT", Type::Int2),
        "bigint" | "int8" => ("BIGINT", Type::Int8),
        "bool" | "boolean" => ("BIT", Type::Bool),
        "text" => ("VARCHAR", Type::Text),
        "varchar" | "character varying" => ("VARCHAR", Type::Varchar),
        "date" => ("DATE", Type::Date),
        "timestamp" => ("TIMESTAMP", Type::Timestamp),
        "timestamptz" | "timestamp with time zone" => ("TIMESTAMP", Type::TimestampTz),
        "real" | "float4" => ("DOUBLE", Type::Float4),
        "double precision" | "float8" | "float" => ("DOUBLE", Type::Float8),
        "numeric" | "decimal" => ("NUMERIC", Type::Numeric),
        "vector" => ("VARCHAR", Type::Vector),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_common_pg_aliases() {
        assert_eq!(lookup("integer").unwrap().0, "INTEGER");
        assert_eq!(lookup("int").unwrap().0, "INTEGER");
        assert_eq!(lookup("bool").unwrap().1, Type::Bool);
        assert!(lookup("made_up_type").is_none());
    }
}
