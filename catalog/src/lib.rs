//! Static answers to the startup probes every PostgreSQL driver issues
//! before it trusts a connection: `SELECT version()`, a handful of `SHOW`
//! settings, and `pg_type` lookups for the OIDs this gateway advertises
//! (spec.md §6's "Catalog shims" paragraph).
//!
//! Nothing here touches IRIS. The session state machine in `pgwire`
//! recognizes these specific statements in the parsed AST and answers from
//! this crate instead of forwarding them to the executor, the same way a
//! real driver's startup handshake never has to touch application tables.

use pgrepr::Type;

/// The `server_version` this gateway claims, echoed in both ParameterStatus
/// and `SELECT version()`.
pub const SERVER_VERSION: &str = "16.0";

/// A column in a catalog shim's result set.
#[derive(Debug, Clone, Copy)]
pub struct ColumnInfo {
    pub name: &'static str,
    pub ty: Type,
}

/// A canned result set: fixed columns, fixed rows, all text.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// The full text `SELECT version()` returns.
pub fn version_text() -> String {
    format!("PostgreSQL {SERVER_VERSION} (iris-pgwire)")
}

/// Builds the one-row, one-column result set for `SELECT version()`.
pub fn version_row_set() -> RowSet {
    RowSet {
        columns: vec![ColumnInfo { name: "version", ty: Type::Text }],
        rows: vec![vec![Some(version_text())]],
    }
}

/// Canned values for the `SHOW` statements drivers probe at startup,
/// matching the ParameterStatus values sent at session start (spec.md §6).
fn show_value(setting: &str) -> Option<&'static str> {
    match setting.to_ascii_lowercase().as_str() {
        "standard_conforming_strings" => Some("on"),
        "datestyle" => Some("ISO, MDY"),
        "timezone" => Some("UTC"),
        "server_version" => Some(SERVER_VERSION),
        "integer_datetimes" => Some("on"),
        "intervalstyle" => Some("postgres"),
        "client_encoding" | "server_encoding" => Some("UTF8"),
        _ => None,
    }
}

/// Builds the result set for `SHOW <setting>`, or `None` if this gateway
/// doesn't recognize the setting (callers should fall back to the executor
/// in that case rather than fail the query outright).
pub fn show_row_set(setting: &str) -> Option<RowSet> {
    let value = show_value(setting)?;
    Some(RowSet {
        columns: vec![ColumnInfo { name: setting, ty: Type::Text }],
        rows: vec![vec![Some(value.to_string())]],
    })
}

struct PgTypeRow {
    oid: u32,
    typname: &'static str,
    typlen: i16,
    typtype: char,
}

/// The fixed set of `pg_type` rows this gateway advertises, one per OID in
/// the §4.2 type table.
fn pg_type_table() -> Vec<PgTypeRow> {
    [
        Type::Bool,
        Type::Int2,
        Type::Int4,
        Type::Int8,
        Type::Text,
        Type::Varchar,
        Type::Float4,
        Type::Float8,
        Type::Date,
        Type::Timestamp,
        Type::TimestampTz,
        Type::Numeric,
        Type::Vector,
    ]
    .into_iter()
    .map(|ty| PgTypeRow {
        oid: ty.oid(),
        typname: ty.name(),
        typlen: ty.typlen(),
        typtype: ty.typtype(),
    })
    .collect()
}

/// Builds the result set for
/// `SELECT oid, typname, typlen, typtype, typrelid, typarray FROM pg_type
/// WHERE typname IN (...)`, restricted to the names the query asked for.
/// Unrecognized names are silently dropped, matching how real `pg_type`
/// simply has no matching row for a name it doesn't know.
pub fn pg_type_row_set(names: &[&str]) -> RowSet {
    let columns = vec![
        ColumnInfo { name: "oid", ty: Type::Int4 },
        ColumnInfo { name: "typname", ty: Type::Text },
        ColumnInfo { name: "typlen", ty: Type::Int2 },
        ColumnInfo { name: "typtype", ty: Type::Text },
        ColumnInfo { name: "typrelid", ty: Type::Int4 },
        ColumnInfo { name: "typarray", ty: Type::Int4 },
    ];
    let rows = pg_type_table()
        .into_iter()
        .filter(|row| names.iter().any(|n| n.eq_ignore_ascii_case(row.typname)))
        .map(|row| {
            vec![
                Some(row.oid.to_string()),
                Some(row.typname.to_string()),
                Some(row.typlen.to_string()),
                Some(row.typtype.to_string()),
                Some("0".to_string()),
                Some("0".to_string()),
            ]
        })
        .collect();
    RowSet { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_row_set_has_one_row() {
        let rs = version_row_set();
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(rs.rows[0][0].as_deref(), Some("PostgreSQL 16.0 (iris-pgwire)"));
    }

    #[test]
    fn show_recognizes_advertised_settings() {
        assert_eq!(show_row_set("DateStyle").unwrap().rows[0][0].as_deref(), Some("ISO, MDY"));
        assert!(show_row_set("nonexistent_setting").is_none());
    }

    #[test]
    fn pg_type_filters_by_name() {
        let rs = pg_type_row_set(&["bool", "vector", "made_up"]);
        assert_eq!(rs.rows.len(), 2);
        let names: Vec<&str> = rs.rows.iter().map(|r| r[1].as_deref().unwrap()).collect();
        assert!(names.contains(&"bool"));
        assert!(names.contains(&"vector"));
    }

    #[test]
    fn pg_type_vector_oid_matches_advertised_oid() {
        let rs = pg_type_row_set(&["vector"]);
        assert_eq!(rs.rows[0][0].as_deref(), Some(pgrepr::VECTOR_OID.to_string()).as_deref());
    }
}
