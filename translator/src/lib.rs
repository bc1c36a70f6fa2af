//! The SQL translator (spec.md §4.4): eight pure stages composed into one
//! `translate` entry point, plus the LRU+TTL cache that memoizes results
//! keyed on `(original_sql, identifier_policy)`.

pub mod aliases;
pub mod cache;
pub mod casts;
pub mod identifiers;
pub mod limit;
pub mod mask;
pub mod params;
pub mod semicolon;
pub mod vector_ops;

use common::config::IdentifierCasePolicy;
use pgrepr::Type;

pub use cache::TranslationCache;

/// The result of translating one client SQL string.
#[derive(Debug, Clone)]
pub struct TranslationResult {
    /// The IRIS-dialect SQL to execute.
    pub sql: String,
    /// Parameter OIDs in `$n` order (index 0 is `$1`), as Parse should
    /// report them. A parameter never explicitly cast defaults to IRIS's
    /// own NUMERIC inference.
    pub param_oids: Vec<Type>,
    /// Output column aliases in `SELECT`-list order, where recoverable.
    pub aliases: Vec<Option<String>>,
    /// Non-fatal issues hit along the way (e.g. an unrecognized cast type
    /// left un-cast). Translation still produces a usable result.
    pub warnings: Vec<String>,
}

/// Runs all eight translation stages against `sql`. Pure and
/// deterministic: the same `(sql, policy)` pair always yields the same
/// result, which is what makes [`TranslationCache`] safe.
pub fn translate(sql: &str, policy: IdentifierCasePolicy) -> TranslationResult {
    let trimmed = semicolon::trim_trailing_semicolons(sql);

    let param_rewrite = params::rewrite_params(trimmed);
    let mut warnings = param_rewrite.warnings;

    let vectorized = vector_ops::rewrite_vector_ops(&param_rewrite.sql);
    let limited = limit::rewrite_limit(&vectorized);

    let aliases = aliases::extract_aliases(&limited);

    let max_index = param_rewrite.param_oids.keys().max().copied().unwrap_or(0);
    let param_oids: Vec<Type> = (1..=max_index)
        .map(|i| param_rewrite.param_oids.get(&i).copied().unwrap_or(Type::Numeric))
        .collect();
    if param_oids.iter().any(|t| *t == Type::Numeric) {
        warnings.push("one or more parameters were never explicitly cast; defaulting to NUMERIC".to_string());
    }

    let final_sql = identifiers::apply_case_policy(&limited, policy);

    TranslationResult { sql: final_sql, param_oids, aliases, warnings }
}

/// Translates `sql`, consulting and then populating `cache`. Separated
/// from [`translate`] so callers that don't want caching (tests, one-off
/// translations) can call the pure function directly.
pub fn translate_cached(sql: &str, policy: IdentifierCasePolicy, cache: &mut TranslationCache) -> TranslationResult {
    let now = std::time::Instant::now();
    if let Some(cached) = cache.get(sql, policy, now) {
        return cached;
    }
    let result = translate(sql, policy);
    cache.put(sql, policy, result.clone(), now);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_a_parameterized_vector_query() {
        let result = translate(
            "SELECT id, embedding <-> $1::vector AS dist FROM docs ORDER BY dist LIMIT 5;",
            IdentifierCasePolicy::Upper,
        );
        assert!(result.sql.contains("VECTOR_L2(EMBEDDING, CAST(? AS VARCHAR))") || result.sql.contains("VECTOR_L2(EMBEDDING, ?)"));
        assert!(result.sql.contains("TOP 5"));
        assert!(!result.sql.ends_with(';'));
    }

    #[test]
    fn cast_parameter_reports_correct_oid() {
        let result = translate("SELECT * FROM t WHERE id = $1::int", IdentifierCasePolicy::Preserve);
        assert_eq!(result.param_oids, vec![Type::Int4]);
    }

    #[test]
    fn repeated_translation_is_idempotent() {
        let once = translate("select a, b from t limit 3", IdentifierCasePolicy::Upper);
        let twice = translate(&once.sql, IdentifierCasePolicy::Upper);
        assert_eq!(once.sql, twice.sql);
    }
}
