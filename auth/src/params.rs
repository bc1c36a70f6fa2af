//! `ParameterStatus` values sent right after authentication succeeds
//! (spec.md §6). Grounded in `sunng87-pgwire`'s
//! `auth::DefaultServerParameterProvider` from the pack: a fixed set of
//! sensible defaults, with `client_encoding` and `application_name`
//! following whatever the client asked for in `StartupMessage`.

use std::collections::HashMap;

fn bool_to_str(v: bool) -> &'static str {
    if v {
        "on"
    } else {
        "off"
    }
}

/// Builds the `ParameterStatus` key/value set spec.md §6 lists, in
/// insertion order so the caller can emit them deterministically.
/// `client_encoding` and `application_name` default to the client's
/// startup parameter when it asked for one.
pub fn server_parameters(
    client_encoding: Option<&str>,
    application_name: Option<&str>,
    is_superuser: bool,
) -> Vec<(&'static str, String)> {
    vec![
        ("server_version", format!("{} (iris-pgwire {})", catalog::SERVER_VERSION, env!("CARGO_PKG_VERSION"))),
        ("server_encoding", "UTF8".to_string()),
        ("client_encoding", client_encoding.unwrap_or("UTF8").to_string()),
        ("DateStyle", "ISO, MDY".to_string()),
        ("IntervalStyle", "postgres".to_string()),
        ("TimeZone", "UTC".to_string()),
        ("integer_datetimes", bool_to_str(true).to_string()),
        ("standard_conforming_strings", bool_to_str(true).to_string()),
        ("application_name", application_name.unwrap_or("").to_string()),
        ("is_superuser", bool_to_str(is_superuser).to_string()),
    ]
}

/// The same set as a lookup map, for callers that want `get` rather than
/// an ordered emission list (tests, mostly — the wire codec emits the
/// ordered `Vec` form so message order is stable).
pub fn server_parameters_map(
    client_encoding: Option<&str>,
    application_name: Option<&str>,
    is_superuser: bool,
) -> HashMap<&'static str, String> {
    server_parameters(client_encoding, application_name, is_superuser).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_provided_encoding_and_application_name_are_preserved() {
        let params = server_parameters_map(Some("LATIN1"), Some("psql"), false);
        assert_eq!(params["client_encoding"], "LATIN1");
        assert_eq!(params["application_name"], "psql");
        assert_eq!(params["is_superuser"], "off");
    }

    #[test]
    fn defaults_apply_when_client_omits_them() {
        let params = server_parameters_map(None, None, true);
        assert_eq!(params["client_encoding"], "UTF8");
        assert_eq!(params["application_name"], "");
        assert_eq!(params["is_superuser"], "on");
        assert_eq!(params["standard_conforming_strings"], "on");
    }
}
