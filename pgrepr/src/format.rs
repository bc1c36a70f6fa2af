use common::error::GatewayError;

/// The encoding format for a [`crate::Value`].
///
/// See the ["Formats and Format Codes"][pgdocs] section of the PostgreSQL
/// protocol documentation for details on the available formats.
///
/// [pgdocs]: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub fn from_code(code: i16) -> common::error::Result<Format> {
        match code {
            0 => Ok(Format::Text),
            1 => Ok(Format::Binary),
            n => Err(GatewayError::protocol_violation(format!("unknown format code: {n}"))),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }
}

/// Resolves the format codes sent in a Bind or Describe message against the
/// number of columns/parameters they apply to.
///
/// Per the wire protocol: an empty array means "all text", a one-element
/// array means "apply this one format to every column", and any other
/// length must match `count` exactly.
pub fn resolve_format_codes(codes: &[Format], count: usize) -> common::error::Result<Vec<Format>> {
    match codes.len() {
        0 => Ok(vec![Format::Text; count]),
        1 => Ok(vec![codes[0]; count]),
        n if n == count => Ok(codes.to_vec()),
        n => Err(GatewayError::protocol_violation(format!(
            "expected {count} format codes, got {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_format_applies_to_all() {
        let resolved = resolve_format_codes(&[Format::Binary], 3).unwrap();
        assert_eq!(resolved, vec![Format::Binary; 3]);
    }

    #[test]
    fn empty_defaults_to_text() {
        let resolved = resolve_format_codes(&[], 2).unwrap();
        assert_eq!(resolved, vec![Format::Text; 2]);
    }

    #[test]
    fn mismatched_length_errors() {
        assert!(resolve_format_codes(&[Format::Text, Format::Binary], 3).is_err());
    }
}
