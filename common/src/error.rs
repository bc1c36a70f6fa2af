//! The gateway's single error type.
//!
//! Every crate in the workspace converts its failures into a [`GatewayError`]
//! at its public boundary, the same way the teacher's `FloppyError` is the
//! one error type every `floppy` crate eventually produces. The extra piece
//! here is that a `GatewayError` carries everything `ErrorResponse` needs
//! (SQLSTATE, message, detail, hint, byte position, COPY line number) and
//! knows, from its [`ErrorKind`], whether the connection that raised it must
//! be closed — see spec.md §7's propagation table.

use postgres::error::SqlState;
use std::fmt;
use std::io;

/// Result type for operations that could result in a [`GatewayError`].
pub type Result<T> = std::result::Result<T, GatewayError>;

/// The taxonomy from spec.md §7, one variant per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedMessage,
    ProtocolViolation,
    AuthenticationFailed,
    SyntaxError,
    UndefinedColumn,
    UniqueViolation,
    ForeignKeyViolation,
    SerializationFailure,
    ParameterBindError,
    Cancelled,
    StatementTimeout,
    ConnectionLost,
    PoolExhausted,
    Internal,
    /// `Describe`/`Bind`/`Execute`/`Close` naming a statement the session
    /// has no record of. A recoverable client mistake, not a protocol
    /// violation — it does not close the connection (spec.md §4.5:
    /// extended-mode errors go to skip-until-sync, not connection close).
    UndefinedStatement,
    /// Same as [`ErrorKind::UndefinedStatement`] but for an unknown portal
    /// name.
    UndefinedPortal,
    /// A `DATE`/`TIMESTAMP` literal that doesn't name a real calendar date
    /// (spec.md §8 scenario 4: `1962-02-29`), distinct from a generally
    /// malformed parameter so COPY's line-numbered error carries the
    /// SQLSTATE real PostgreSQL uses for this.
    InvalidDatetimeFormat,
}

impl ErrorKind {
    /// The canonical SQLSTATE for this kind.
    pub fn sqlstate(self) -> SqlState {
        match self {
            ErrorKind::MalformedMessage => SqlState::PROTOCOL_VIOLATION,
            ErrorKind::ProtocolViolation => SqlState::PROTOCOL_VIOLATION,
            ErrorKind::AuthenticationFailed => SqlState::INVALID_PASSWORD,
            ErrorKind::SyntaxError => SqlState::SYNTAX_ERROR,
            ErrorKind::UndefinedColumn => SqlState::UNDEFINED_COLUMN,
            ErrorKind::UniqueViolation => SqlState::UNIQUE_VIOLATION,
            ErrorKind::ForeignKeyViolation => SqlState::FOREIGN_KEY_VIOLATION,
            ErrorKind::SerializationFailure => SqlState::T_R_SERIALIZATION_FAILURE,
            ErrorKind::ParameterBindError => SqlState::INVALID_PARAMETER_VALUE,
            ErrorKind::Cancelled => SqlState::QUERY_CANCELED,
            ErrorKind::StatementTimeout => SqlState::QUERY_CANCELED,
            ErrorKind::ConnectionLost => SqlState::CONNECTION_FAILURE,
            ErrorKind::PoolExhausted => SqlState::TOO_MANY_CONNECTIONS,
            ErrorKind::Internal => SqlState::INTERNAL_ERROR,
            ErrorKind::UndefinedStatement => SqlState::INVALID_SQL_STATEMENT_NAME,
            ErrorKind::UndefinedPortal => SqlState::INVALID_CURSOR_NAME,
            ErrorKind::InvalidDatetimeFormat => SqlState::DATETIME_FIELD_OVERFLOW,
        }
    }

    /// Whether the session that produced this error may continue accepting
    /// further messages (spec.md §7, "Connection survives?" column).
    pub fn connection_survives(self) -> bool {
        !matches!(
            self,
            ErrorKind::MalformedMessage
                | ErrorKind::ProtocolViolation
                | ErrorKind::AuthenticationFailed
        )
    }
}

/// The gateway's error type: an [`ErrorKind`] plus the human-readable and
/// positional context `ErrorResponse` surfaces to the client.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based byte offset into the original SQL text.
    pub position: Option<u32>,
    /// 1-based line number, used by COPY errors.
    pub line: Option<u32>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        GatewayError {
            kind,
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            line: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedMessage, message)
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    pub fn parameter_bind(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParameterBindError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "canceling statement due to user request")
    }

    pub fn statement_timeout() -> Self {
        Self::new(ErrorKind::StatementTimeout, "canceling statement due to statement timeout")
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionLost, message)
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PoolExhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn undefined_statement(name: &str) -> Self {
        Self::new(ErrorKind::UndefinedStatement, format!("prepared statement \"{name}\" does not exist"))
    }

    pub fn undefined_portal(name: &str) -> Self {
        Self::new(ErrorKind::UndefinedPortal, format!("portal \"{name}\" does not exist"))
    }

    pub fn invalid_datetime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidDatetimeFormat, message)
    }

    pub fn sqlstate(&self) -> SqlState {
        self.kind.sqlstate()
    }

    pub fn connection_survives(&self) -> bool {
        self.kind.connection_survives()
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.sqlstate().code())
    }
}

impl std::error::Error for GatewayError {}

impl From<io::Error> for GatewayError {
    fn from(e: io::Error) -> Self {
        GatewayError::new(ErrorKind::ProtocolViolation, format!("connection error: {e}"))
    }
}

impl From<sqlparser::parser::ParserError> for GatewayError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        GatewayError::syntax(e.to_string())
    }
}
