//! Frontend and backend message types for PGWire protocol 3.0 (spec.md
//! §4.1), generalizing the teacher's `pgwire::message` (which only knows
//! `Query`/`AuthenticationOk`/`ReadyForQuery`) to the full set the extended
//! query protocol, SASL authentication, and COPY need.

use std::collections::HashMap;

use pgrepr::{Format, Type, Value};

/// Protocol/pseudo-version codes, unchanged from the teacher's
/// `pgwire::message`.
pub const VERSION_1: i32 = 0x10000;
pub const VERSION_2: i32 = 0x20000;
pub const VERSION_3: i32 = 0x30000;
pub const VERSION_CANCEL: i32 = (1234 << 16) + 5678;
pub const VERSION_SSL: i32 = (1234 << 16) + 5679;
pub const VERSION_GSSENC: i32 = (1234 << 16) + 5680;

/// The three ways a connection can open, decoded before the regular
/// tagged-message framing applies (spec.md §4.8).
#[derive(Debug, Clone)]
pub enum FrontendStartupMessage {
    Startup { version: i32, params: HashMap<String, String> },
    SslRequest,
    GssEncRequest,
    CancelRequest { conn_id: u32, secret_key: u32 },
}

/// One bound parameter as received in a `Bind` message: raw wire bytes (or
/// absent for NULL) plus the format code that applies to it.
#[derive(Debug, Clone)]
pub struct RawParam {
    pub format: Format,
    pub bytes: Option<Vec<u8>>,
}

/// A decoded frontend message (spec.md §4.1, §4.5, §4.6).
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    Query { sql: String },
    Parse { statement: String, sql: String, param_oids: Vec<Option<Type>> },
    Bind {
        portal: String,
        statement: String,
        params: Vec<RawParam>,
        result_formats: Vec<Format>,
    },
    Describe { kind: DescribeKind, name: String },
    Execute { portal: String, max_rows: i32 },
    Close { kind: DescribeKind, name: String },
    Flush,
    Sync,
    CopyData { data: Vec<u8> },
    CopyDone,
    CopyFail { message: String },
    PasswordMessage { bytes: Vec<u8> },
    SaslInitialResponse { mechanism: String, data: Vec<u8> },
    SaslResponse { bytes: Vec<u8> },
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeKind {
    Statement,
    Portal,
}

/// A decoded backend message (spec.md §4.1, §4.5, §4.6).
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationSasl { mechanisms: Vec<String> },
    AuthenticationSaslContinue { data: Vec<u8> },
    AuthenticationSaslFinal { data: Vec<u8> },
    ParameterStatus { name: String, value: String },
    BackendKeyData { conn_id: u32, secret_key: u32 },
    ReadyForQuery { status: TransactionStatus },
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Vec<u8>>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    ParameterDescription { param_oids: Vec<u32> },
    PortalSuspended,
    CopyInResponse { format: i8, column_formats: Vec<i16> },
    CopyOutResponse { format: i8, column_formats: Vec<i16> },
    CopyData { data: Vec<u8> },
    CopyDone,
    ErrorResponse(ErrorFields),
    NoticeResponse(ErrorFields),
}

/// One `RowDescription` column (spec.md §3's "Column descriptor").
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub attr_number: i16,
    pub type_oid: u32,
    pub type_len: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// The fields of an `ErrorResponse`/`NoticeResponse` (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<u32>,
    pub line: Option<u32>,
    pub routine: Option<String>,
}

impl From<&common::error::GatewayError> for ErrorFields {
    fn from(e: &common::error::GatewayError) -> Self {
        ErrorFields {
            severity: "ERROR".to_string(),
            sqlstate: e.sqlstate().code().to_string(),
            message: e.message.clone(),
            detail: e.detail.clone(),
            hint: e.hint.clone(),
            position: e.position,
            line: e.line,
            routine: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl From<executor::TransactionStatus> for TransactionStatus {
    fn from(s: executor::TransactionStatus) -> Self {
        match s {
            executor::TransactionStatus::Idle => TransactionStatus::Idle,
            executor::TransactionStatus::InTransaction => TransactionStatus::InTransaction,
            executor::TransactionStatus::Failed => TransactionStatus::Failed,
        }
    }
}

impl TransactionStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Builds a `RowDescription` from executor column metadata plus the
/// resolved result format for each column.
pub fn row_description(columns: &[executor::ColumnMeta], formats: &[Format]) -> BackendMessage {
    let fields = columns
        .iter()
        .zip(formats.iter())
        .map(|(col, fmt)| FieldDescription {
            name: col.name.clone(),
            table_oid: col.table_oid,
            attr_number: col.attr_number,
            type_oid: col.ty.oid(),
            type_len: col.ty.typlen(),
            type_modifier: col.type_modifier,
            format: *fmt,
        })
        .collect();
    BackendMessage::RowDescription { fields }
}

/// Encodes one row of already-typed [`Value`]s per the resolved per-column
/// format codes, for `DataRow` (spec.md §4.2).
pub fn data_row(values: &[Value], formats: &[Format]) -> common::error::Result<BackendMessage> {
    let mut out = Vec::with_capacity(values.len());
    for (value, format) in values.iter().zip(formats.iter()) {
        out.push(value.encode(*format)?);
    }
    Ok(BackendMessage::DataRow { values: out })
}
