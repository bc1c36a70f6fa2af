//! Wire framing and message encode/decode (spec.md §4.1), built from the
//! teacher's `pgwire::codec` (`FramedConn`, a `tokio_util::codec::Framed`
//! wrapped in a `futures::sink::Buffer`) with its `Codec` `Encoder`/
//! `Decoder` bodies — left as `todo!()` in the teacher — filled in here for
//! the full frontend/backend message sets spec.md §4.1/§4.5/§4.6 need, plus
//! the configurable length cap the teacher's `parse_frame_len` never had
//! (it only rejected lengths `< 4`).

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use common::error::{GatewayError, Result};
use futures::{sink, SinkExt, TryStreamExt};
use pgrepr::Format;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::message::{BackendMessage, DescribeKind, ErrorFields, FrontendMessage, RawParam};

/// Default cap on a single message's declared length (spec.md §4.1): "a
/// configured cap (default 1 GiB to bound memory, lower recommended)".
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1 << 30;

/// A connection wrapped with PGWire message framing (spec.md §4.1),
/// generalizing the teacher's `FramedConn<A>`.
pub struct FramedConn<A> {
    conn_id: u32,
    inner: sink::Buffer<Framed<A, Codec>, BackendMessage>,
}

impl<A> FramedConn<A>
where
    A: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn_id: u32, inner: A, max_message_len: usize) -> FramedConn<A> {
        FramedConn {
            conn_id,
            inner: Framed::new(inner, Codec::new(max_message_len)).buffer(32),
        }
    }

    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    /// Reads and decodes one frontend message. `None` on a clean EOF
    /// (equivalent to the client closing the socket without `Terminate`).
    pub async fn recv(&mut self) -> Result<Option<FrontendMessage>> {
        self.inner.try_next().await
    }

    /// Queues one backend message without flushing — see
    /// [`FramedConn::flush`].
    pub async fn send<M>(&mut self, message: M) -> Result<()>
    where
        M: Into<BackendMessage>,
    {
        self.inner.send(message.into()).await
    }

    pub async fn send_all(&mut self, messages: impl IntoIterator<Item = BackendMessage>) -> Result<()> {
        for m in messages {
            self.send(m).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await
    }

    /// Gives back direct access to the underlying stream, used for the
    /// raw pre-framing SSL-probe/startup read (spec.md §4.8) and for the
    /// TLS handshake, both of which happen before this codec's tagged
    /// framing applies.
    pub fn into_inner(self) -> A {
        self.inner.into_inner().into_inner()
    }
}

struct Codec {
    max_message_len: usize,
}

impl Codec {
    fn new(max_message_len: usize) -> Codec {
        Codec { max_message_len }
    }
}

impl Encoder<BackendMessage> for Codec {
    type Error = GatewayError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        encode_backend(item, dst);
        Ok(())
    }
}

impl Decoder for Codec {
    type Item = FrontendMessage;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < 5 {
            return Ok(None);
        }
        let tag = src[0];
        let len = BigEndian::read_u32(&src[1..5]) as usize;
        if len < 4 {
            return Err(GatewayError::malformed_message(format!("invalid message length {len}")));
        }
        if len > self.max_message_len {
            return Err(GatewayError::malformed_message(format!(
                "message length {len} exceeds cap {}",
                self.max_message_len
            )));
        }
        let total = 1 + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(total);
        frame.advance(5);
        decode_frontend(tag, frame).map(Some)
    }
}

fn decode_frontend(tag: u8, body: BytesMut) -> Result<FrontendMessage> {
    let mut cursor = Cursor::new(body);
    Ok(match tag {
        b'Q' => FrontendMessage::Query { sql: cursor.read_cstr()? },
        b'P' => {
            let statement = cursor.read_cstr()?;
            let sql = cursor.read_cstr()?;
            let nparams = cursor.read_i16()?;
            let mut param_oids = Vec::with_capacity(nparams.max(0) as usize);
            for _ in 0..nparams {
                let oid = cursor.read_u32()?;
                param_oids.push(if oid == 0 { None } else { pgrepr::Type::from_oid(oid) });
            }
            FrontendMessage::Parse { statement, sql, param_oids }
        }
        b'B' => {
            let portal = cursor.read_cstr()?;
            let statement = cursor.read_cstr()?;
            let n_formats = cursor.read_i16()?;
            let mut param_formats = Vec::with_capacity(n_formats.max(0) as usize);
            for _ in 0..n_formats {
                param_formats.push(Format::from_code(cursor.read_i16()?)?);
            }
            let n_params = cursor.read_i16()?;
            let mut params = Vec::with_capacity(n_params.max(0) as usize);
            for i in 0..n_params {
                let format = *param_formats
                    .get(if param_formats.len() == 1 { 0 } else { i as usize })
                    .unwrap_or(&Format::Text);
                let len = cursor.read_i32()?;
                let bytes = if len < 0 { None } else { Some(cursor.read_bytes(len as usize)?) };
                params.push(RawParam { format, bytes });
            }
            let n_result_formats = cursor.read_i16()?;
            let mut raw_result_formats = Vec::with_capacity(n_result_formats.max(0) as usize);
            for _ in 0..n_result_formats {
                raw_result_formats.push(Format::from_code(cursor.read_i16()?)?);
            }
            FrontendMessage::Bind { portal, statement, params, result_formats: raw_result_formats }
        }
        b'D' => {
            let kind = match cursor.read_u8()? {
                b'S' => DescribeKind::Statement,
                b'P' => DescribeKind::Portal,
                other => return Err(GatewayError::malformed_message(format!("unknown Describe kind {other}"))),
            };
            let name = cursor.read_cstr()?;
            FrontendMessage::Describe { kind, name }
        }
        b'E' => {
            let portal = cursor.read_cstr()?;
            let max_rows = cursor.read_i32()?;
            FrontendMessage::Execute { portal, max_rows }
        }
        b'C' => {
            let kind = match cursor.read_u8()? {
                b'S' => DescribeKind::Statement,
                b'P' => DescribeKind::Portal,
                other => return Err(GatewayError::malformed_message(format!("unknown Close kind {other}"))),
            };
            let name = cursor.read_cstr()?;
            FrontendMessage::Close { kind, name }
        }
        b'H' => FrontendMessage::Flush,
        b'S' => FrontendMessage::Sync,
        b'd' => FrontendMessage::CopyData { data: cursor.read_remaining() },
        b'c' => FrontendMessage::CopyDone,
        b'f' => FrontendMessage::CopyFail { message: cursor.read_cstr()? },
        b'p' => FrontendMessage::PasswordMessage { bytes: cursor.read_remaining() },
        b'X' => FrontendMessage::Terminate,
        other => {
            return Err(GatewayError::protocol_violation(format!(
                "unsupported frontend message type '{}' (0x{other:02x})",
                other as char
            )))
        }
    })
}

/// Decodes a `'p'` message body as a SASL initial response rather than a
/// plain password, used only on the first authentication round trip where
/// the session machine knows SASL was offered (spec.md §4.7): PostgreSQL
/// overloads the `PasswordMessage` tag for both.
pub fn decode_sasl_initial(bytes: &[u8]) -> Result<FrontendMessage> {
    let mut cursor = Cursor::new(BytesMut::from(bytes));
    let mechanism = cursor.read_cstr()?;
    let len = cursor.read_i32()?;
    let data = if len < 0 { Vec::new() } else { cursor.read_bytes(len as usize)? };
    Ok(FrontendMessage::SaslInitialResponse { mechanism, data })
}

fn encode_backend(message: BackendMessage, dst: &mut BytesMut) {
    match message {
        BackendMessage::AuthenticationOk => write_tagged(dst, b'R', |buf| buf.put_i32(0)),
        BackendMessage::AuthenticationCleartextPassword => write_tagged(dst, b'R', |buf| buf.put_i32(3)),
        BackendMessage::AuthenticationSasl { mechanisms } => write_tagged(dst, b'R', |buf| {
            buf.put_i32(10);
            for m in mechanisms {
                buf.put_cstr(&m);
            }
            buf.put_u8(0);
        }),
        BackendMessage::AuthenticationSaslContinue { data } => write_tagged(dst, b'R', |buf| {
            buf.put_i32(11);
            buf.put_slice(&data);
        }),
        BackendMessage::AuthenticationSaslFinal { data } => write_tagged(dst, b'R', |buf| {
            buf.put_i32(12);
            buf.put_slice(&data);
        }),
        BackendMessage::ParameterStatus { name, value } => write_tagged(dst, b'S', |buf| {
            buf.put_cstr(&name);
            buf.put_cstr(&value);
        }),
        BackendMessage::BackendKeyData { conn_id, secret_key } => write_tagged(dst, b'K', |buf| {
            buf.put_u32(conn_id);
            buf.put_u32(secret_key);
        }),
        BackendMessage::ReadyForQuery { status } => write_tagged(dst, b'Z', |buf| buf.put_u8(status.as_byte())),
        BackendMessage::RowDescription { fields } => write_tagged(dst, b'T', |buf| {
            buf.put_i16(fields.len() as i16);
            for f in fields {
                buf.put_cstr(&f.name);
                buf.put_u32(f.table_oid);
                buf.put_i16(f.attr_number);
                buf.put_u32(f.type_oid);
                buf.put_i16(f.type_len);
                buf.put_i32(f.type_modifier);
                buf.put_i16(f.format.code());
            }
        }),
        BackendMessage::DataRow { values } => write_tagged(dst, b'D', |buf| {
            buf.put_i16(values.len() as i16);
            for v in values {
                match v {
                    None => buf.put_i32(-1),
                    Some(bytes) => {
                        buf.put_i32(bytes.len() as i32);
                        buf.put_slice(&bytes);
                    }
                }
            }
        }),
        BackendMessage::CommandComplete { tag } => write_tagged(dst, b'C', |buf| buf.put_cstr(&tag)),
        BackendMessage::EmptyQueryResponse => write_tagged(dst, b'I', |_| {}),
        BackendMessage::ParseComplete => write_tagged(dst, b'1', |_| {}),
        BackendMessage::BindComplete => write_tagged(dst, b'2', |_| {}),
        BackendMessage::CloseComplete => write_tagged(dst, b'3', |_| {}),
        BackendMessage::NoData => write_tagged(dst, b'n', |_| {}),
        BackendMessage::ParameterDescription { param_oids } => write_tagged(dst, b't', |buf| {
            buf.put_i16(param_oids.len() as i16);
            for oid in param_oids {
                buf.put_u32(oid);
            }
        }),
        BackendMessage::PortalSuspended => write_tagged(dst, b's', |_| {}),
        BackendMessage::CopyInResponse { format, column_formats } => write_tagged(dst, b'G', |buf| {
            buf.put_i8(format);
            buf.put_i16(column_formats.len() as i16);
            for f in column_formats {
                buf.put_i16(f);
            }
        }),
        BackendMessage::CopyOutResponse { format, column_formats } => write_tagged(dst, b'H', |buf| {
            buf.put_i8(format);
            buf.put_i16(column_formats.len() as i16);
            for f in column_formats {
                buf.put_i16(f);
            }
        }),
        BackendMessage::CopyData { data } => write_tagged(dst, b'd', |buf| buf.put_slice(&data)),
        BackendMessage::CopyDone => write_tagged(dst, b'c', |_| {}),
        BackendMessage::ErrorResponse(fields) => write_tagged(dst, b'E', |buf| write_error_fields(buf, &fields)),
        BackendMessage::NoticeResponse(fields) => write_tagged(dst, b'N', |buf| write_error_fields(buf, &fields)),
    }
}

fn write_error_fields(buf: &mut BytesMut, fields: &ErrorFields) {
    buf.put_u8(b'S');
    buf.put_cstr(&fields.severity);
    buf.put_u8(b'C');
    buf.put_cstr(&fields.sqlstate);
    buf.put_u8(b'M');
    buf.put_cstr(&fields.message);
    if let Some(d) = &fields.detail {
        buf.put_u8(b'D');
        buf.put_cstr(d);
    }
    if let Some(h) = &fields.hint {
        buf.put_u8(b'H');
        buf.put_cstr(h);
    }
    if let Some(p) = fields.position {
        buf.put_u8(b'P');
        buf.put_cstr(&p.to_string());
    }
    if let Some(l) = fields.line {
        buf.put_u8(b'L');
        buf.put_cstr(&l.to_string());
    }
    if let Some(r) = &fields.routine {
        buf.put_u8(b'R');
        buf.put_cstr(r);
    }
    buf.put_u8(0);
}

/// Writes one length-prefixed tagged message, backpatching the `u32`
/// length once the body closure has run (mirrors the teacher's intended
/// `Pgbuf` extension-trait shape, inlined here since only this module
/// needs it).
fn write_tagged(dst: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    dst.put_u8(tag);
    let len_pos = dst.len();
    dst.put_u32(0);
    let body_start = dst.len();
    body(dst);
    let body_len = (dst.len() - body_start + 4) as u32;
    BigEndian::write_u32(&mut dst[len_pos..len_pos + 4], body_len);
}

trait PutCstr {
    fn put_cstr(&mut self, s: &str);
}

impl PutCstr for BytesMut {
    fn put_cstr(&mut self, s: &str) {
        self.put_slice(s.as_bytes());
        self.put_u8(0);
    }
}

/// A forward-only byte cursor over one message body, following the
/// teacher's intended `Cursor` byte-reader shape (never implemented there).
struct Cursor {
    buf: BytesMut,
}

impl Cursor {
    fn new(buf: BytesMut) -> Self {
        Cursor { buf }
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.buf.is_empty() {
            return Err(GatewayError::malformed_message("unexpected end of message"));
        }
        Ok(self.buf.get_u8())
    }

    fn read_i16(&mut self) -> Result<i16> {
        if self.buf.len() < 2 {
            return Err(GatewayError::malformed_message("unexpected end of message"));
        }
        Ok(self.buf.get_i16())
    }

    fn read_i32(&mut self) -> Result<i32> {
        if self.buf.len() < 4 {
            return Err(GatewayError::malformed_message("unexpected end of message"));
        }
        Ok(self.buf.get_i32())
    }

    fn read_u32(&mut self) -> Result<u32> {
        if self.buf.len() < 4 {
            return Err(GatewayError::malformed_message("unexpected end of message"));
        }
        Ok(self.buf.get_u32())
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.buf.len() < n {
            return Err(GatewayError::malformed_message("unexpected end of message"));
        }
        Ok(self.buf.split_to(n).to_vec())
    }

    fn read_remaining(&mut self) -> Vec<u8> {
        self.buf.split_to(self.buf.len()).to_vec()
    }

    fn read_cstr(&mut self) -> Result<String> {
        let nul = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| GatewayError::malformed_message("unterminated C string"))?;
        let bytes = self.buf.split_to(nul);
        self.buf.advance(1);
        String::from_utf8(bytes.to_vec()).map_err(|_| GatewayError::malformed_message("non-UTF-8 string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn backend_message_is_readable_by_a_peer_framed_conn() {
        let (client, server) = duplex(4096);
        let mut server_conn = FramedConn::new(1, server, DEFAULT_MAX_MESSAGE_LEN);
        let mut raw_client = client;

        server_conn.send(BackendMessage::ReadyForQuery { status: crate::message::TransactionStatus::Idle }).await.unwrap();
        server_conn.flush().await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 6];
        raw_client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], b'Z');
        assert_eq!(buf[5], b'I');
    }

    #[test]
    fn query_message_decodes_from_raw_bytes() {
        let mut raw = BytesMut::new();
        write_tagged(&mut raw, b'Q', |buf| buf.put_cstr("SELECT 1"));
        let mut codec = Codec::new(DEFAULT_MAX_MESSAGE_LEN);
        let decoded = codec.decode(&mut raw).unwrap().unwrap();
        match decoded {
            FrontendMessage::Query { sql } => assert_eq!(sql, "SELECT 1"),
            _ => panic!("expected Query"),
        }
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = Codec::new(16);
        let mut raw = BytesMut::new();
        raw.put_u8(b'Q');
        raw.put_u32(1000);
        assert!(codec.decode(&mut raw).is_err());
    }

    #[test]
    fn partial_message_yields_none_without_erroring() {
        let mut codec = Codec::new(DEFAULT_MAX_MESSAGE_LEN);
        let mut raw = BytesMut::new();
        raw.put_u8(b'Q');
        raw.put_u32(9);
        raw.put_slice(b"SE");
        assert!(codec.decode(&mut raw).unwrap().is_none());
    }

    #[test]
    fn bind_message_decodes_mixed_formats() {
        let mut raw = BytesMut::new();
        write_tagged(&mut raw, b'B', |buf| {
            buf.put_cstr("");
            buf.put_cstr("s1");
            buf.put_i16(1);
            buf.put_i16(1); // binary
            buf.put_i16(1);
            buf.put_i32(4);
            buf.put_slice(&42i32.to_be_bytes());
            buf.put_i16(0);
        });
        let mut codec = Codec::new(DEFAULT_MAX_MESSAGE_LEN);
        let decoded = codec.decode(&mut raw).unwrap().unwrap();
        match decoded {
            FrontendMessage::Bind { params, .. } => {
                assert_eq!(params.len(), 1);
                assert_eq!(params[0].format, Format::Binary);
                assert_eq!(params[0].bytes, Some(42i32.to_be_bytes().to_vec()));
            }
            _ => panic!("expected Bind"),
        }
    }
}
