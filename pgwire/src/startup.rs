//! Startup/SSL-request decoding (spec.md §4.8). Unlike every other
//! frontend message, `StartupMessage`, `SSLRequest`, `GSSENCRequest` and
//! `CancelRequest` have no leading type byte — just `{length:u32, body}` —
//! so they can't go through [`crate::codec::Codec`]. Generalizes the
//! teacher's `pgwire::codec::decode_startup`, which was a `todo!()`-free
//! stub that always returned `Ok(None)`.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BytesMut};
use common::error::{GatewayError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::message::{FrontendStartupMessage, VERSION_CANCEL, VERSION_GSSENC, VERSION_SSL};

/// Reads one length-prefixed startup-family frame off the wire: the
/// 4-byte length, then `length - 4` more bytes. Returns the raw body
/// (which begins with the 4-byte version/request code).
pub async fn read_startup_frame<A: AsyncRead + Unpin>(stream: &mut A) -> Result<BytesMut> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = BigEndian::read_u32(&len_buf) as usize;
    if !(4..=10_000).contains(&len) {
        return Err(GatewayError::malformed_message(format!("invalid startup message length {len}")));
    }
    let mut body = BytesMut::with_capacity(len);
    body.resize(len - 4, 0);
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Parses a startup-family frame's body (spec.md §4.8's SSL probe: "read
/// the first 8 bytes. If they decode as length=8, code=80877103 ...").
pub fn parse_startup_body(mut body: BytesMut) -> Result<FrontendStartupMessage> {
    if body.len() < 4 {
        return Err(GatewayError::malformed_message("startup frame too short"));
    }
    let code = body.get_i32();
    match code {
        VERSION_SSL => Ok(FrontendStartupMessage::SslRequest),
        VERSION_GSSENC => Ok(FrontendStartupMessage::GssEncRequest),
        VERSION_CANCEL => {
            if body.len() < 8 {
                return Err(GatewayError::malformed_message("truncated CancelRequest"));
            }
            let conn_id = body.get_u32();
            let secret_key = body.get_u32();
            Ok(FrontendStartupMessage::CancelRequest { conn_id, secret_key })
        }
        version => {
            let params = parse_startup_params(&mut body)?;
            Ok(FrontendStartupMessage::Startup { version, params })
        }
    }
}

fn parse_startup_params(body: &mut BytesMut) -> Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    loop {
        let key = read_cstr(body)?;
        if key.is_empty() {
            break;
        }
        let value = read_cstr(body)?;
        params.insert(key, value);
    }
    Ok(params)
}

fn read_cstr(buf: &mut BytesMut) -> Result<String> {
    let nul = buf.iter().position(|&b| b == 0).ok_or_else(|| GatewayError::malformed_message("unterminated C string in startup"))?;
    let bytes = buf.split_to(nul);
    buf.advance(1);
    String::from_utf8(bytes.to_vec()).map_err(|_| GatewayError::malformed_message("non-UTF-8 startup parameter"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn ssl_request_is_recognized() {
        let mut body = BytesMut::new();
        body.put_i32(VERSION_SSL);
        match parse_startup_body(body).unwrap() {
            FrontendStartupMessage::SslRequest => {}
            other => panic!("expected SslRequest, got {other:?}"),
        }
    }

    #[test]
    fn cancel_request_carries_pid_and_secret() {
        let mut body = BytesMut::new();
        body.put_i32(VERSION_CANCEL);
        body.put_u32(42);
        body.put_u32(0xdead_beef);
        match parse_startup_body(body).unwrap() {
            FrontendStartupMessage::CancelRequest { conn_id, secret_key } => {
                assert_eq!(conn_id, 42);
                assert_eq!(secret_key, 0xdead_beef);
            }
            other => panic!("expected CancelRequest, got {other:?}"),
        }
    }

    #[test]
    fn startup_message_parses_key_value_params() {
        let mut body = BytesMut::new();
        body.put_i32(crate::message::VERSION_3);
        body.put_slice(b"user\0alice\0database\0mydb\0\0");
        match parse_startup_body(body).unwrap() {
            FrontendStartupMessage::Startup { version, params } => {
                assert_eq!(version, crate::message::VERSION_3);
                assert_eq!(params.get("user").map(String::as_str), Some("alice"));
                assert_eq!(params.get("database").map(String::as_str), Some("mydb"));
            }
            other => panic!("expected Startup, got {other:?}"),
        }
    }
}
