//! Bridges [`auth::AuthTransport`] (a transport-agnostic challenge/response
//! abstraction) onto a real [`FramedConn`] (spec.md §4.7). No teacher code
//! exists for this — `ming535-floppy` has no authentication — so this is
//! grounded purely in the wire shapes `crate::message`/`crate::codec`
//! already define for `AuthenticationSASL{,Continue,Final}`,
//! `AuthenticationCleartextPassword`, and the `PasswordMessage`/SASL
//! response frontend messages.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use common::error::{GatewayError, Result};

use crate::codec::{decode_sasl_initial, FramedConn};
use crate::message::{BackendMessage, FrontendMessage};

/// Tracks which wire shape the *next* client response should be decoded
/// as, set by the most recent `send_challenge` call.
enum Expect {
    /// No challenge sent yet, or the last one was the empty SASL
    /// mechanism-negotiation message: the client's next message is a
    /// `SASLInitialResponse` (mechanism name + length-prefixed data,
    /// still framed as a `'p'` tag — spec.md §4.1).
    SaslInitial,
    /// A `server-first`/`server-final` SASL message was just sent: the
    /// client's next message is a plain `SASLResponse` (raw bytes, no
    /// mechanism/length wrapper).
    SaslContinuation,
    /// `AuthenticationCleartextPassword` was just sent: the client's next
    /// message is a NUL-terminated password string.
    Cleartext,
}

/// Adapts one [`FramedConn`] to [`auth::AuthTransport`] for the duration of
/// a single authentication exchange.
pub struct FramedAuthTransport<'a, A> {
    conn: &'a mut FramedConn<A>,
    expect: Expect,
}

impl<'a, A> FramedAuthTransport<'a, A>
where
    A: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: &'a mut FramedConn<A>) -> Self {
        FramedAuthTransport { conn, expect: Expect::Cleartext }
    }
}

#[async_trait]
impl<'a, A> auth::AuthTransport for FramedAuthTransport<'a, A>
where
    A: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_challenge(&mut self, mechanism: Option<&str>, data: &[u8]) -> Result<()> {
        match mechanism {
            Some(name) => {
                self.conn.send(BackendMessage::AuthenticationSasl { mechanisms: vec![name.to_string()] }).await?;
                self.expect = Expect::SaslInitial;
            }
            None if data.is_empty() => {
                self.conn.send(BackendMessage::AuthenticationCleartextPassword).await?;
                self.expect = Expect::Cleartext;
            }
            None => {
                match self.expect {
                    Expect::SaslInitial => {
                        self.conn.send(BackendMessage::AuthenticationSaslContinue { data: data.to_vec() }).await?;
                        self.expect = Expect::SaslContinuation;
                    }
                    _ => {
                        self.conn.send(BackendMessage::AuthenticationSaslFinal { data: data.to_vec() }).await?;
                    }
                }
            }
        }
        self.conn.flush().await
    }

    async fn receive_response(&mut self) -> Result<Vec<u8>> {
        let message = self
            .conn
            .recv()
            .await?
            .ok_or_else(|| GatewayError::connection_lost("connection closed during authentication"))?;
        let bytes = match message {
            FrontendMessage::PasswordMessage { bytes } => bytes,
            FrontendMessage::SaslInitialResponse { data, .. } => data,
            FrontendMessage::SaslResponse { bytes } => bytes,
            other => {
                return Err(GatewayError::protocol_violation(format!(
                    "expected an authentication response, got {other:?}"
                )))
            }
        };
        match self.expect {
            Expect::Cleartext => {
                let trimmed = if bytes.last() == Some(&0) { &bytes[..bytes.len() - 1] } else { &bytes[..] };
                Ok(trimmed.to_vec())
            }
            Expect::SaslInitial => match decode_sasl_initial(&bytes)? {
                FrontendMessage::SaslInitialResponse { data, .. } => {
                    self.expect = Expect::SaslContinuation;
                    Ok(data)
                }
                _ => unreachable!("decode_sasl_initial always returns SaslInitialResponse"),
            },
            Expect::SaslContinuation => Ok(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::AuthTransport;
    use tokio::io::duplex;

    #[tokio::test]
    async fn cleartext_password_strips_nul_terminator() {
        let (mut client, server) = duplex(4096);
        let mut server_conn = FramedConn::new(1, server, crate::codec::DEFAULT_MAX_MESSAGE_LEN);
        let mut transport = FramedAuthTransport::new(&mut server_conn);

        transport.send_challenge(None, &[]).await.unwrap();

        use bytes::{BufMut, BytesMut};
        use tokio::io::AsyncWriteExt;
        let mut raw = BytesMut::new();
        raw.put_u8(b'p');
        raw.put_u32(4 + 7);
        raw.put_slice(b"secret\0");
        client.write_all(&raw).await.unwrap();

        let response = transport.receive_response().await.unwrap();
        assert_eq!(response, b"secret");
    }
}
