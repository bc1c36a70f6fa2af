//! TCP accept loop, SSL-request probing, and TLS upgrade (spec.md §4.8).
//! Generalizes the teacher's `pgwire::server` (`Listener`/`Handler`, a
//! bare accept loop that handed a `TcpStream` straight to a `FramedConn`
//! with no SSL probe, no TLS, and a `todo!()`-free `Handler::run`) with
//! the SSL-request dance, the `CancelRequest` short-circuit, and the
//! dispatch into [`crate::session_machine::run_session`] spec.md §4.8
//! and §4.5 need.

use std::future::Future;
use std::sync::Arc;

use common::error::{GatewayError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, instrument};

use crate::message::{FrontendStartupMessage, VERSION_3};
use crate::session_machine::{run_session, GatewayContext};
use crate::startup::{parse_startup_body, read_startup_frame};

/// Unifies a plain `TcpStream` and a TLS-upgraded stream behind one type
/// so [`run_session`] doesn't need to be generic over which one a given
/// connection used (spec.md §4.8: TLS upgrade happens "on the same
/// socket" before the ordinary startup path resumes). Tokio's own
/// blanket `AsyncRead`/`AsyncWrite` impls for `Box<dyn ... + Unpin>`
/// do the rest.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

fn build_tls_acceptor(tls: &common::config::TlsConfig) -> Result<TlsAcceptor> {
    let cert_bytes = std::fs::read(&tls.cert_path)
        .map_err(|e| GatewayError::internal(format!("reading TLS cert {}: {e}", tls.cert_path)))?;
    let key_bytes = std::fs::read(&tls.key_path)
        .map_err(|e| GatewayError::internal(format!("reading TLS key {}: {e}", tls.key_path)))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| GatewayError::internal(format!("parsing TLS cert chain: {e}")))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_bytes.as_slice())
        .map_err(|e| GatewayError::internal(format!("parsing TLS private key: {e}")))?
        .ok_or_else(|| GatewayError::internal("no private key found in TLS key file"))?;

    let config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::internal(format!("building TLS server config: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Runs the accept loop until `shutdown` resolves (mirrors the teacher's
/// `run(listener, shutdown)` shape, generalized to build its own TLS
/// acceptor from `ctx.config.tls` and to spawn one session task per
/// accepted connection instead of a `todo!()` handler).
pub async fn run(ctx: Arc<GatewayContext>, listener: TcpListener, shutdown: impl Future) -> Result<()> {
    let tls_acceptor = match &ctx.config.tls {
        Some(tls) => Some(build_tls_acceptor(tls)?),
        None => None,
    };

    info!(addr = ctx.config.listen_addr.as_str(), port = ctx.config.listen_port, "accepting inbound connections");

    let accept_loop = async {
        let mut conn_id: u32 = 1;
        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            let id = conn_id;
            conn_id = conn_id.wrapping_add(1);
            let ctx = ctx.clone();
            let tls_acceptor = tls_acceptor.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(ctx, id, socket, tls_acceptor).await {
                    error!(conn_id = id, peer = %addr, error = %e, "connection ended with an error");
                }
            });
        }
    };

    tokio::select! {
        _ = accept_loop => {}
        _ = shutdown => {
            info!("shutting down accept loop");
        }
    }

    Ok(())
}

#[instrument(skip(ctx, socket, tls_acceptor), fields(conn_id))]
async fn handle_connection(
    ctx: Arc<GatewayContext>,
    conn_id: u32,
    mut socket: TcpStream,
    tls_acceptor: Option<TlsAcceptor>,
) -> Result<()> {
    // The SSL probe and any GSSENC probe precede the real StartupMessage
    // (spec.md §4.8); loop until we see either a `Startup` (proceed) or a
    // `CancelRequest` (service it and close, no session ever starts).
    loop {
        let frame = read_startup_frame(&mut socket).await?;
        match parse_startup_body(frame)? {
            FrontendStartupMessage::SslRequest => {
                if let Some(acceptor) = &tls_acceptor {
                    socket.write_all(b"S").await?;
                    let tls_stream = acceptor.accept(socket).await.map_err(GatewayError::from)?;
                    return negotiate_and_run(ctx, conn_id, Box::new(tls_stream)).await;
                } else {
                    socket.write_all(b"N").await?;
                }
            }
            FrontendStartupMessage::GssEncRequest => {
                socket.write_all(b"N").await?;
            }
            FrontendStartupMessage::CancelRequest { conn_id: target, secret_key } => {
                ctx.cancel_registry.cancel(target, secret_key);
                return Ok(());
            }
            FrontendStartupMessage::Startup { version, params } => {
                if version != VERSION_3 {
                    return Err(GatewayError::protocol_violation(format!("unsupported protocol version {version:#x}")));
                }
                return run_session(ctx, conn_id, socket, params).await;
            }
        }
    }
}

/// After a TLS upgrade, the real `StartupMessage` still has to be read
/// off the now-encrypted stream (spec.md §4.8) before a session begins.
async fn negotiate_and_run(
    ctx: Arc<GatewayContext>,
    conn_id: u32,
    mut stream: Box<dyn AsyncStream>,
) -> Result<()> {
    loop {
        let frame = read_startup_frame(&mut stream).await?;
        match parse_startup_body(frame)? {
            FrontendStartupMessage::GssEncRequest => {
                stream.write_all(b"N").await?;
            }
            FrontendStartupMessage::SslRequest => {
                return Err(GatewayError::protocol_violation("SSLRequest repeated after TLS upgrade"));
            }
            FrontendStartupMessage::CancelRequest { conn_id: target, secret_key } => {
                ctx.cancel_registry.cancel(target, secret_key);
                return Ok(());
            }
            FrontendStartupMessage::Startup { version, params } => {
                if version != VERSION_3 {
                    return Err(GatewayError::protocol_violation(format!("unsupported protocol version {version:#x}")));
                }
                return run_session(ctx, conn_id, stream, params).await;
            }
        }
    }
}

