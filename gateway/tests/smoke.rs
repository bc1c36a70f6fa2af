//! An end-to-end smoke test: bind a real `TcpListener`, run
//! `pgwire::server::run` against it with a trust-auth `GatewayContext` and
//! an `executor::fake::FakeExecutor`-backed factory, connect a plain
//! `TcpStream`, and walk it through `StartupMessage` → auth →
//! `CREATE TABLE`/`INSERT`/`SELECT` → `Terminate`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use common::config::Config;
use common::error::Result;
use executor::fake::FakeExecutor;
use executor::BackendExecutor;
use pgwire::cancel::CancelRegistry;
use pgwire::protocol::TranslatorShared;
use pgwire::session_machine::GatewayContext;
use pgwire::ExecutorFactory;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use translator::TranslationCache;

struct FakeExecutorFactory;

#[async_trait]
impl ExecutorFactory for FakeExecutorFactory {
    async fn new_executor(&self) -> Result<Box<dyn BackendExecutor>> {
        Ok(Box::new(FakeExecutor::new()))
    }
}

fn write_startup(buf: &mut BytesMut, params: &[(&str, &str)]) {
    let mut body = BytesMut::new();
    body.put_i32(pgwire::message::VERSION_3);
    for (k, v) in params {
        body.put_slice(k.as_bytes());
        body.put_u8(0);
        body.put_slice(v.as_bytes());
        body.put_u8(0);
    }
    body.put_u8(0);
    buf.put_u32((body.len() + 4) as u32);
    buf.put_slice(&body);
}

fn write_tagged(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_u32(0);
    let start = buf.len();
    body(buf);
    let len = (buf.len() - start + 4) as u32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    let tag = header[0];
    let len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    (tag, body)
}

#[tokio::test]
async fn gateway_serves_a_full_session_over_a_real_socket() {
    let config = Arc::new(Config::default());
    let translation_cache = TranslationCache::new(config.translation_cache_size, config.translation_cache_ttl);
    let translator = TranslatorShared::new(config.identifier_case_policy, translation_cache);
    let ctx = Arc::new(GatewayContext {
        config,
        cancel_registry: CancelRegistry::new(),
        translator,
        auth_chain: vec![Box::new(auth::TrustProvider)],
        executor_factory: Arc::new(FakeExecutorFactory),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        pgwire::server::run(ctx, listener, async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut startup = BytesMut::new();
    write_startup(&mut startup, &[("user", "tester"), ("database", "iris")]);
    client.write_all(&startup).await.unwrap();

    let (tag, _) = read_message(&mut client).await;
    assert_eq!(tag, b'R', "expected AuthenticationOk");

    loop {
        let (tag, _) = read_message(&mut client).await;
        if tag == b'Z' {
            break;
        }
    }

    let mut buf = BytesMut::new();
    write_tagged(&mut buf, b'Q', |b| put_cstr(b, "CREATE TABLE t1 (id INT, name TEXT)"));
    client.write_all(&buf).await.unwrap();
    assert_eq!(read_message(&mut client).await.0, b'C');
    assert_eq!(read_message(&mut client).await.0, b'Z');

    let mut buf = BytesMut::new();
    write_tagged(&mut buf, b'Q', |b| put_cstr(b, "INSERT INTO t1 VALUES (1, 'hello')"));
    client.write_all(&buf).await.unwrap();
    assert_eq!(read_message(&mut client).await.0, b'C');
    assert_eq!(read_message(&mut client).await.0, b'Z');

    let mut buf = BytesMut::new();
    write_tagged(&mut buf, b'Q', |b| put_cstr(b, "SELECT id, name FROM t1"));
    client.write_all(&buf).await.unwrap();
    assert_eq!(read_message(&mut client).await.0, b'T');
    assert_eq!(read_message(&mut client).await.0, b'D');
    assert_eq!(read_message(&mut client).await.0, b'C');
    assert_eq!(read_message(&mut client).await.0, b'Z');

    let mut buf = BytesMut::new();
    write_tagged(&mut buf, b'X', |_| {});
    client.write_all(&buf).await.unwrap();
    drop(client);

    let _ = shutdown_tx.send(());
    server.await.unwrap().unwrap();
}
