//! End-to-end exercise of [`pgwire::session_machine::run_session`] over an
//! in-memory `tokio::io::duplex` pair, standing in for the SSL-probe/TCP
//! accept loop in `pgwire::server` (which needs a real `TcpStream`). Auth
//! uses `TrustProvider` so the test only has to hand-roll the plain
//! message framing, not a SCRAM exchange.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use common::config::Config;
use common::error::Result;
use executor::fake::FakeExecutor;
use executor::BackendExecutor;
use pgwire::cancel::CancelRegistry;
use pgwire::protocol::TranslatorShared;
use pgwire::session_machine::{run_session, GatewayContext};
use pgwire::ExecutorFactory;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use translator::TranslationCache;

struct FakeExecutorFactory;

#[async_trait]
impl ExecutorFactory for FakeExecutorFactory {
    async fn new_executor(&self) -> Result<Box<dyn BackendExecutor>> {
        Ok(Box::new(FakeExecutor::new()))
    }
}

fn test_context() -> Arc<GatewayContext> {
    let config = Arc::new(Config::default());
    let translation_cache = TranslationCache::new(config.translation_cache_size, config.translation_cache_ttl);
    let translator = TranslatorShared::new(config.identifier_case_policy, translation_cache);
    Arc::new(GatewayContext {
        config,
        cancel_registry: CancelRegistry::new(),
        translator,
        auth_chain: vec![Box::new(auth::TrustProvider)],
        executor_factory: Arc::new(FakeExecutorFactory),
    })
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

async fn send_query(client: &mut DuplexStream, sql: &str) {
    let mut buf = BytesMut::new();
    write_tagged(&mut buf, b'Q', |b| put_cstr(b, sql));
    client.write_all(&buf).await.unwrap();
}

async fn send_terminate(client: &mut DuplexStream) {
    let mut buf = BytesMut::new();
    write_tagged(&mut buf, b'X', |_| {});
    client.write_all(&buf).await.unwrap();
}

/// Reads one backend message and returns `(tag, body)`.
async fn read_message(client: &mut DuplexStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    client.read_exact(&mut header).await.unwrap();
    let tag = header[0];
    let len = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;
    let mut body = vec![0u8; len - 4];
    client.read_exact(&mut body).await.unwrap();
    (tag, body)
}

async fn read_tags(client: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut tags = Vec::with_capacity(n);
    for _ in 0..n {
        tags.push(read_message(client).await.0);
    }
    tags
}

#[tokio::test]
async fn authenticates_and_reaches_ready_for_query() {
    let ctx = test_context();
    let (client, server) = duplex(8192);
    let mut client = client;

    let mut params = HashMap::new();
    params.insert("user".to_string(), "tester".to_string());

    let handle = tokio::spawn(run_session(ctx, 42, server, params));

    // AuthenticationOk, then a run of ParameterStatus, then BackendKeyData,
    // then ReadyForQuery (spec.md §4.5's PARAM-EMIT state). Read messages
    // until ReadyForQuery rather than hardcoding the ParameterStatus count.
    let (tag, _) = read_message(&mut client).await;
    assert_eq!(tag, b'R', "expected AuthenticationOk");

    let mut saw_key_data = false;
    loop {
        let (tag, _) = read_message(&mut client).await;
        match tag {
            b'S' => continue,
            b'K' => saw_key_data = true,
            b'Z' => break,
            other => panic!("unexpected message tag '{}' before ReadyForQuery", other as char),
        }
    }
    assert!(saw_key_data, "expected BackendKeyData before ReadyForQuery");

    send_terminate(&mut client).await;
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn simple_query_round_trip_creates_inserts_and_selects() {
    let ctx = test_context();
    let (client, server) = duplex(1 << 16);
    let mut client = client;

    let mut params = HashMap::new();
    params.insert("user".to_string(), "tester".to_string());

    let handle = tokio::spawn(run_session(ctx, 7, server, params));

    // Drain the auth/param-emit preamble up to and including ReadyForQuery.
    loop {
        let (tag, _) = read_message(&mut client).await;
        if tag == b'Z' {
            break;
        }
    }

    send_query(&mut client, "CREATE TABLE t1 (id INT, name TEXT)").await;
    let tags = read_tags(&mut client, 2).await; // CommandComplete, ReadyForQuery
    assert_eq!(tags, vec![b'C', b'Z']);

    send_query(&mut client, "INSERT INTO t1 VALUES (1, 'hello')").await;
    let tags = read_tags(&mut client, 2).await;
    assert_eq!(tags, vec![b'C', b'Z']);

    send_query(&mut client, "SELECT id, name FROM t1").await;
    let (tag, _) = read_message(&mut client).await;
    assert_eq!(tag, b'T', "expected RowDescription");
    let (tag, _) = read_message(&mut client).await;
    assert_eq!(tag, b'D', "expected DataRow");
    let tags = read_tags(&mut client, 2).await; // CommandComplete, ReadyForQuery
    assert_eq!(tags, vec![b'C', b'Z']);

    send_terminate(&mut client).await;
    handle.await.unwrap().unwrap();
}
