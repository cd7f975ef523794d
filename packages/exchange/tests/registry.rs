use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::sync::Arc;

use collection_literals::btree;
use faashost_exchange::{
    ChannelSocket, CollectedResponse, ExchangeBuffer, ExchangeError, ExchangeRegistry,
    MessageSocket, RequestExchangeBuffer, ResponseExchangeBuffer, SocketExchangeBuffer,
    SocketMessage,
};

fn collect_headers(buffer: &dyn ExchangeBuffer) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    buffer
        .headers(&mut |name, value| {
            headers.insert(name.to_string(), value.to_string());
        })
        .unwrap();
    headers
}

#[test]
fn request_through_registry() {
    let registry = ExchangeRegistry::new();
    let request = http::Request::builder()
        .uri("/submit")
        .header("Content-Type", "text/plain")
        .header("X-Request-Id", "r-1")
        .body(Cursor::new(b"payload".to_vec()))
        .unwrap();
    let handle = registry.register(RequestExchangeBuffer::new(request));

    let headers = registry
        .with_buffer(handle, |buffer| Ok(collect_headers(buffer)))
        .unwrap();
    assert_eq!(
        headers,
        btree! {
            "content-type".to_string() => "text/plain".to_string(),
            "x-request-id".to_string() => "r-1".to_string(),
        }
    );

    let first = registry.with_buffer(handle, |b| b.buffer()).unwrap();
    let second = registry.with_buffer(handle, |b| b.buffer()).unwrap();
    assert_eq!(first, b"payload");
    assert!(second.is_empty());

    assert!(registry.release(handle));
    assert!(!registry.release(handle));
    assert!(matches!(
        registry.with_buffer(handle, |b| b.buffer()),
        Err(ExchangeError::UnknownHandle(h)) if h == handle
    ));
}

#[test]
fn response_through_registry() {
    let registry = ExchangeRegistry::new();
    let collected = CollectedResponse::new();
    let handle = registry.register(ResponseExchangeBuffer::new(collected.clone()));

    registry
        .with_buffer(handle, |buffer| {
            buffer.set_header("x-served-by", "guest")?;
            buffer.write_status_code(404)?;
            buffer.write(b"not here")?;
            buffer.close()
        })
        .unwrap();
    assert!(registry.with_buffer(handle, |b| b.buffer()).is_err());
    registry.release(handle);

    let response = collected.snapshot();
    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-served-by"], "guest");
    assert_eq!(response.body(), b"not here");
}

#[test]
fn socket_through_registry() {
    let registry = ExchangeRegistry::new();
    let (host_end, mut peer) = ChannelSocket::pair(4);
    let headers = btree! {
        "Sec-WebSocket-Protocol".to_string() => "chat".to_string(),
    };
    let handle = registry.register(SocketExchangeBuffer::new(headers, host_end));

    peer.send(SocketMessage::Binary(b"ping".to_vec())).unwrap();
    let received = registry.with_buffer(handle, |b| b.buffer()).unwrap();
    assert_eq!(received, b"ping");

    registry
        .with_buffer(handle, |buffer| {
            assert_eq!(buffer.header("sec-websocket-protocol")?.as_deref(), Some("chat"));
            assert_eq!(buffer.status_code()?, 101);
            buffer.write(b"pong")?;
            buffer.close()
        })
        .unwrap();

    assert_eq!(peer.recv(), Some(SocketMessage::Binary(b"pong".to_vec())));
    assert_eq!(peer.recv(), Some(SocketMessage::Close));
    registry.release(handle);
}

#[test]
fn concurrent_handles_are_unique() {
    let registry = Arc::new(ExchangeRegistry::new());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || (0..100).map(|_| registry.create()).collect::<Vec<_>>())
        })
        .collect();
    let handles: Vec<_> = threads
        .into_iter()
        .flat_map(|thread| thread.join().unwrap())
        .collect();

    let unique: BTreeSet<_> = handles.iter().copied().collect();
    assert_eq!(unique.len(), 800);
    assert!(!unique.contains(&0));

    for handle in &handles[..300] {
        registry.release(*handle);
    }
    let stats = registry.stats();
    assert_eq!(stats.created, 800);
    assert_eq!(stats.released, 300);
    assert_eq!(stats.live, 500);
}
