//! DaemonClient against a scripted fake daemon.

use std::time::Duration;

use cue::{ClientError, DaemonClient};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Reads one request line and answers it with `reply(request)`.
/// `None` closes the connection without answering.
async fn answer(
    stream: &mut BufReader<TcpStream>,
    reply: impl FnOnce(&Value) -> Option<Value>,
) -> Option<Value> {
    let mut line = String::new();
    if stream.read_line(&mut line).await.unwrap() == 0 {
        return None;
    }
    let request: Value = serde_json::from_str(&line).unwrap();
    if let Some(response) = reply(&request) {
        let mut out = response.to_string();
        out.push('\n');
        stream.get_mut().write_all(out.as_bytes()).await.unwrap();
    }
    Some(request)
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

#[tokio::test]
async fn test_requests_reuse_connection_with_increasing_ids() {
    let (listener, addr) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut seen = Vec::new();
        for _ in 0..2 {
            let request = answer(&mut stream, |r| {
                Some(json!({"id": r["id"], "ok": true, "result": [120.0]}))
            })
            .await
            .unwrap();
            seen.push(request);
        }
        seen
    });

    let client = DaemonClient::new(addr, Duration::from_secs(2));
    let first = client.send_osc("/live/song/get/tempo", vec![]).await.unwrap();
    let second = client.send_osc("/live/song/get/tempo", vec![]).await.unwrap();
    assert_eq!(first, json!([120.0]));
    assert_eq!(second, json!([120.0]));

    let seen = server.await.unwrap();
    assert_eq!(seen[0]["id"], json!(1));
    assert_eq!(seen[1]["id"], json!(2));
    assert_eq!(seen[0]["command"], json!("/live/song/get/tempo"));
}

#[tokio::test]
async fn test_remote_error_surfaces_message() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        answer(&mut stream, |r| {
            Some(json!({"id": r["id"], "ok": false, "error": "timeout"}))
        })
        .await;
    });

    let client = DaemonClient::new(addr, Duration::from_secs(2));
    let err = client
        .send_osc("/live/song/get/tempo", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(ref m) if m == "timeout"));
}

#[tokio::test]
async fn test_reconnects_after_daemon_hangs_up() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        // First connection: read the request, then hang up
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        answer(&mut stream, |_| None).await;
        drop(stream);

        // Second connection answers
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        answer(&mut stream, |r| {
            Some(json!({"id": r["id"], "ok": true, "result": "pong"}))
        })
        .await;
    });

    let client = DaemonClient::new(addr, Duration::from_secs(2));
    assert!(matches!(client.ping().await, Err(ClientError::Closed)));
    assert_eq!(client.ping().await.unwrap(), json!("pong"));
}

#[tokio::test]
async fn test_timeout_drops_connection() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        // Never answer the first request
        answer(&mut stream, |_| None).await;

        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        answer(&mut stream, |r| {
            Some(json!({"id": r["id"], "ok": true, "result": null}))
        })
        .await;
    });

    let client = DaemonClient::new(addr, Duration::from_millis(200));
    assert!(matches!(
        client.send_osc("/live/song/get/tempo", vec![]).await,
        Err(ClientError::Timeout(_))
    ));
    assert_eq!(
        client
            .send_osc("/live/song/start_playing", vec![])
            .await
            .unwrap(),
        Value::Null
    );
}

#[tokio::test]
async fn test_mismatched_id_rejected() {
    let (listener, addr) = listener().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        answer(&mut stream, |_| {
            Some(json!({"id": 999, "ok": true, "result": null}))
        })
        .await;
    });

    let client = DaemonClient::new(addr, Duration::from_secs(2));
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::IdMismatch { expected: 1, .. }));
}

#[tokio::test]
async fn test_connect_failure_names_address() {
    let (listener, addr) = listener().await;
    drop(listener);

    let client = DaemonClient::new(addr.clone(), Duration::from_secs(1));
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }));
    assert!(err.to_string().contains(&addr));
}
