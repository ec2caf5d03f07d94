//! Client for the stagehand daemon.
//!
//! Keeps one TCP connection open and reuses it. Calls are serialized: the
//! connection is held for the whole request/response exchange, so responses
//! always line up with requests. Any I/O failure drops the connection and the
//! next call reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use stageproto::{DaemonStatus, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to stagehand at {addr}: {source}. Is the daemon running?")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to stagehand failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from stagehand within {0:?}")]
    Timeout(Duration),

    #[error("stagehand closed the connection")]
    Closed,

    #[error("invalid response from stagehand: {0}")]
    Malformed(String),

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: Value },

    /// The daemon answered with `ok: false`
    #[error("{0}")]
    Remote(String),
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn exchange(&mut self, line: &str) -> Result<String, ClientError> {
        self.writer.write_all(line.as_bytes()).await?;

        let mut response = String::new();
        let read = self.reader.read_line(&mut response).await?;
        if read == 0 {
            return Err(ClientError::Closed);
        }
        Ok(response)
    }
}

/// Persistent connection to the daemon.
pub struct DaemonClient {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl DaemonClient {
    /// Create a client. Nothing is connected until the first call.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<Connection, ClientError> {
        let connect = TcpStream::connect(&self.addr);
        let stream = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(ClientError::Timeout(self.timeout)),
        };

        info!(addr = %self.addr, "Connected to stagehand");
        let (read, write) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    /// Send one request and wait for its response.
    ///
    /// The request's id is replaced with a fresh one. Returns the `result`
    /// on success, or `ClientError::Remote` with the daemon's message.
    pub async fn request(&self, mut request: Request) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.id = Value::from(id);
        let line = request
            .to_json_line()
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ClientError::Closed);
        };

        debug!(id, command = %request.command, "Sending request");
        let exchanged = tokio::time::timeout(self.timeout, conn.exchange(&line)).await;
        let raw = match exchanged {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(error = %e, "Dropping connection");
                *guard = None;
                return Err(e);
            }
            Err(_) => {
                // A late response would desync the stream
                *guard = None;
                return Err(ClientError::Timeout(self.timeout));
            }
        };

        let response: Response = match serde_json::from_str(raw.trim_end()) {
            Ok(response) => response,
            Err(e) => {
                *guard = None;
                return Err(ClientError::Malformed(e.to_string()));
            }
        };
        if response.id != Value::from(id) {
            *guard = None;
            return Err(ClientError::IdMismatch {
                expected: id,
                got: response.id,
            });
        }
        drop(guard);

        response.into_result().map_err(ClientError::Remote)
    }

    /// Send an OSC command through the daemon.
    pub async fn send_osc(&self, address: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.request(Request::osc(Value::Null, address, args)).await
    }

    pub async fn ping(&self) -> Result<Value, ClientError> {
        self.request(Request::verb(Value::Null, "ping")).await
    }

    pub async fn status(&self) -> Result<DaemonStatus, ClientError> {
        let value = self.request(Request::verb(Value::Null, "status")).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Malformed(e.to_string()))
    }

    /// Drop the connection, if any.
    pub async fn disconnect(&self) {
        if self.conn.lock().await.take().is_some() {
            info!(addr = %self.addr, "Disconnected from stagehand");
        }
    }
}
