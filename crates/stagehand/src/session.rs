//! One connected client.
//!
//! Requests are read line by line and each one runs as its own task, so a
//! slow query never holds up the ones behind it. A single writer task owns
//! the write half and sends responses in completion order; clients match
//! them up by `id`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use stageproto::{parse_request, Action, EnvelopeError, Response};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::daemon::DaemonState;

/// Longest request line accepted, in bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Most requests one session may have running at once. Lines past the cap
/// are answered with an error straight away.
pub const MAX_IN_FLIGHT: usize = 256;

/// One line from the client, or the reason it can't be used.
#[derive(Debug, PartialEq)]
enum Line {
    Text(String),
    TooLong,
    InvalidUtf8,
}

/// Newline-delimited reader with a length cap.
///
/// Holds the partially received line between reads; an overlong line is
/// skipped through its terminating newline and reported once.
struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<Line>> {
        self.buf.clear();
        let limit = MAX_LINE_BYTES as u64 + 1;
        let read = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        } else if self.buf.len() > MAX_LINE_BYTES {
            skip_line(&mut self.inner).await?;
            return Ok(Some(Line::TooLong));
        }
        // A final line without a newline before EOF is still a line

        match std::str::from_utf8(&self.buf) {
            Ok(text) => Ok(Some(Line::Text(text.to_string()))),
            Err(_) => Ok(Some(Line::InvalidUtf8)),
        }
    }
}

/// Consume input through the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = available.len();
        reader.consume(len);
    }
}

/// Serve one connection until the client hangs up or the daemon shuts down.
pub async fn serve(
    stream: TcpStream,
    remote: SocketAddr,
    state: Arc<DaemonState>,
    shutdown: CancellationToken,
) {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("session", id = %session_id, %remote);

    async move {
        info!("Session opened");

        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::channel::<Response>(64);
        let writer = tokio::spawn(write_responses(write_half, response_rx).in_current_span());

        let mut lines = LineReader::new(read_half);
        let in_flight = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut handled = 0u64;

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Session stopping for shutdown");
                    break;
                }
                line = lines.next_line() => line,
            };

            let text = match line {
                Ok(Some(Line::Text(text))) => text,
                Ok(Some(Line::TooLong)) => {
                    warn!(max = MAX_LINE_BYTES, "Request line too long");
                    let rejected = Response::protocol_error(
                        Value::Null,
                        &EnvelopeError::InvalidRequest(format!(
                            "line exceeds {} bytes",
                            MAX_LINE_BYTES
                        )),
                    );
                    let _ = response_tx.send(rejected).await;
                    continue;
                }
                Ok(Some(Line::InvalidUtf8)) => {
                    warn!("Request line is not UTF-8");
                    let rejected = Response::protocol_error(
                        Value::Null,
                        &EnvelopeError::InvalidJson("line is not valid UTF-8".to_string()),
                    );
                    let _ = response_tx.send(rejected).await;
                    continue;
                }
                Ok(None) => {
                    debug!("Client closed connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read failed, closing session");
                    break;
                }
            };

            if text.trim().is_empty() {
                continue;
            }

            handled += 1;
            let Ok(permit) = Arc::clone(&in_flight).try_acquire_owned() else {
                warn!(limit = MAX_IN_FLIGHT, "Too many requests in flight");
                let _ = response_tx.send(over_capacity(&text)).await;
                continue;
            };

            let state = Arc::clone(&state);
            let response_tx = response_tx.clone();
            tokio::spawn(
                async move {
                    let response = handle_line(&state, &text).await;
                    drop(permit);
                    // Writer gone means the client is gone
                    let _ = response_tx.send(response).await;
                }
                .in_current_span(),
            );
        }

        // In-flight requests still hold senders; the writer drains them as
        // they resolve and exits after the last one.
        drop(response_tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }

        info!(requests = handled, "Session closed");
    }
    .instrument(span)
    .await
}

/// Handle one request line and build its response.
pub async fn handle_line(state: &DaemonState, line: &str) -> Response {
    let request = match parse_request(line) {
        Ok(request) => request,
        Err(rejected) => {
            warn!(error = %rejected.error, "Malformed request");
            return rejected.into_response();
        }
    };

    let id = request.id.clone();
    let action = match request.action() {
        Ok(action) => action,
        Err(e) => {
            warn!(command = %request.command, error = %e, "Rejected request");
            return Response::protocol_error(id, &e);
        }
    };

    match action {
        Action::Ping => Response::ok(id, json!("pong")),
        Action::Status => match state.status().await {
            Ok(status) => match serde_json::to_value(status) {
                Ok(value) => Response::ok(id, value),
                Err(e) => Response::error(id, e.to_string()),
            },
            Err(e) => Response::error(id, e.to_string()),
        },
        Action::Osc(command) => {
            debug!(%command, "Dispatching");
            match state.dispatch(command).await {
                Ok(result) => Response::ok(id, result),
                Err(e) => {
                    debug!(error = %e, "Request failed");
                    Response::error(id, e.to_string())
                }
            }
        }
    }
}

/// Reject a line because the session is at [`MAX_IN_FLIGHT`].
fn over_capacity(line: &str) -> Response {
    let id = match parse_request(line) {
        Ok(request) => request.id,
        Err(rejected) => rejected.id,
    };
    Response::protocol_error(id, &EnvelopeError::TooManyInFlight { limit: MAX_IN_FLIGHT })
}

async fn write_responses(mut writer: OwnedWriteHalf, mut responses: mpsc::Receiver<Response>) {
    while let Some(response) = responses.recv().await {
        let line = match response.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize response");
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!(error = %e, "Write failed, dropping remaining responses");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn read_all(input: &[u8]) -> Vec<Line> {
        let mut reader = LineReader::new(input);
        let mut lines = Vec::new();
        while let Some(line) = reader.next_line().await.unwrap() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_lines_split_and_trimmed() {
        let lines = read_all(b"{\"a\":1}\r\n{\"b\":2}\nlast").await;
        assert_eq!(
            lines,
            vec![
                Line::Text("{\"a\":1}".to_string()),
                Line::Text("{\"b\":2}".to_string()),
                Line::Text("last".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let mut input = vec![b'x'; MAX_LINE_BYTES + 10];
        input.extend_from_slice(b"\nnext\n");
        let lines = read_all(&input).await;
        assert_eq!(lines, vec![Line::TooLong, Line::Text("next".to_string())]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_reported() {
        let lines = read_all(b"\xff\xfe\nok\n").await;
        assert_eq!(lines, vec![Line::InvalidUtf8, Line::Text("ok".to_string())]);
    }

    #[test]
    fn test_over_capacity_answers_with_recovered_id() {
        let response = over_capacity(r#"{"command":"/live/song/get/tempo","request_id":"r1"}"#);
        assert_eq!(response.id, json!("r1"));
        assert!(!response.ok);
        assert_eq!(
            response.error.as_deref(),
            Some("protocol error: too many requests in flight (limit 256)")
        );

        let response = over_capacity("{not json");
        assert_eq!(response.id, Value::Null);
    }
}
