//! Request/reply correlation against the OSC peer.
//!
//! Architecture: reactor pattern
//! - The UDP socket and the pending table are owned by one reactor task
//! - Callers talk to it through an mpsc channel
//! - Each pending request carries the oneshot its caller is waiting on
//!
//! Because only the reactor touches the table, "reject if the key is already
//! pending, else register", "match a reply and remove it" and "expire and
//! remove it" can never interleave. A reply that arrives after its request
//! expired finds nothing and is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stageproto::{decode_packet, CorrelationKey, OscArg, OscMessage, WireCommand, ERROR_ADDRESS};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, trace, warn};

/// Largest datagram we accept. AbletonOSC replies are far smaller, but
/// track-name lists for big sets can run to a few KB.
const MAX_DATAGRAM: usize = 65_536;

/// Longest a request may wait for its reply. Longer timeouts are clamped.
pub const MAX_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Errors a caller of the correlator can see.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrelationError {
    /// No reply arrived before the deadline
    #[error("timeout")]
    Timeout { key: CorrelationKey, after: Duration },

    /// Another request for the same key is still waiting
    #[error("duplicate request in flight for {0}")]
    DuplicateInFlight(CorrelationKey),

    /// The daemon is shutting down
    #[error("daemon shutting down")]
    Shutdown,

    /// The datagram could not be sent
    #[error("send failed: {0}")]
    Send(String),
}

type ReplyTx = oneshot::Sender<Result<Vec<OscArg>, CorrelationError>>;

/// Command sent to the reactor task
enum ReactorCommand {
    /// Send and register for the matching reply
    Request {
        command: WireCommand,
        timeout: Duration,
        reply_tx: ReplyTx,
    },
    /// Send without waiting for anything back
    Send {
        command: WireCommand,
        done_tx: oneshot::Sender<Result<(), CorrelationError>>,
    },
    /// Report how many requests are waiting
    PendingCount { count_tx: oneshot::Sender<usize> },
    /// Fail everything outstanding and stop
    Shutdown,
}

/// A request waiting for its reply
struct PendingRequest {
    reply_tx: ReplyTx,
    issued_at: Instant,
    deadline: Instant,
    expiry: delay_queue::Key,
}

/// The reactor task - owns the socket and the pending table.
struct Reactor {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    pending: HashMap<CorrelationKey, PendingRequest>,
    expirations: DelayQueue<CorrelationKey>,
    buf: Vec<u8>,
}

impl Reactor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<ReactorCommand>) {
        debug!(peer = %self.peer, "Correlator reactor started");

        loop {
            tokio::select! {
                // Callers first, so a burst of replies can't starve registration
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ReactorCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                received = self.socket.recv_from(&mut self.buf) => {
                    match received {
                        Ok((len, from)) => {
                            let packet = decode_packet(&self.buf[..len]);
                            match packet {
                                Ok(messages) => {
                                    for message in messages {
                                        self.route(message);
                                    }
                                }
                                Err(e) => {
                                    warn!(%from, len, error = %e, "Dropping malformed reply");
                                }
                            }
                        }
                        Err(e) => {
                            // ICMP port-unreachable from a previous send shows
                            // up here on some platforms; the socket stays usable.
                            debug!(error = %e, "UDP receive error");
                        }
                    }
                }

                Some(expired) = self.expirations.next() => {
                    self.expire(expired.into_inner());
                }
            }
        }

        self.fail_all();

        // Anything queued behind the shutdown gets the same answer
        cmd_rx.close();
        while let Ok(cmd) = cmd_rx.try_recv() {
            reject_shutdown(cmd);
        }

        debug!("Correlator reactor exiting");
    }

    async fn handle_command(&mut self, cmd: ReactorCommand) {
        match cmd {
            ReactorCommand::Request {
                command,
                timeout,
                reply_tx,
            } => self.register(command, timeout, reply_tx).await,
            ReactorCommand::Send { command, done_tx } => {
                let result = self.transmit(&command).await;
                let _ = done_tx.send(result);
            }
            ReactorCommand::PendingCount { count_tx } => {
                let _ = count_tx.send(self.pending.len());
            }
            ReactorCommand::Shutdown => {}
        }
    }

    async fn register(&mut self, command: WireCommand, timeout: Duration, reply_tx: ReplyTx) {
        let key = command.key();

        if self.pending.contains_key(&key) {
            debug!(%key, "Rejecting duplicate in-flight request");
            let _ = reply_tx.send(Err(CorrelationError::DuplicateInFlight(key)));
            return;
        }

        if timeout > MAX_RESPONSE_TIMEOUT {
            warn!(%key, ?timeout, max = ?MAX_RESPONSE_TIMEOUT, "Clamping response timeout");
        }
        let timeout = timeout.min(MAX_RESPONSE_TIMEOUT);

        let issued_at = Instant::now();
        let Some(deadline) = issued_at.checked_add(timeout) else {
            let _ = reply_tx.send(Err(CorrelationError::Timeout { key, after: timeout }));
            return;
        };
        let expiry = self.expirations.insert_at(key.clone(), deadline);
        self.pending.insert(
            key.clone(),
            PendingRequest {
                reply_tx,
                issued_at,
                deadline,
                expiry,
            },
        );

        if let Err(e) = self.transmit(&command).await {
            if let Some(req) = self.pending.remove(&key) {
                self.expirations.remove(&req.expiry);
                let _ = req.reply_tx.send(Err(e));
            }
            return;
        }

        trace!(%key, pending = self.pending.len(), "Request registered");
    }

    async fn transmit(&self, command: &WireCommand) -> Result<(), CorrelationError> {
        let datagram = command.encode();
        self.socket
            .send_to(&datagram, self.peer)
            .await
            .map_err(|e| {
                warn!(address = command.address(), error = %e, "Send to peer failed");
                CorrelationError::Send(e.to_string())
            })?;
        trace!(address = command.address(), bytes = datagram.len(), "Sent OSC");
        Ok(())
    }

    fn route(&mut self, message: OscMessage) {
        if message.address == ERROR_ADDRESS {
            warn!(args = ?message.args, "Peer reported an error");
            return;
        }

        let key = CorrelationKey::for_reply(&message);
        match self.pending.remove(&key) {
            Some(req) => {
                self.expirations.remove(&req.expiry);
                trace!(
                    %key,
                    elapsed_ms = req.issued_at.elapsed().as_millis() as u64,
                    "Reply matched"
                );
                let _ = req.reply_tx.send(Ok(message.args));
            }
            None => {
                debug!(%key, args = ?message.args, "Dropping unmatched message");
            }
        }
    }

    fn expire(&mut self, key: CorrelationKey) {
        if let Some(req) = self.pending.remove(&key) {
            let after = req.deadline - req.issued_at;
            debug!(%key, ?after, "Request timed out");
            let _ = req
                .reply_tx
                .send(Err(CorrelationError::Timeout { key, after }));
        }
    }

    fn fail_all(&mut self) {
        info!(pending = self.pending.len(), "Correlator shutting down, failing pending requests");
        self.expirations.clear();
        for (key, req) in self.pending.drain() {
            trace!(%key, "Failed pending request due to shutdown");
            let _ = req.reply_tx.send(Err(CorrelationError::Shutdown));
        }
    }
}

fn reject_shutdown(cmd: ReactorCommand) {
    match cmd {
        ReactorCommand::Request { reply_tx, .. } => {
            let _ = reply_tx.send(Err(CorrelationError::Shutdown));
        }
        ReactorCommand::Send { done_tx, .. } => {
            let _ = done_tx.send(Err(CorrelationError::Shutdown));
        }
        ReactorCommand::PendingCount { .. } | ReactorCommand::Shutdown => {}
    }
}

/// Handle to the correlation reactor. Cheap to clone.
#[derive(Clone)]
pub struct Correlator {
    cmd_tx: mpsc::Sender<ReactorCommand>,
}

impl Correlator {
    /// Spawn the reactor on `socket`, sending to `peer`.
    ///
    /// The socket should already be bound to the port the peer replies to.
    pub fn spawn(socket: UdpSocket, peer: SocketAddr) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let reactor = Reactor {
            socket: Arc::new(socket),
            peer,
            pending: HashMap::new(),
            expirations: DelayQueue::new(),
            buf: vec![0; MAX_DATAGRAM],
        };
        let handle = tokio::spawn(reactor.run(cmd_rx));

        (Self { cmd_tx }, handle)
    }

    /// Send `command` and wait for the reply on its correlation key.
    ///
    /// Resolves with the reply's arguments, or `Timeout` once `timeout` has
    /// passed, or `Shutdown` if the daemon stops first. A second call for a
    /// key that is still pending fails immediately with `DuplicateInFlight`.
    pub async fn send_and_wait(
        &self,
        command: WireCommand,
        timeout: Duration,
    ) -> Result<Vec<OscArg>, CorrelationError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(ReactorCommand::Request {
                command,
                timeout,
                reply_tx,
            })
            .await
            .map_err(|_| CorrelationError::Shutdown)?;

        // The reactor owns the deadline; a dropped sender means it exited.
        reply_rx.await.map_err(|_| CorrelationError::Shutdown)?
    }

    /// Send `command` without registering for a reply.
    pub async fn send(&self, command: WireCommand) -> Result<(), CorrelationError> {
        let (done_tx, done_rx) = oneshot::channel();

        self.cmd_tx
            .send(ReactorCommand::Send { command, done_tx })
            .await
            .map_err(|_| CorrelationError::Shutdown)?;

        done_rx.await.map_err(|_| CorrelationError::Shutdown)?
    }

    /// Number of requests currently waiting for a reply.
    pub async fn pending_count(&self) -> Result<usize, CorrelationError> {
        let (count_tx, count_rx) = oneshot::channel();

        self.cmd_tx
            .send(ReactorCommand::PendingCount { count_tx })
            .await
            .map_err(|_| CorrelationError::Shutdown)?;

        count_rx.await.map_err(|_| CorrelationError::Shutdown)
    }

    /// Fail every outstanding request with `Shutdown` and stop the reactor.
    ///
    /// Irreversible: later calls on any clone fail with `Shutdown`.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ReactorCommand::Shutdown).await;
    }
}
