//! Daemon lifecycle: bind, accept sessions, shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use stageconf::{resolve, StageConfig};
use stageproto::{args_to_json, DaemonStatus, WireCommand};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::correlator::{CorrelationError, Correlator};
use crate::session;

/// How long open sessions get to flush their last responses after shutdown
/// starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors that stop the daemon from starting, or stop it running.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot resolve peer address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("correlator stopped unexpectedly: {0}")]
    Correlator(String),
}

/// Addresses and timing the daemon runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// TCP address sessions connect to
    pub listen: String,
    /// UDP address the peer sends replies to; commands go out from here too
    pub reply_bind: String,
    /// UDP address commands are sent to
    pub peer: String,
    pub response_timeout: Duration,
}

impl From<&StageConfig> for DaemonConfig {
    fn from(config: &StageConfig) -> Self {
        Self {
            listen: config.bind.addr(),
            reply_bind: config.peer.reply_bind_addr(&config.bind),
            peer: config.peer.command_addr(),
            response_timeout: config.timing.response_timeout(),
        }
    }
}

/// State shared by every session.
pub struct DaemonState {
    correlator: Correlator,
    response_timeout: Duration,
    listen: SocketAddr,
    peer: SocketAddr,
    reply: SocketAddr,
    started: Instant,
}

impl DaemonState {
    /// Forward one command to the peer.
    ///
    /// Commands that expect a reply resolve with its arguments as a JSON
    /// array. Everything else resolves with null once the datagram is out.
    pub async fn dispatch(&self, command: WireCommand) -> Result<Value, CorrelationError> {
        if command.expects_reply() {
            let args = self
                .correlator
                .send_and_wait(command, self.response_timeout)
                .await?;
            Ok(args_to_json(&args))
        } else {
            self.correlator.send(command).await?;
            Ok(Value::Null)
        }
    }

    pub async fn status(&self) -> Result<DaemonStatus, CorrelationError> {
        let pending = self.correlator.pending_count().await?;
        Ok(DaemonStatus {
            daemon: "running".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            listen: self.listen.to_string(),
            peer: self.peer.to_string(),
            command_port: self.peer.port(),
            reply_port: self.reply.port(),
            pending,
            uptime_secs: self.started.elapsed().as_secs(),
        })
    }
}

/// A started daemon: sockets bound, correlator running, not yet accepting.
pub struct Daemon {
    listener: TcpListener,
    state: Arc<DaemonState>,
    reactor: JoinHandle<()>,
}

impl Daemon {
    /// Bind the session listener and the reply socket, and start correlating.
    ///
    /// Fails if either address is already in use.
    pub async fn start(config: DaemonConfig) -> Result<Self, DaemonError> {
        let peer = resolve(&config.peer).map_err(|source| DaemonError::Resolve {
            addr: config.peer.clone(),
            source,
        })?;

        let socket = UdpSocket::bind(&config.reply_bind)
            .await
            .map_err(|source| DaemonError::Bind {
                what: "reply socket",
                addr: config.reply_bind.clone(),
                source,
            })?;

        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|source| DaemonError::Bind {
                what: "session listener",
                addr: config.listen.clone(),
                source,
            })?;

        let listen = listener
            .local_addr()
            .map_err(|source| DaemonError::Bind {
                what: "session listener",
                addr: config.listen.clone(),
                source,
            })?;
        let reply = socket.local_addr().map_err(|source| DaemonError::Bind {
            what: "reply socket",
            addr: config.reply_bind.clone(),
            source,
        })?;

        let (correlator, reactor) = Correlator::spawn(socket, peer);

        info!(
            %listen,
            %peer,
            %reply,
            timeout_ms = config.response_timeout.as_millis() as u64,
            "stagehand started"
        );

        Ok(Self {
            listener,
            state: Arc::new(DaemonState {
                correlator,
                response_timeout: config.response_timeout,
                listen,
                peer,
                reply,
                started: Instant::now(),
            }),
            reactor,
        })
    }

    /// Address sessions should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.state.listen
    }

    /// Address the peer should send replies to.
    pub fn reply_addr(&self) -> SocketAddr {
        self.state.reply
    }

    /// Accept sessions until `shutdown` fires, then stop.
    ///
    /// Shutdown stops accepting, fails every pending request with
    /// "daemon shutting down", and gives sessions [`SHUTDOWN_GRACE`] to
    /// write their last responses. If the correlator task ends on its own
    /// the daemon winds down the same way and returns
    /// [`DaemonError::Correlator`].
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DaemonError> {
        let Daemon {
            listener,
            state,
            mut reactor,
        } = self;
        let sessions = TaskTracker::new();
        let session_shutdown = shutdown.child_token();
        let mut reactor_exit = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                joined = &mut reactor => {
                    reactor_exit = Some(joined);
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            debug!(%remote, "Accepted connection");
                            sessions.spawn(session::serve(
                                stream,
                                remote,
                                Arc::clone(&state),
                                session_shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            // Usually fd exhaustion; back off instead of spinning
                            warn!(error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        info!(sessions = sessions.len(), "Shutting down");

        let failure = match reactor_exit {
            Some(joined) => {
                let reason = match joined {
                    Ok(()) => "task exited".to_string(),
                    Err(e) => e.to_string(),
                };
                error!(%reason, "Correlator stopped while daemon was running");
                session_shutdown.cancel();
                Some(reason)
            }
            None => {
                state.correlator.shutdown().await;
                if let Err(e) = reactor.await {
                    error!(error = %e, "Correlator task failed");
                }
                None
            }
        };

        sessions.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, sessions.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = sessions.len(),
                "Sessions did not finish within the grace period"
            );
        }

        info!("Shutdown complete");
        match failure {
            Some(reason) => Err(DaemonError::Correlator(reason)),
            None => Ok(()),
        }
    }
}
