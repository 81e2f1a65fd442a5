//! TCP acceptor and service lifecycle.
//!
//! The server owns the listening socket and the lifecycle state, and
//! makes every accept decision atomically under one lock so that
//! accept, re-arm, and stop never race. Stopping is a full-drain
//! barrier: no new connections are dispatched, every active session is
//! cancelled cooperatively, and the listener closes only after the
//! connection registry is empty.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::session::Session;
use commd_protocol::Cmd;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Lowest custom command code accepted by the host-manager hook.
pub const CUSTOM_COMMAND_MIN: u32 = 128;
/// One past the highest custom command code.
pub const CUSTOM_COMMAND_MAX: u32 = 256;

/// Service lifecycle state. Mutated only under the server's internal
/// lock, never concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    StoppingCycle,
    Running,
    Paused,
}

/// What the accept loop does after handling one incoming connection.
enum AcceptOutcome {
    /// Keep accepting (re-arm before the dispatched session finishes).
    Continue,
    /// Dispatched while paused: hold the socket but stop re-arming
    /// until the service resumes or stops.
    Park,
    /// Service is stopped; exit the loop and release the listener.
    Exit,
}

/// The commd TCP server.
pub struct CommServer {
    config: ServerConfig,
    state: Mutex<LifecycleState>,
    /// Mirrors every state transition for tasks that need a wakeup;
    /// the mutex above stays the source of truth for decisions.
    state_changed: watch::Sender<LifecycleState>,
    registry: Arc<ConnectionRegistry>,
    cancel: watch::Sender<bool>,
    available: AtomicBool,
    next_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl CommServer {
    /// Creates a server in the Stopped state.
    pub fn new(config: ServerConfig) -> Self {
        let (state_changed, _) = watch::channel(LifecycleState::Stopped);
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            state: Mutex::new(LifecycleState::Stopped),
            state_changed,
            registry: Arc::new(ConnectionRegistry::new()),
            cancel,
            available: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// Starts the listener and the accept loop.
    ///
    /// A bind or resolution failure is logged and leaves the
    /// communication interface unavailable; it does not propagate.
    pub async fn start(self: &Arc<Self>) {
        tracing::info!("start");
        if self.state() != LifecycleState::Stopped {
            tracing::warn!(state = ?self.state(), "start: service already started");
            return;
        }
        self.cancel.send_replace(false);

        let listener = match self.open_listener().await {
            Ok(listener) => listener,
            Err(e) => {
                self.available.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "start: opening listening socket failed");
                return;
            }
        };

        *self.local_addr.lock() = listener.local_addr().ok();
        self.available.store(true, Ordering::SeqCst);
        self.transition(LifecycleState::Running);

        let server = Arc::clone(self);
        let task = tokio::spawn(async move { server.accept_loop(listener).await });
        *self.accept_task.lock() = Some(task);

        tracing::info!("start: accepting connections");
    }

    async fn open_listener(&self) -> Result<TcpListener, ServerError> {
        let host = self.config.host.as_str();
        let mut addrs = tokio::net::lookup_host((host, self.config.port)).await?;
        let addr = addrs
            .next()
            .ok_or_else(|| ServerError::Unresolvable(host.to_string()))?;

        tracing::info!(host, %addr, backlog = self.config.backlog, "opening listening socket");

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(addr)?;
        Ok(socket.listen(self.config.backlog)?)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut state_rx = self.state_changed.subscribe();

        'accept: loop {
            if *state_rx.borrow_and_update() == LifecycleState::Stopped {
                break;
            }

            let accepted = tokio::select! {
                result = listener.accept() => result,
                // A state transition re-evaluates the loop condition.
                _ = state_rx.changed() => continue,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                    continue;
                }
            };

            match self.on_accept(stream, peer) {
                AcceptOutcome::Continue => {}
                AcceptOutcome::Park => {
                    while *state_rx.borrow_and_update() == LifecycleState::Paused {
                        if state_rx.changed().await.is_err() {
                            break 'accept;
                        }
                    }
                }
                AcceptOutcome::Exit => break,
            }
        }

        tracing::debug!("accept loop exited, releasing listener");
    }

    /// Decides the fate of one accepted connection. Runs entirely under
    /// the lifecycle lock so the decision, the registry insert, and the
    /// re-arm choice are atomic with respect to `stop`.
    fn on_accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> AcceptOutcome {
        let state = self.state.lock();
        tracing::debug!(state = ?*state, %peer, "incoming connection");

        match *state {
            LifecycleState::Stopped => {
                drop(stream);
                AcceptOutcome::Exit
            }
            LifecycleState::StoppingCycle => {
                tracing::warn!(%peer, "connection refused during stopping cycle");
                drop(stream);
                // Keep refusing until the drain completes.
                AcceptOutcome::Continue
            }
            current @ (LifecycleState::Running | LifecycleState::Paused) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = self.registry.register(id);
                let session = Session::new(stream, peer.to_string(), self.cancel.subscribe())
                    .with_policy(
                        self.config.read_timeout,
                        self.config.message_budget,
                        self.config.max_timeouts,
                    );

                tracing::info!(
                    %peer,
                    id = guard.id(),
                    active = self.registry.count(),
                    "connection dispatched"
                );
                tokio::spawn(async move {
                    // Held for the whole session: the registry entry
                    // clears on every exit path, panics included.
                    let _guard = guard;
                    session.run().await;
                });

                if current == LifecycleState::Running {
                    AcceptOutcome::Continue
                } else {
                    AcceptOutcome::Park
                }
            }
        }
    }

    /// Stops the service: refuses new connections, cancels all active
    /// sessions, and blocks until every one of them has completed
    /// before closing the listening socket. Idempotent once Stopped.
    pub async fn stop(&self) {
        tracing::info!("stop");
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Stopped {
                tracing::debug!("stop: already stopped");
                return;
            }
            *state = LifecycleState::StoppingCycle;
            self.state_changed.send_replace(*state);
        }

        tracing::info!("stop: sending cancel signal");
        self.cancel.send_replace(true);

        tracing::info!(active = self.registry.count(), "stop: waiting for active connections");
        self.registry.drain().await;
        tracing::info!("stop: connection handlers finished");

        let task = {
            let mut state = self.state.lock();
            *state = LifecycleState::Stopped;
            self.state_changed.send_replace(*state);
            self.accept_task.lock().take()
        };
        if let Some(task) = task {
            // The accept loop owns the listener; joining it closes the
            // socket.
            let _ = task.await;
        }

        *self.local_addr.lock() = None;
        self.available.store(false, Ordering::SeqCst);
        tracing::info!("stop complete");
    }

    /// Pauses dispatch re-arming: the next accepted connection is still
    /// served, but no further accepts are armed until `resume`.
    pub fn pause(&self) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Running {
            *state = LifecycleState::Paused;
            self.state_changed.send_replace(*state);
            tracing::info!("paused");
        }
    }

    /// Resumes accepting after a pause.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if *state == LifecycleState::Paused {
            *state = LifecycleState::Running;
            self.state_changed.send_replace(*state);
            tracing::info!("resumed");
        }
    }

    /// Host-manager custom command hook: validates the code, converts
    /// it to the command enumeration, and logs it. The converted
    /// command is returned to the caller; wiring an actual action is an
    /// extension point that is intentionally left open.
    pub fn custom_command(&self, code: u32) -> Result<Cmd, ServerError> {
        if !(CUSTOM_COMMAND_MIN..CUSTOM_COMMAND_MAX).contains(&code) {
            return Err(ServerError::InvalidCustomCommand { code });
        }
        let cmd = Cmd::from_byte(code as u8);
        tracing::info!(code, ?cmd, "custom command received");
        Ok(cmd)
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        *state = next;
        // send_replace stores the value even with no live receivers,
        // so a loop that subscribes later still observes it.
        self.state_changed.send_replace(*state);
    }

    /// Whether the listening socket opened successfully.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.registry.count()
    }

    /// The bound listener address, once started. Useful when the
    /// configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_is_stopped_and_unavailable() {
        let server = CommServer::new(ServerConfig::default());
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert!(!server.is_available());
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn start_failure_marks_interface_unavailable() {
        let config = ServerConfig::default().with_host("host.invalid.commd.test");
        let server = Arc::new(CommServer::new(config));
        server.start().await;
        assert!(!server.is_available());
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_stopped() {
        let server = CommServer::new(ServerConfig::default());
        server.stop().await;
        server.stop().await;
        assert_eq!(server.state(), LifecycleState::Stopped);
    }

    #[test]
    fn custom_command_validates_range() {
        let server = CommServer::new(ServerConfig::default());
        assert!(matches!(
            server.custom_command(127),
            Err(ServerError::InvalidCustomCommand { code: 127 })
        ));
        assert!(matches!(
            server.custom_command(256),
            Err(ServerError::InvalidCustomCommand { code: 256 })
        ));
        assert_eq!(server.custom_command(130).unwrap(), Cmd::Status);
        // In-range but unmapped codes convert to Undefined.
        assert_eq!(server.custom_command(200).unwrap(), Cmd::Undefined);
    }

    #[test]
    fn pause_and_resume_toggle_state() {
        let server = CommServer::new(ServerConfig::default());
        // Pause is a no-op unless running.
        server.pause();
        assert_eq!(server.state(), LifecycleState::Stopped);

        server.transition(LifecycleState::Running);
        server.pause();
        assert_eq!(server.state(), LifecycleState::Paused);
        server.resume();
        assert_eq!(server.state(), LifecycleState::Running);
    }
}
