//! A single resilient request/response connection to a computer server.
//!
//! The server inside a VM is routinely not listening yet while the guest
//! boots, so failing to connect is the normal case for the first seconds or
//! minutes of a session. A background keepalive task therefore reconnects
//! forever with capped exponential backoff and keeps its logging quiet, while
//! [`CommandChannel::send`] has its own small retry budget per command.

pub mod transport;
pub mod websocket;

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, info, log, trace, warn, Level};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{sleep, sleep_until, timeout, Instant},
};

use crate::{
    config::ChannelConfig,
    error::{ComputerError, Result},
    models::{Request, Response},
    retry::retry_if,
};

pub use transport::{Connection, Connector};
pub use websocket::WsConnector;

/// Command used to prove the server's handlers are up, not just its socket.
pub const READY_CHECK_COMMAND: &str = "get_screen_size";

const TRANSITION_BACKLOG: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    PingTimeout,
    Error,
    /// Gracefully closed; `connect()` or `send()` reopens.
    Closed,
    /// Torn down for good.
    ForceClosed,
}

impl ConnectionState {
    fn is_shut(&self) -> bool {
        matches!(self, Self::Closed | Self::ForceClosed)
    }
}

/// Decides how loudly to report reconnect failures during one outage.
#[derive(Debug, Clone)]
pub struct ReconnectLog {
    every: u32,
    failures: u32,
}

impl ReconnectLog {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Level for the failure being recorded: the first one of an outage is a
    /// warning, every `every`th is info, the rest debug.
    pub fn failure(&mut self) -> Level {
        self.failures += 1;
        if self.failures == 1 {
            Level::Warn
        } else if self.failures % self.every == 0 {
            Level::Info
        } else {
            Level::Debug
        }
    }

    /// Ends the outage; returns how many failures it had, if any.
    pub fn recovered(&mut self) -> Option<u32> {
        let failures = std::mem::take(&mut self.failures);
        (failures > 0).then_some(failures)
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    state: watch::Sender<ConnectionState>,
    // every change in order; the watch only keeps the latest
    transitions: broadcast::Sender<ConnectionState>,
    // held for the whole request/response exchange, which serializes callers
    conn: Mutex<Option<Box<dyn Connection>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            trace!("{}: {prev:?} -> {next:?}", self.connector.endpoint());
            let _ = self.transitions.send(next);
        }
    }

    /// Drops a transport that just failed so the keepalive task replaces it.
    fn discard(&self, slot: &mut Option<Box<dyn Connection>>, reason: ConnectionState) {
        slot.take();
        if !self.state().is_shut() {
            self.set_state(reason);
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.keepalive.get_mut().take() {
            task.abort();
        }
    }
}

/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("endpoint", &self.inner.connector.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl CommandChannel {
    pub fn new(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                transitions,
                conn: Mutex::new(None),
                keepalive: Mutex::new(None),
            }),
        }
    }

    /// Channel to the WebSocket server at `host`, using the configured port
    /// and path.
    pub fn websocket(host: &str, config: ChannelConfig) -> Result<Self> {
        let connector = WsConnector::new(host, config.port, &config.path)?;
        Ok(Self::new(Arc::new(connector), config))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Every state change from now on, in order. Slow receivers lose the
    /// oldest entries.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions.subscribe()
    }

    pub fn endpoint(&self) -> String {
        self.inner.connector.endpoint()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Starts the keepalive task unless it is already running. Does not wait
    /// for a connection; see [`wait_for_ready`](Self::wait_for_ready).
    pub async fn connect(&self) -> Result<()> {
        if self.state() == ConnectionState::ForceClosed {
            return Err(ComputerError::ChannelClosed);
        }

        let mut task = self.inner.keepalive.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        if self.state() == ConnectionState::Closed {
            // a shared-mode close may have left the transport up
            let reopened = if self.inner.conn.lock().await.is_some() {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            };
            self.inner.set_state(reopened);
        }

        debug!("starting keepalive for {}", self.endpoint());
        *task = Some(tokio::spawn(keepalive(Arc::downgrade(&self.inner))));
        Ok(())
    }

    /// Waits until the server answers a real command, not just the socket
    /// handshake. Fails with `Timeout` if that never happens within `limit`.
    pub async fn wait_for_ready(&self, limit: Duration) -> Result<()> {
        self.connect().await?;
        let check = Request::new(READY_CHECK_COMMAND).to_json()?;
        let poll = self.inner.config.ready_poll_interval();
        let started = Instant::now();

        let ready = timeout(limit, async {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match self.attempt(&check).await {
                    Ok(response) if response.success => return Ok(()),
                    Ok(response) => {
                        debug!("server not ready yet: {:?}", response.error);
                    }
                    Err(ComputerError::ChannelClosed) => return Err(ComputerError::ChannelClosed),
                    Err(e) if attempts % 10 == 1 => {
                        debug!("waiting for {} (attempt {attempts}): {e}", self.endpoint());
                    }
                    Err(_) => {}
                }
                sleep(poll).await;
            }
        })
        .await;

        match ready {
            Ok(Ok(())) => {
                info!("{} ready after {:?}", self.endpoint(), started.elapsed());
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ComputerError::timeout(
                format!("computer server at {}", self.endpoint()),
                limit,
            )),
        }
    }

    /// Sends one command and returns its reply, waiting for a connection if
    /// needed. Transport failures are retried within the command budget, then
    /// reported as `CommandFailed`. A reply with `success: false` is returned
    /// as is. A force-close during the call ends it with `ChannelClosed`.
    pub async fn send(&self, request: Request) -> Result<Response> {
        if self.state() == ConnectionState::ForceClosed {
            return Err(ComputerError::ChannelClosed);
        }

        let payload = request.to_json()?;
        let payload = payload.as_str();
        let command = request.command.as_str();
        let policy = self.inner.config.command_policy();
        let sent = retry_if(
            &policy,
            move |attempt| async move {
                trace!("sending {command} (attempt {attempt})");
                self.attempt(payload).await.map_err(|e| {
                    warn!("command {command} failed on attempt {attempt}: {e}");
                    e
                })
            },
            |e: &ComputerError| !matches!(e, ComputerError::ChannelClosed),
        )
        .await;

        match sent {
            Ok(response) => Ok(response),
            Err(ComputerError::ChannelClosed) => Err(ComputerError::ChannelClosed),
            Err(e) => Err(ComputerError::command_failed(command, e)),
        }
    }

    /// Stops the keepalive task. When the server is shared with other
    /// clients the transport is left open; use
    /// [`force_close`](Self::force_close) to release it.
    pub async fn close(&self) {
        if self.state() == ConnectionState::ForceClosed {
            return;
        }
        if let Some(task) = self.inner.keepalive.lock().await.take() {
            task.abort();
        }
        if !self.inner.config.shared_server {
            if let Some(mut conn) = self.inner.conn.lock().await.take() {
                if let Err(e) = conn.close().await {
                    debug!("error closing transport: {e}");
                }
            }
        }
        self.inner.set_state(ConnectionState::Closed);
        debug!("closed channel to {}", self.endpoint());
    }

    /// Tears down the transport and background work unconditionally. The
    /// channel cannot be used afterwards.
    pub async fn force_close(&self) {
        self.inner.set_state(ConnectionState::ForceClosed);
        if let Some(task) = self.inner.keepalive.lock().await.take() {
            task.abort();
        }
        if let Some(mut conn) = self.inner.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                debug!("error closing transport: {e}");
            }
        }
        debug!("force-closed channel to {}", self.endpoint());
    }

    /// One request/response exchange, without retries.
    async fn attempt(&self, payload: &str) -> Result<Response> {
        self.connect().await?;
        self.wait_for_connection(self.inner.config.connection_wait())
            .await?;

        let mut slot = self.inner.conn.lock().await;
        let Some(conn) = slot.as_mut() else {
            return Err(ComputerError::Connection("connection lost".into()));
        };

        let limit = self.inner.config.command_timeout();
        match timeout(limit, conn.request(payload.to_string())).await {
            Ok(Ok(text)) => Response::from_json(&text),
            Ok(Err(e)) => {
                self.inner.discard(&mut slot, ConnectionState::Error);
                Err(e)
            }
            Err(_) => {
                self.inner.discard(&mut slot, ConnectionState::Error);
                Err(ComputerError::timeout("command response", limit))
            }
        }
    }

    async fn wait_for_connection(&self, limit: Duration) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let waited = timeout(
            limit,
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::ForceClosed)),
        )
        .await;

        match waited {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(Ok(_)) => Err(ComputerError::ChannelClosed),
            Ok(Err(_)) => Err(ComputerError::ChannelClosed),
            Err(_) => Err(ComputerError::Connection(format!(
                "not connected to {} after {limit:?}",
                self.endpoint()
            ))),
        }
    }
}

/// Keeps one transport alive until the channel is closed or dropped.
async fn keepalive(inner: Weak<Inner>) {
    let Some(config) = inner.upgrade().map(|i| i.config.clone()) else {
        return;
    };
    let mut backoff = config.reconnect_policy().backoff();
    let mut outage = ReconnectLog::new(config.log_every);
    let mut last_attempt: Option<Instant> = None;

    loop {
        let Some(this) = inner.upgrade() else { break };
        let state = this.state();
        if state.is_shut() {
            break;
        }

        if state == ConnectionState::Connected {
            let mut rx = this.state.subscribe();
            drop(this);
            tokio::select! {
                _ = sleep(config.ping_interval()) => {}
                _ = rx.wait_for(|s| *s != ConnectionState::Connected) => continue,
            }
            let Some(this) = inner.upgrade() else { break };
            check_liveness(&this, &config).await;
            continue;
        }

        if let Some(last) = last_attempt {
            sleep_until(last + config.min_reconnect_interval()).await;
        }
        last_attempt = Some(Instant::now());

        let endpoint = this.connector.endpoint();
        this.set_state(ConnectionState::Connecting);
        let opened = match timeout(config.connect_timeout(), this.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(ComputerError::timeout("connect", config.connect_timeout())),
        };

        match opened {
            Ok(conn) => {
                *this.conn.lock().await = Some(conn);
                this.set_state(ConnectionState::Connected);
                backoff.reset();
                match outage.recovered() {
                    Some(failures) => info!("connected to {endpoint} after {failures} failed attempts"),
                    None => debug!("connected to {endpoint}"),
                }
            }
            Err(e) => {
                this.set_state(ConnectionState::Error);
                this.set_state(ConnectionState::Disconnected);
                let delay = backoff.next_delay();
                let level = outage.failure();
                log!(
                    level,
                    "could not connect to {endpoint} (attempt {}): {e}; retrying in {delay:?}",
                    outage.failures()
                );
                drop(this);
                sleep(delay).await;
            }
        }
    }
    trace!("keepalive task finished");
}

async fn check_liveness(inner: &Inner, config: &ChannelConfig) {
    let mut slot = inner.conn.lock().await;
    let Some(conn) = slot.as_mut() else {
        if !inner.state().is_shut() {
            inner.set_state(ConnectionState::Disconnected);
        }
        return;
    };

    match timeout(config.ping_timeout(), conn.ping()).await {
        Ok(Ok(())) => trace!("pong from {}", inner.connector.endpoint()),
        Ok(Err(e)) => {
            warn!("ping to {} failed: {e}", inner.connector.endpoint());
            inner.discard(&mut slot, ConnectionState::Error);
        }
        Err(_) => {
            warn!(
                "no pong from {} within {:?}",
                inner.connector.endpoint(),
                config.ping_timeout()
            );
            inner.discard(&mut slot, ConnectionState::PingTimeout);
        }
    }
}
