use crate::connection::outbox::{Outbox, OutboxReceiver};
use crate::protocol::{recv_message, Message, OutgoingMessage, ProtocolError, DEFAULT_EXTRA_DATA_TIMEOUT};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Consecutive bad messages after which the connection is dropped
pub const MAX_CONSECUTIVE_BAD_MESSAGES: u32 = 5;

/// How long without a message before the connection is assumed dead
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Watchdog timeout, also bounds the connect attempt
    pub timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_consecutive_bad_messages: u32,
    pub extra_data_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_consecutive_bad_messages: MAX_CONSECUTIVE_BAD_MESSAGES,
            extra_data_timeout: DEFAULT_EXTRA_DATA_TIMEOUT,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Receives everything a connection produces
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_message(&self, message: Message);

    /// Called when the connection comes up or goes down
    fn on_connection_state(&self, connected: bool);
}

/// Why serving a connection stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeOutcome {
    ConnectFailed,
    Eof,
    Lost,
    /// Too many bad messages in a row; reconnect without waiting
    BadMessages,
    WatchdogExpired,
    Closed,
}

/// Keeps a TCP connection to one satellite alive
pub struct ConnectionManager {
    config: ConnectionConfig,
    handler: Arc<dyn ConnectionHandler>,
    outbox: Outbox,
    outbox_rx: tokio::sync::Mutex<OutboxReceiver>,
    connected: AtomicBool,
    connects: AtomicU64,
    last_message: Mutex<Instant>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Create a manager that sends whatever is queued on the `outbox`
    /// matching `outbox_rx`
    pub fn new(
        config: ConnectionConfig,
        handler: Arc<dyn ConnectionHandler>,
        outbox: Outbox,
        outbox_rx: OutboxReceiver,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            handler,
            outbox,
            outbox_rx: tokio::sync::Mutex::new(outbox_rx),
            connected: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            last_message: Mutex::new(Instant::now()),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of successful connects so far
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Queue a message for the satellite, never blocks
    pub fn send_enqueue(&self, message: OutgoingMessage) {
        self.outbox.send(message);
    }

    /// Request shutdown; [`run`](Self::run) returns once the socket is closed
    pub fn close(&self) {
        debug!("Closing connection manager for {}", self.config.addr());
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run the connect, serve, reconnect loop until closed
    pub async fn run(&self) {
        let addr = self.config.addr();
        info!("Starting network tasks for {}", addr);

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut outbox = self.outbox_rx.lock().await;

        while !*shutdown.borrow() {
            let outcome = tokio::select! {
                outcome = self.connect_and_serve(&mut outbox) => outcome,
                _ = shutdown.wait_for(|closed| *closed) => ServeOutcome::Closed,
            };
            self.set_connected(false);

            match outcome {
                ServeOutcome::Closed => break,
                ServeOutcome::BadMessages => {
                    error!("Reached threshold for consecutive bad messages; reconnecting");
                    continue;
                }
                other => debug!("Connection to {} ended: {:?}", addr, other),
            }

            warn!("Disconnected from {}; will reconnect", addr);
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.wait_for(|closed| *closed) => break,
            }
        }

        outbox.close();
        info!("Shutting down connection to {}", addr);
    }

    async fn connect_and_serve(&self, outbox: &mut OutboxReceiver) -> ServeOutcome {
        let addr = self.config.addr();
        debug!("Trying connection to {}", addr);

        let connect = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let stream = match timeout(self.config.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Encountered an error trying to connect to {}: {}", addr, e);
                return ServeOutcome::ConnectFailed;
            }
            Err(_) => {
                error!("Timed out trying to connect to {}", addr);
                return ServeOutcome::ConnectFailed;
            }
        };

        debug!("Connected to {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        *self.last_message.lock() = Instant::now();
        self.set_connected(true);

        let (read_half, write_half) = stream.into_split();
        self.serve(BufReader::new(read_half), write_half, outbox).await
    }

    // Reader, writer and watchdog race; whichever stops first ends the session
    async fn serve<R, W>(&self, reader: R, writer: W, outbox: &mut OutboxReceiver) -> ServeOutcome
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let read_loop = async {
            let mut reader = reader;
            let mut bad_messages = 0;
            loop {
                match recv_message(&mut reader, self.config.extra_data_timeout).await {
                    Ok(Some(message)) => {
                        bad_messages = 0;
                        *self.last_message.lock() = Instant::now();
                        self.handler.on_message(message).await;
                    }
                    Ok(None) => {
                        debug!("Got EOF");
                        return ServeOutcome::Eof;
                    }
                    Err(ProtocolError::BadMessage(e)) => {
                        error!("Bad message from {}: {}", self.config.host, e);
                        bad_messages += 1;
                        if bad_messages >= self.config.max_consecutive_bad_messages {
                            return ServeOutcome::BadMessages;
                        }
                    }
                    Err(ProtocolError::Io(e)) => {
                        warn!("Connection to {} lost: {}", self.config.addr(), e);
                        return ServeOutcome::Lost;
                    }
                }
            }
        };

        let send_loop = async {
            let mut writer = writer;
            while let Some(message) = outbox.recv().await {
                debug!("Sending from queue: `{}`", message);
                let written = async {
                    writer.write_all(&message.encode()).await?;
                    writer.flush().await
                };
                if let Err(e) = written.await {
                    error!("Failed to send to {}: {}", self.config.addr(), e);
                    return ServeOutcome::Lost;
                }
            }
            ServeOutcome::Closed
        };

        let watchdog = async {
            loop {
                let deadline = *self.last_message.lock() + self.config.timeout;
                tokio::time::sleep_until(deadline).await;

                let age = self.last_message.lock().elapsed();
                if age >= self.config.timeout {
                    warn!(
                        "Last message from {} is {} seconds old. Assuming connection is dead",
                        self.config.host,
                        age.as_secs()
                    );
                    return ServeOutcome::WatchdogExpired;
                }
            }
        };

        tokio::select! {
            outcome = read_loop => outcome,
            outcome = send_loop => outcome,
            outcome = watchdog => outcome,
        }
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            debug!("Connection to {} is now {}", self.config.addr(), if connected { "up" } else { "down" });
            self.handler.on_connection_state(connected);
        }
    }
}
