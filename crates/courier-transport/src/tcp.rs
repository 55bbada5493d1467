//! TCP implementation of the Courier channel.
//!
//! A [`TcpChannel`] owns one connection and its framing: length-prefixed
//! MessagePack in both directions, decoded into a read buffer. A single
//! driver task per channel multiplexes outbound messages and inbound reads;
//! every decoded inbound frame runs through the channel's pre-dispatch
//! filter before reaching user-level listeners.
//!
//! Client channels reconnect on a fixed interval and can queue outbound
//! messages while disconnected; server channels live exactly as long as the
//! accepted stream.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use courier_core::channel::{
    event, AckCallback, Channel, ChannelError, Dispatch, Incoming, InterceptFn, Listeners, Reply,
};
use courier_core::client::{ClientEndpoint, ClientState};
use courier_protocol::{codec, Message, MessageType, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace, warn};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No inbound traffic within the configured idle timeout.
    #[error("connection idle timeout")]
    IdleTimeout,

    /// Protocol error while framing.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// TCP channel configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Reconnect after the connection drops (client channels only).
    pub reconnect: bool,
    /// Interval between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Queue outbound messages while disconnected.
    pub use_queue: bool,
    /// Maximum queued messages; the oldest is dropped when full.
    pub queue_size: usize,
    /// Tear the connection down after this long without inbound traffic.
    pub idle_timeout: Option<Duration>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_interval: Duration::from_secs(1),
            use_queue: true,
            queue_size: usize::MAX,
            idle_timeout: None,
        }
    }
}

/// Which side of the connection this channel is.
#[derive(Debug, Clone, Copy)]
enum Peer {
    /// Dialing side; keeps the address for reconnection.
    Client(SocketAddr),
    /// Accepted side; lives exactly as long as its stream.
    Server,
}

/// A framed, bidirectional TCP channel.
pub struct TcpChannel {
    config: TcpConfig,
    peer: Peer,
    listeners: Arc<Listeners>,
    outbound: mpsc::UnboundedSender<Message>,
    /// Receiver half of `outbound`; taken by [`start`](Self::start).
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    /// Pre-dialed or accepted stream for the driver's first run.
    seed: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    /// Pending ack callbacks keyed by correlation id.
    pending: Mutex<HashMap<u64, AckCallback>>,
    /// Outbound messages held while disconnected.
    queue: Mutex<VecDeque<Message>>,
    next_id: AtomicU64,
    shutdown: Notify,
    closed: AtomicBool,
}

impl TcpChannel {
    fn new(peer: Peer, config: TcpConfig, listeners: Arc<Listeners>) -> Arc<Self> {
        let (outbound, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            peer,
            listeners,
            outbound,
            inbox: Mutex::new(Some(inbox)),
            seed: Mutex::new(None),
            connected: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Dial a client channel.
    ///
    /// The first connection is established before this returns; the driver
    /// spawned by [`start`](Self::start) handles everything after that,
    /// including reconnection when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial dial fails.
    pub async fn connect(
        addr: SocketAddr,
        config: TcpConfig,
        listeners: Arc<Listeners>,
    ) -> Result<Arc<Self>, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        debug!(%addr, "connected");

        let channel = Self::new(Peer::Client(addr), config, listeners);
        *channel.seed.lock().unwrap() = Some(stream);
        channel.connected.store(true, Ordering::SeqCst);
        Ok(channel)
    }

    /// Wrap an accepted server-side stream.
    ///
    /// Reconnection and queueing are disabled regardless of `config`:
    /// server channels never dial.
    #[must_use]
    pub fn from_stream(
        stream: TcpStream,
        config: TcpConfig,
        listeners: Arc<Listeners>,
    ) -> Arc<Self> {
        let config = TcpConfig {
            reconnect: false,
            use_queue: false,
            ..config
        };
        let channel = Self::new(Peer::Server, config, listeners);
        *channel.seed.lock().unwrap() = Some(stream);
        channel.connected.store(true, Ordering::SeqCst);
        channel
    }

    /// Install the pre-dispatch filter and spawn the connection driver.
    ///
    /// No inbound frame is read before this is called, so the filter sees
    /// every frame the connection ever delivers.
    pub fn start(self: &Arc<Self>, intercept: InterceptFn) {
        let Some(inbox) = self.inbox.lock().unwrap().take() else {
            warn!("channel driver already started");
            return;
        };

        let channel = Arc::clone(self);
        tokio::spawn(async move {
            channel.drive(inbox, intercept).await;
        });
    }

    /// Stop the driver and tear down the connection.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    async fn drive(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<Message>,
        intercept: InterceptFn,
    ) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }

            let seeded = self.seed.lock().unwrap().take();
            let stream = match seeded {
                Some(stream) => stream,
                None => {
                    let Peer::Client(addr) = self.peer else { break };
                    if !self.config.reconnect {
                        break;
                    }
                    sleep(self.config.reconnect_interval).await;
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            debug!(%addr, "reconnected");
                            stream
                        }
                        Err(err) => {
                            warn!(%addr, error = %err, "reconnect failed");
                            continue;
                        }
                    }
                }
            };

            self.connected.store(true, Ordering::SeqCst);
            self.flush_queue();

            let result = self.run_connection(stream, &mut inbox, &intercept).await;
            self.connected.store(false, Ordering::SeqCst);

            match result {
                Ok(()) => debug!("connection closed"),
                Err(err) => {
                    warn!(error = %err, "connection failed");
                    self.listeners
                        .raise(&Incoming::new(event::ERROR, err.to_string().into_bytes()));
                }
            }
            self.listeners.raise(&Incoming::new(event::CLOSE, Vec::new()));
        }

        self.connected.store(false, Ordering::SeqCst);
    }

    async fn run_connection(
        &self,
        stream: TcpStream,
        inbox: &mut mpsc::UnboundedReceiver<Message>,
        intercept: &InterceptFn,
    ) -> Result<(), TransportError> {
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = BytesMut::with_capacity(4096);
        let mut deadline = self.config.idle_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            tokio::select! {
                () = self.shutdown.notified() => return Ok(()),

                outgoing = inbox.recv() => {
                    let Some(message) = outgoing else { return Ok(()) };
                    let data = codec::encode(&message)?;
                    writer.write_all(&data).await?;
                }

                read = reader.read_buf(&mut buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                    if let Some(timeout) = self.config.idle_timeout {
                        deadline = Some(Instant::now() + timeout);
                    }
                    while let Some(message) = codec::decode_from(&mut buf)? {
                        self.handle_inbound(message, intercept);
                    }
                }

                () = idle(deadline) => return Err(TransportError::IdleTimeout),
            }
        }
    }

    /// Dispatch one decoded inbound frame.
    ///
    /// Acks resolve their pending callback before interception; everything
    /// else runs through the filter, and unclaimed frames are delivered to
    /// user-level listeners.
    fn handle_inbound(&self, message: Message, intercept: &InterceptFn) {
        if message.message_type == MessageType::Ack {
            let callback = self.pending.lock().unwrap().remove(&message.id);
            match callback {
                Some(callback) => callback(message.payload),
                None => debug!(id = message.id, "ack with no pending callback"),
            }
            return;
        }

        if intercept(&message) == Dispatch::Handled {
            trace!(mt = ?message.message_type, "frame intercepted");
            return;
        }

        let reply = (message.message_type == MessageType::DataWithAck)
            .then(|| Reply::new(self.outbound.clone(), message.id));

        let mut incoming = Incoming::new(message.address, message.payload);
        if let Some(reply) = reply {
            incoming = incoming.with_reply(reply);
        }
        self.listeners.raise(&incoming);
    }

    fn flush_queue(&self) {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            return;
        }
        debug!(queued = queue.len(), "flushing outbound queue");
        for message in queue.drain(..) {
            if self.outbound.send(message).is_err() {
                break;
            }
        }
    }

    fn enqueue(&self, message: Message) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        if self.is_connected() {
            self.outbound.send(message).map_err(|_| ChannelError::Closed)
        } else if self.config.use_queue {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.config.queue_size {
                queue.pop_front();
            }
            queue.push_back(message);
            Ok(())
        } else {
            Err(ChannelError::Closed)
        }
    }
}

impl Channel for TcpChannel {
    fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.enqueue(message)
    }

    fn send_with_ack(&self, mut message: Message, ack: AckCallback) -> Result<(), ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        message.id = id;
        self.pending.lock().unwrap().insert(id, ack);

        if let Err(err) = self.enqueue(message) {
            self.pending.lock().unwrap().remove(&id);
            return Err(err);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn idle(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Connect a client endpoint over TCP.
///
/// Dials the server, installs the client's registration filter, and spawns
/// the connection driver. The returned endpoint is usable immediately;
/// [`ClientEndpoint::wait_connected`] resolves once the server assigns an
/// id.
///
/// # Errors
///
/// Returns an error if the initial dial fails.
pub async fn connect(addr: SocketAddr, config: TcpConfig) -> Result<ClientEndpoint, TransportError> {
    let state = Arc::new(ClientState::new());
    let channel = TcpChannel::connect(addr, config, Arc::clone(state.listeners())).await?;
    channel.start(state.intercept());
    Ok(ClientEndpoint::new(channel, state))
}
