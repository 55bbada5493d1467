//! Accept loop and per-connection wiring.
//!
//! Every accepted connection gets a generated socket id, a server-mode
//! channel, and a [`ServerEndpoint`] registered with the shared room
//! directory. The endpoint's pre-dispatch filter is installed before the
//! first frame is read, and a `Register` frame carrying the id is the first
//! thing the client receives.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use courier_core::channel::{event, Listeners};
use courier_core::{Channel, InterceptFn, RoomDirectory, ServerEndpoint};
use courier_protocol::Message;
use courier_transport::{TcpChannel, TcpConfig};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::metrics;

/// Counter keeping socket ids unique within one process.
static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a socket id for an accepted connection.
fn next_socket_id() -> String {
    let counter = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("sock_{:x}_{:x}", timestamp, counter)
}

/// The Courier server: accept loop plus the shared room directory.
pub struct Server {
    config: Config,
    directory: Arc<RoomDirectory>,
    listener: TcpListener,
}

impl Server {
    /// Bind the server to the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(addr).await?;
        info!("Courier server listening on {}", addr);

        let directory = Arc::new(RoomDirectory::with_config(config.directory_config()));
        Ok(Self {
            config,
            directory,
            listener,
        })
    }

    /// The address the server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Handle to the shared room directory.
    #[must_use]
    pub fn directory(&self) -> Arc<RoomDirectory> {
        Arc::clone(&self.directory)
    }

    /// Accept connections forever, handing each endpoint to `on_connection`.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn run<F>(self, on_connection: F) -> Result<()>
    where
        F: Fn(ServerEndpoint) + Send + Sync + 'static,
    {
        if self.config.metrics.enabled {
            if let Err(err) = metrics::start_metrics_server(self.config.metrics.port) {
                error!("Failed to start metrics server: {}", err);
            }
        }

        let on_connection = Arc::new(on_connection);
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!(%addr, "accepted connection");

            if let Err(err) = accept_socket(
                stream,
                self.config.channel_config(),
                Arc::clone(&self.directory),
                Arc::clone(&on_connection),
            ) {
                metrics::record_error("accept");
                error!(error = %err, "connection setup failed");
            }
        }
    }
}

/// Wire one accepted connection: channel, endpoint, registration.
fn accept_socket<F>(
    stream: TcpStream,
    channel_config: TcpConfig,
    directory: Arc<RoomDirectory>,
    on_connection: Arc<F>,
) -> Result<()>
where
    F: Fn(ServerEndpoint) + Send + Sync + 'static,
{
    let id = next_socket_id();
    let listeners = Arc::new(Listeners::new());
    let channel = TcpChannel::from_stream(stream, channel_config, Arc::clone(&listeners));
    let endpoint = ServerEndpoint::new(
        id.clone(),
        channel.clone(),
        Arc::clone(&directory),
        Arc::clone(&listeners),
    );

    directory.register(&id, channel.clone());

    // Unregister when the connection goes away.
    {
        let directory = Arc::clone(&directory);
        let socket_id = id.clone();
        listeners.on(event::CLOSE, move |_| {
            directory.unregister(&socket_id);
            metrics::record_disconnection();
            metrics::set_active_rooms(directory.stats().room_count);
        });
    }

    // Count every inbound frame at the edge, then route as usual.
    let route = endpoint.intercept();
    let intercept: InterceptFn = Arc::new(move |message| {
        metrics::record_frame(message.payload.len());
        route(message)
    });
    channel.start(intercept);

    channel.send(Message::register(id.as_bytes().to_vec()))?;
    metrics::record_connection();
    info!(socket = %id, "socket registered");

    on_connection(endpoint);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::{ClientEndpoint, ClientState, EmitOptions};
    use courier_transport::connect;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::config::MetricsConfig;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start_server<F>(on_connection: F) -> (SocketAddr, Arc<RoomDirectory>)
    where
        F: Fn(ServerEndpoint) + Send + Sync + 'static,
    {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            metrics: MetricsConfig {
                enabled: false,
                port: 0,
            },
            ..Config::default()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let directory = server.directory();
        tokio::spawn(async move {
            let _ = server.run(on_connection).await;
        });
        (addr, directory)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn capture(
        client: &courier_core::ClientEndpoint,
        event: &str,
    ) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        client.on(event, move |incoming| {
            tx.send(incoming.payload.clone()).ok();
        });
        rx
    }

    #[tokio::test]
    async fn test_register_assigns_id() {
        let (addr, directory) = start_server(|socket| {
            let responder = socket.clone();
            socket.on("hello", move |_| {
                responder.emit("welcome", b"hi there".to_vec()).ok();
            });
        })
        .await;

        let client = connect(addr, TcpConfig::default()).await.unwrap();
        let mut welcome_rx = capture(&client, "welcome");
        let id = timeout(WAIT, client.wait_connected()).await.unwrap();

        assert!(id.starts_with("sock_"));
        assert_eq!(client.id(), Some(id.clone()));
        assert!(directory.contains(&id));

        // A plain server-side emit addresses only this socket.
        client.emit("hello", Vec::new()).unwrap();
        let payload = timeout(WAIT, welcome_rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, b"hi there");
    }

    #[tokio::test]
    async fn test_room_emit_excludes_sender() {
        let (addr, directory) = start_server(|_| {}).await;

        let a = connect(addr, TcpConfig::default()).await.unwrap();
        let b = connect(addr, TcpConfig::default()).await.unwrap();
        timeout(WAIT, a.wait_connected()).await.unwrap();
        timeout(WAIT, b.wait_connected()).await.unwrap();

        let mut a_rx = capture(&a, "news");
        let mut b_rx = capture(&b, "news");

        a.join("kitchen").unwrap();
        b.join("kitchen").unwrap();
        let members = Arc::clone(&directory);
        wait_until(move || members.members("kitchen").len() == 2).await;

        a.emit_to("news", b"scoop", &EmitOptions::to_rooms(["kitchen"]))
            .unwrap();

        let payload = timeout(WAIT, b_rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, b"scoop");

        // The sender must not hear its own room emit.
        sleep(Duration::from_millis(100)).await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let (addr, directory) = start_server(|_| {}).await;

        let a = connect(addr, TcpConfig::default()).await.unwrap();
        let b = connect(addr, TcpConfig::default()).await.unwrap();
        let c = connect(addr, TcpConfig::default()).await.unwrap();
        timeout(WAIT, a.wait_connected()).await.unwrap();
        timeout(WAIT, b.wait_connected()).await.unwrap();
        timeout(WAIT, c.wait_connected()).await.unwrap();

        let sockets = Arc::clone(&directory);
        wait_until(move || sockets.stats().socket_count == 3).await;

        let mut a_rx = capture(&a, "notice");
        let mut b_rx = capture(&b, "notice");
        let mut c_rx = capture(&c, "notice");

        a.emit_to("notice", b"all hands", &EmitOptions::to_all())
            .unwrap();

        assert_eq!(
            timeout(WAIT, b_rx.recv()).await.unwrap().unwrap(),
            b"all hands"
        );
        assert_eq!(
            timeout(WAIT, c_rx.recv()).await.unwrap().unwrap(),
            b"all hands"
        );

        sleep(Duration::from_millis(100)).await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_socket_mode_includes_sender() {
        let (addr, _) = start_server(|_| {}).await;

        let a = connect(addr, TcpConfig::default()).await.unwrap();
        let b = connect(addr, TcpConfig::default()).await.unwrap();
        let a_id = timeout(WAIT, a.wait_connected()).await.unwrap();
        let b_id = timeout(WAIT, b.wait_connected()).await.unwrap();

        let mut a_rx = capture(&a, "direct");
        let mut b_rx = capture(&b, "direct");

        a.emit_to(
            "direct",
            b"both",
            &EmitOptions::to_sockets([a_id, b_id]),
        )
        .unwrap();

        // Socket-targeted emission does not exclude the sender.
        assert_eq!(timeout(WAIT, a_rx.recv()).await.unwrap().unwrap(), b"both");
        assert_eq!(timeout(WAIT, b_rx.recv()).await.unwrap().unwrap(), b"both");
    }

    #[tokio::test]
    async fn test_ack_round_trip_through_server() {
        let (addr, _) = start_server(|socket| {
            socket.on("ping", |incoming| {
                if let Some(reply) = &incoming.reply {
                    reply.send(b"pong".to_vec()).ok();
                }
            });
        })
        .await;

        let client = connect(addr, TcpConfig::default()).await.unwrap();
        timeout(WAIT, client.wait_connected()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .emit_with_ack(
                "ping",
                b"?".to_vec(),
                Box::new(move |payload| {
                    tx.send(payload).ok();
                }),
            )
            .unwrap();

        let payload = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, b"pong");
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let (addr, directory) = start_server(|_| {}).await;

        let a = connect(addr, TcpConfig::default()).await.unwrap();
        let b = connect(addr, TcpConfig::default()).await.unwrap();
        timeout(WAIT, a.wait_connected()).await.unwrap();
        let b_id = timeout(WAIT, b.wait_connected()).await.unwrap();

        let mut b_rx = capture(&b, "news");

        b.join("kitchen").unwrap();
        let joined = Arc::clone(&directory);
        wait_until(move || joined.members("kitchen").len() == 1).await;

        b.leave("kitchen").unwrap();
        let left = Arc::clone(&directory);
        wait_until(move || left.members("kitchen").is_empty()).await;

        a.emit_to("news", b"scoop", &EmitOptions::to_rooms(["kitchen"]))
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert!(b_rx.try_recv().is_err());
        assert!(directory.rooms_of(&b_id).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_socket() {
        let (addr, directory) = start_server(|_| {}).await;

        let state = Arc::new(ClientState::new());
        let channel = TcpChannel::connect(
            addr,
            TcpConfig::default(),
            Arc::clone(state.listeners()),
        )
        .await
        .unwrap();
        channel.start(state.intercept());
        let client = ClientEndpoint::new(channel.clone(), state);

        let id = timeout(WAIT, client.wait_connected()).await.unwrap();
        client.join("kitchen").unwrap();

        let joined = Arc::clone(&directory);
        wait_until(move || joined.members("kitchen").len() == 1).await;

        channel.close();

        let gone = Arc::clone(&directory);
        let socket_id = id.clone();
        wait_until(move || !gone.contains(&socket_id)).await;
        assert!(directory.members("kitchen").is_empty());
    }
}
