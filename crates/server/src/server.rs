//! Relay lifecycle: connection attach, accept loop, shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ServerError;
use crate::config::ServerConfig;
use crate::connection::read_pump;
use crate::delivery::DeliveryLoop;
use crate::dispatch::Dispatcher;
use crate::table::{ConnectionHandle, ConnectionId, ConnectionTable};

/// Relay server over any split byte stream. `W` is the write half type.
pub struct Relay<W> {
    config: ServerConfig,
    table: Arc<ConnectionTable<W>>,
    dispatcher: Arc<Dispatcher<W>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// The relay as served over TCP.
pub type TcpRelay = Relay<OwnedWriteHalf>;

impl<W: AsyncWrite + Unpin + Send + 'static> Relay<W> {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let table = Arc::new(ConnectionTable::new(cancel.child_token()));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&table),
            config.serve_root.clone(),
            config.effective_chunk_size(),
        ));

        Arc::new(Self {
            config,
            table,
            dispatcher,
            cancel,
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<ConnectionTable<W>> {
        &self.table
    }

    /// Ids of the currently connected clients.
    pub fn active_connections(&self) -> Vec<ConnectionId> {
        self.table.active_ids()
    }

    /// Registers a new client and spawns its inbound task.
    pub fn attach<R>(&self, reader: R, writer: W) -> ConnectionHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let conn = self.table.allocate(writer);
        info!(id = conn.id(), "client connected");

        tokio::spawn(read_pump(
            reader,
            conn.clone(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.table),
        ));
        conn
    }

    /// Spawns the delivery loop. It stops when the relay shuts down.
    pub fn spawn_delivery(&self) -> tokio::task::JoinHandle<()> {
        let delivery = DeliveryLoop::new(
            Arc::clone(&self.table),
            self.config.delivery_interval,
            self.config.packets_per_tick,
            self.config.write_timeout,
            self.cancel.child_token(),
        );
        tokio::spawn(delivery.run())
    }

    /// Stops accepting, stops delivery, and closes every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl TcpRelay {
    /// Binds the configured address and runs until [`shutdown`](Self::shutdown).
    pub async fn serve(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.run(listener).await
    }

    /// Accepts clients from `listener` until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!(%local_addr, root = %self.config.serve_root.display(), "relay listening");

        let delivery = self.spawn_delivery();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("relay shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                error!(%peer_addr, error = %e, "set_nodelay failed");
                            }
                            let (reader, writer) = stream.into_split();
                            let conn = self.attach(BufReader::new(reader), writer);
                            info!(id = conn.id(), %peer_addr, "accepted connection");
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        self.table.release_all().await;
        if let Err(e) = delivery.await {
            error!(error = %e, "delivery task failed");
        }
        Ok(())
    }

    /// Returns the bound address. Only available once [`run`](Self::run) has started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use capyrelay_protocol::{Packet, read_packet, write_packet};
    use tokio::io::{DuplexStream, WriteHalf};
    use tokio::net::TcpStream;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen: ([127, 0, 0, 1], 0).into(),
            delivery_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn wait_for_port(relay: &TcpRelay) -> u16 {
        for _ in 0..100 {
            let port = relay.port().await;
            if port > 0 {
                return port;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("relay never bound");
    }

    #[tokio::test]
    async fn relay_binds_dynamic_port() {
        let relay = TcpRelay::new(test_config());
        let relay2 = Arc::clone(&relay);
        let handle = tokio::spawn(async move { relay2.serve().await.unwrap() });

        let port = wait_for_port(&relay).await;
        assert!(port > 0, "should have bound to a dynamic port");
        assert!(relay.active_connections().is_empty());

        relay.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn accepted_client_is_released_on_disconnect() {
        let relay = TcpRelay::new(test_config());
        let relay2 = Arc::clone(&relay);
        let handle = tokio::spawn(async move { relay2.serve().await.unwrap() });
        let port = wait_for_port(&relay).await;

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        for _ in 0..100 {
            if relay.active_connections().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(relay.active_connections(), vec![0]);

        drop(stream);
        for _ in 0..100 {
            if relay.active_connections().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(relay.active_connections().is_empty());

        relay.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_connected_clients() {
        let relay = TcpRelay::new(test_config());
        let relay2 = Arc::clone(&relay);
        let handle = tokio::spawn(async move { relay2.serve().await.unwrap() });
        let port = wait_for_port(&relay).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        relay.shutdown();
        handle.await.unwrap();
        assert!(relay.active_connections().is_empty());

        let next = tokio::time::timeout(Duration::from_secs(2), read_packet(&mut stream))
            .await
            .unwrap();
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn attach_works_over_in_memory_streams() {
        type Writer = WriteHalf<DuplexStream>;
        let relay: Arc<Relay<Writer>> = Relay::new(test_config());
        let delivery = relay.spawn_delivery();

        let (a_server, mut a_client) = tokio::io::duplex(4096);
        let (a_read, a_write) = tokio::io::split(a_server);
        let (b_server, mut b_client) = tokio::io::duplex(4096);
        let (b_read, b_write) = tokio::io::split(b_server);

        let a = relay.attach(a_read, a_write);
        let b = relay.attach(b_read, b_write);
        assert_eq!((a.id(), b.id()), (0, 1));

        write_packet(&mut a_client, &Packet::ChatMessage("ping".into()))
            .await
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), read_packet(&mut b_client))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(Packet::ChatMessage("ping".into())));

        relay.shutdown();
        delivery.await.unwrap();
        assert!(a.is_closed() && b.is_closed());
    }

    #[tokio::test]
    async fn shutdown_completes_with_stalled_reader() {
        type Writer = WriteHalf<DuplexStream>;
        let relay: Arc<Relay<Writer>> = Relay::new(ServerConfig {
            write_timeout: Duration::from_secs(60),
            ..test_config()
        });
        let delivery = relay.spawn_delivery();

        // A never reads and its pipe cannot hold one chat packet.
        let (a_server, _a_client) = tokio::io::duplex(16);
        let (a_read, a_write) = tokio::io::split(a_server);
        let (b_server, mut b_client) = tokio::io::duplex(4096);
        let (b_read, b_write) = tokio::io::split(b_server);
        relay.attach(a_read, a_write);
        relay.attach(b_read, b_write);

        write_packet(&mut b_client, &Packet::ChatMessage("x".repeat(200)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        relay.shutdown();
        tokio::time::timeout(Duration::from_secs(2), delivery)
            .await
            .expect("delivery should stop")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), relay.table().release_all())
            .await
            .expect("release should not wait on the stalled write");
        assert!(relay.active_connections().is_empty());
    }
}
