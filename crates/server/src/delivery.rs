//! Single recurring task that writes queued packets to transports.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::table::{ConnectionTable, DeliveryTarget};

/// Drains every connection's outbound queue on a fixed period.
///
/// Each tick writes at most `packets_per_tick` packets per connection
/// (0 = everything queued), in queue order. Every write is bounded by
/// `write_timeout`. A connection whose write fails or times out is closed
/// and the remaining connections are still served. Cancelling `cancel`
/// abandons any write in flight.
pub struct DeliveryLoop<W> {
    table: Arc<ConnectionTable<W>>,
    interval: Duration,
    packets_per_tick: usize,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl<W: AsyncWrite + Unpin + Send + 'static> DeliveryLoop<W> {
    pub fn new(
        table: Arc<ConnectionTable<W>>,
        interval: Duration,
        packets_per_tick: usize,
        write_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            table,
            interval,
            packets_per_tick,
            write_timeout,
            cancel,
        }
    }

    /// Runs until the cancellation token fires.
    pub async fn run(self) {
        // A zero period panics in tokio.
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        debug!("delivery loop stopped");
    }

    /// Performs one delivery pass. Returns the number of packets written.
    pub async fn tick(&self) -> usize {
        let mut written = 0;
        for target in self.table.delivery_targets() {
            if self.cancel.is_cancelled() {
                break;
            }
            written += self.deliver(&target).await;
        }
        written
    }

    async fn deliver(&self, target: &DeliveryTarget<W>) -> usize {
        let mut written = 0;
        while self.packets_per_tick == 0 || written < self.packets_per_tick {
            let Some(packet) = target.next_packet() else {
                break;
            };

            // Dropping the write future releases the transport lock, so a
            // concurrent release can close the transport.
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = target.closed.cancelled() => break,
                result = tokio::time::timeout(
                    self.write_timeout,
                    write_bytes(&target.transport, &packet),
                ) => result,
            };

            match result {
                Ok(Ok(())) => written += 1,
                Ok(Err(e)) => {
                    warn!(id = target.id, error = %e, "failed to send packet, closing connection");
                    target.closed.cancel();
                    break;
                }
                Err(_) => {
                    warn!(
                        id = target.id,
                        timeout_ms = self.write_timeout.as_millis() as u64,
                        "send timed out, closing connection"
                    );
                    target.closed.cancel();
                    break;
                }
            }
        }
        written
    }
}

async fn write_bytes<W: AsyncWrite + Unpin>(
    transport: &tokio::sync::Mutex<W>,
    bytes: &[u8],
) -> std::io::Result<()> {
    let mut transport = transport.lock().await;
    transport.write_all(bytes).await?;
    transport.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use capyrelay_protocol::{Packet, read_packet};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type Writer = WriteHalf<DuplexStream>;

    fn connect(
        table: &ConnectionTable<Writer>,
    ) -> (crate::ConnectionHandle, ReadHalf<DuplexStream>) {
        connect_with_buffer(table, 64 * 1024)
    }

    fn connect_with_buffer(
        table: &ConnectionTable<Writer>,
        buffer: usize,
    ) -> (crate::ConnectionHandle, ReadHalf<DuplexStream>) {
        let (server, client) = tokio::io::duplex(buffer);
        let (_server_read, server_write) = tokio::io::split(server);
        let (client_read, _client_write) = tokio::io::split(client);
        (table.allocate(server_write), client_read)
    }

    fn delivery(
        table: &Arc<ConnectionTable<Writer>>,
        packets_per_tick: usize,
    ) -> DeliveryLoop<Writer> {
        DeliveryLoop::new(
            Arc::clone(table),
            Duration::from_millis(5),
            packets_per_tick,
            Duration::from_millis(50),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn one_packet_per_connection_per_tick() {
        let table = Arc::new(ConnectionTable::default());
        let (a, mut a_rx) = connect(&table);
        let (b, mut b_rx) = connect(&table);

        a.enqueue(&Packet::ChatMessage("a1".into())).unwrap();
        a.enqueue(&Packet::ChatMessage("a2".into())).unwrap();
        b.enqueue(&Packet::ChatMessage("b1".into())).unwrap();

        let delivery = delivery(&table, 1);
        assert_eq!(delivery.tick().await, 2);
        assert_eq!(a.pending(), 1);
        assert_eq!(b.pending(), 0);
        assert_eq!(delivery.tick().await, 1);
        assert_eq!(delivery.tick().await, 0);

        assert_eq!(
            read_packet(&mut a_rx).await.unwrap(),
            Some(Packet::ChatMessage("a1".into()))
        );
        assert_eq!(
            read_packet(&mut a_rx).await.unwrap(),
            Some(Packet::ChatMessage("a2".into()))
        );
        assert_eq!(
            read_packet(&mut b_rx).await.unwrap(),
            Some(Packet::ChatMessage("b1".into()))
        );
    }

    #[tokio::test]
    async fn zero_budget_drains_in_order() {
        let table = Arc::new(ConnectionTable::default());
        let (a, mut a_rx) = connect(&table);

        a.enqueue(&Packet::FileDataBuffer(vec![1, 2])).unwrap();
        a.enqueue(&Packet::FileTransferEndOfFile).unwrap();

        let delivery = delivery(&table, 0);
        assert_eq!(delivery.tick().await, 2);

        assert_eq!(
            read_packet(&mut a_rx).await.unwrap(),
            Some(Packet::FileDataBuffer(vec![1, 2]))
        );
        assert_eq!(
            read_packet(&mut a_rx).await.unwrap(),
            Some(Packet::FileTransferEndOfFile)
        );
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_other_connections() {
        let table = Arc::new(ConnectionTable::default());
        let (a, a_rx) = connect(&table);
        let (b, mut b_rx) = connect(&table);
        drop(a_rx);

        a.enqueue(&Packet::ChatMessage("lost".into())).unwrap();
        b.enqueue(&Packet::ChatMessage("kept".into())).unwrap();

        let delivery = delivery(&table, 1);
        assert_eq!(delivery.tick().await, 1);
        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert_eq!(
            read_packet(&mut b_rx).await.unwrap(),
            Some(Packet::ChatMessage("kept".into()))
        );
    }

    #[tokio::test]
    async fn stalled_reader_does_not_block_others() {
        let table = Arc::new(ConnectionTable::default());
        // A never reads and its pipe holds far less than one packet.
        let (a, _a_rx) = connect_with_buffer(&table, 16);
        let (b, mut b_rx) = connect(&table);

        a.enqueue(&Packet::ChatMessage("x".repeat(200))).unwrap();
        b.enqueue(&Packet::ChatMessage("for b".into())).unwrap();

        let delivery = delivery(&table, 1);
        let written = tokio::time::timeout(Duration::from_secs(2), delivery.tick())
            .await
            .expect("tick should finish despite the stalled reader");
        assert_eq!(written, 1);
        assert_eq!(b.pending(), 0);
        assert!(a.is_closed());
        assert_eq!(
            read_packet(&mut b_rx).await.unwrap(),
            Some(Packet::ChatMessage("for b".into()))
        );
    }

    #[tokio::test]
    async fn cancel_abandons_stalled_write() {
        let table = Arc::new(ConnectionTable::default());
        let (a, _a_rx) = connect_with_buffer(&table, 16);
        a.enqueue(&Packet::ChatMessage("x".repeat(200))).unwrap();

        let cancel = CancellationToken::new();
        let delivery = DeliveryLoop::new(
            Arc::clone(&table),
            Duration::from_millis(1),
            1,
            Duration::from_secs(60),
            cancel.clone(),
        );
        let handle = tokio::spawn(delivery.run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("delivery should stop")
            .unwrap();

        let released = tokio::time::timeout(Duration::from_secs(2), table.release(a.id()))
            .await
            .expect("release should not wait on the stalled write");
        assert!(released);
    }

    #[tokio::test]
    async fn release_interrupts_stalled_write() {
        let table = Arc::new(ConnectionTable::default());
        let (a, _a_rx) = connect_with_buffer(&table, 16);
        a.enqueue(&Packet::ChatMessage("x".repeat(200))).unwrap();

        let cancel = CancellationToken::new();
        let delivery = DeliveryLoop::new(
            Arc::clone(&table),
            Duration::from_millis(1),
            1,
            Duration::from_secs(60),
            cancel.clone(),
        );
        let handle = tokio::spawn(delivery.run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The delivery loop is still running and holds A's transport.
        let released = tokio::time::timeout(Duration::from_secs(2), table.release(a.id()))
            .await
            .expect("release should not wait on the stalled write");
        assert!(released);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let table: Arc<ConnectionTable<Writer>> = Arc::new(ConnectionTable::default());
        let cancel = CancellationToken::new();
        let delivery = DeliveryLoop::new(
            table,
            Duration::from_millis(1),
            1,
            Duration::from_secs(5),
            cancel.clone(),
        );
        let handle = tokio::spawn(delivery.run());
        cancel.cancel();
        handle.await.unwrap();
    }
}
