//! Slot arena holding every client connection.
//!
//! Slot indices double as connection ids. A released slot stays in place
//! (so later ids do not move) until it becomes the tail, and the lowest
//! vacant slot is reused by the next connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use capyrelay_protocol::{Packet, ProtocolError};
use capyrelay_transfer::FileTransferSession;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::lock;
use crate::queue::OutboundQueue;

/// Index of a slot in the [`ConnectionTable`].
///
/// Only meaningful while the connection holding it is alive; ids are reused.
pub type ConnectionId = usize;

/// Per-slot state that survives reuse: the outbound queue and the
/// file transfer session, each behind its own lock.
#[derive(Debug, Default)]
pub(crate) struct SlotShared {
    outbound: OutboundQueue,
    transfer: Mutex<TransferSlot>,
}

#[derive(Debug, Default)]
struct TransferSlot {
    epoch: u64,
    session: Option<FileTransferSession>,
}

impl SlotShared {
    fn reset(&self, epoch: u64) {
        self.outbound.reset(epoch);
        let mut transfer = lock(&self.transfer);
        transfer.epoch = epoch;
        // Dropping the session closes its file.
        transfer.session = None;
    }
}

/// One reusable unit of per-client state.
struct ConnectionSlot<W> {
    active: bool,
    epoch: u64,
    transport: Option<Arc<tokio::sync::Mutex<W>>>,
    closed: CancellationToken,
    shared: Arc<SlotShared>,
}

/// Handle to one occupancy of a slot.
///
/// Cloneable. Every operation checks the occupancy epoch, so a handle kept
/// after its connection was released becomes inert instead of touching the
/// slot's next occupant.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    epoch: u64,
    shared: Arc<SlotShared>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Encodes `packet` and appends it to this connection's outbound queue.
    ///
    /// Returns `Ok(false)` if the connection has been released.
    pub fn enqueue(&self, packet: &Packet) -> Result<bool, ProtocolError> {
        let bytes = packet.encode()?;
        Ok(self.shared.outbound.push(self.epoch, bytes))
    }

    /// Number of packets waiting for delivery on this slot.
    pub fn pending(&self) -> usize {
        self.shared.outbound.len()
    }

    /// Returns `true` once the connection has been released.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn pop_outbound(&self) -> Option<Vec<u8>> {
        self.shared.outbound.pop(self.epoch)
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    /// Runs `f` against this connection's transfer session slot.
    ///
    /// Returns `None` without calling `f` if the connection has been released.
    pub(crate) fn with_transfer<T>(
        &self,
        f: impl FnOnce(&mut Option<FileTransferSession>) -> T,
    ) -> Option<T> {
        let mut transfer = lock(&self.shared.transfer);
        if transfer.epoch != self.epoch {
            return None;
        }
        Some(f(&mut transfer.session))
    }
}

/// Enqueue access to one active slot, handed out by
/// [`ConnectionTable::for_each_active`].
pub struct Outbound<'a> {
    epoch: u64,
    queue: &'a OutboundQueue,
}

impl Outbound<'_> {
    /// Appends an encoded packet. Never blocks on the network.
    pub fn push(&self, packet: Vec<u8>) -> bool {
        self.queue.push(self.epoch, packet)
    }
}

/// Snapshot of one active slot for the delivery loop.
pub(crate) struct DeliveryTarget<W> {
    pub(crate) id: ConnectionId,
    pub(crate) epoch: u64,
    pub(crate) shared: Arc<SlotShared>,
    pub(crate) transport: Arc<tokio::sync::Mutex<W>>,
    pub(crate) closed: CancellationToken,
}

impl<W> DeliveryTarget<W> {
    pub(crate) fn next_packet(&self) -> Option<Vec<u8>> {
        self.shared.outbound.pop(self.epoch)
    }
}

/// The authoritative collection of connection slots.
///
/// Structural changes ([`allocate`](Self::allocate) and
/// [`release`](Self::release)) happen under one table lock. Queues and
/// transfer sessions have their own finer-grained locks.
pub struct ConnectionTable<W> {
    slots: Mutex<Vec<ConnectionSlot<W>>>,
    next_epoch: AtomicU64,
    shutdown: CancellationToken,
}

impl<W> Default for ConnectionTable<W> {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl<W> ConnectionTable<W> {
    /// Creates an empty table. Cancelling `shutdown` closes every connection
    /// allocated from it.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            // Epoch 0 belongs to freshly created queues; never hand it out.
            next_epoch: AtomicU64::new(1),
            shutdown,
        }
    }

    fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// Binds `transport` to the lowest vacant slot, or a new one at the end.
    pub fn allocate(&self, transport: W) -> ConnectionHandle {
        let epoch = self.next_epoch();
        let closed = self.shutdown.child_token();
        let transport = Arc::new(tokio::sync::Mutex::new(transport));

        let mut slots = lock(&self.slots);
        let id = match slots.iter().position(|slot| !slot.active) {
            Some(id) => {
                let slot = &mut slots[id];
                slot.shared.reset(epoch);
                slot.active = true;
                slot.epoch = epoch;
                slot.transport = Some(transport);
                slot.closed = closed.clone();
                id
            }
            None => {
                let shared = Arc::new(SlotShared::default());
                shared.reset(epoch);
                slots.push(ConnectionSlot {
                    active: true,
                    epoch,
                    transport: Some(transport),
                    closed: closed.clone(),
                    shared,
                });
                slots.len() - 1
            }
        };

        ConnectionHandle {
            id,
            epoch,
            shared: Arc::clone(&slots[id].shared),
            closed,
        }
    }

    /// Marks a slot vacant and trims vacant slots off the tail.
    ///
    /// With `epoch`, only the matching occupancy is vacated. Returns the
    /// transport for the caller to close, or `None` if nothing changed.
    pub(crate) fn vacate(
        &self,
        id: ConnectionId,
        epoch: Option<u64>,
    ) -> Option<Arc<tokio::sync::Mutex<W>>> {
        let vacated_epoch = self.next_epoch();
        let mut slots = lock(&self.slots);

        let slot = slots.get_mut(id)?;
        if !slot.active || epoch.is_some_and(|e| e != slot.epoch) {
            return None;
        }

        slot.shared.reset(vacated_epoch);
        slot.epoch = vacated_epoch;
        slot.active = false;
        slot.closed.cancel();
        let transport = slot.transport.take();

        while slots.last().is_some_and(|slot| !slot.active) {
            slots.pop();
        }

        transport
    }

    /// Applies `f` to every active slot, in id order, under the table lock.
    ///
    /// `f` must only enqueue; it runs while allocation and release wait.
    pub fn for_each_active(&self, mut f: impl FnMut(ConnectionId, Outbound<'_>)) {
        let slots = lock(&self.slots);
        for (id, slot) in slots.iter().enumerate() {
            if !slot.active {
                continue;
            }
            f(
                id,
                Outbound {
                    epoch: slot.epoch,
                    queue: &slot.shared.outbound,
                },
            );
        }
    }

    /// Ids of all active connections, ascending.
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        lock(&self.slots)
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.active)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn is_active(&self, id: ConnectionId) -> bool {
        lock(&self.slots).get(id).is_some_and(|slot| slot.active)
    }

    /// Length of the slot sequence, vacant interior slots included.
    pub fn slot_count(&self) -> usize {
        lock(&self.slots).len()
    }

    pub(crate) fn delivery_targets(&self) -> Vec<DeliveryTarget<W>> {
        lock(&self.slots)
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                let transport = slot.transport.as_ref().filter(|_| slot.active)?;
                Some(DeliveryTarget {
                    id,
                    epoch: slot.epoch,
                    shared: Arc::clone(&slot.shared),
                    transport: Arc::clone(transport),
                    closed: slot.closed.clone(),
                })
            })
            .collect()
    }
}

impl<W: AsyncWrite + Unpin> ConnectionTable<W> {
    /// Releases slot `id`: drops pending packets and any transfer session,
    /// closes the transport, and marks the slot vacant.
    ///
    /// Releasing a vacant slot is a no-op. Returns `true` if a connection
    /// was released.
    pub async fn release(&self, id: ConnectionId) -> bool {
        match self.vacate(id, None) {
            Some(transport) => {
                close_transport(id, &transport).await;
                true
            }
            None => false,
        }
    }

    /// Releases the connection behind `handle`, unless its slot has already
    /// been released (and possibly reused).
    pub async fn release_connection(&self, handle: &ConnectionHandle) -> bool {
        match self.vacate(handle.id, Some(handle.epoch)) {
            Some(transport) => {
                close_transport(handle.id, &transport).await;
                true
            }
            None => false,
        }
    }

    /// Releases every active connection.
    pub async fn release_all(&self) {
        for id in self.active_ids() {
            self.release(id).await;
        }
    }
}

async fn close_transport<W: AsyncWrite + Unpin>(
    id: ConnectionId,
    transport: &tokio::sync::Mutex<W>,
) {
    let mut transport = transport.lock().await;
    if let Err(e) = transport.shutdown().await {
        debug!(id, error = %e, "transport shutdown failed");
    }
}
