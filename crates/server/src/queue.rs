//! Per-connection FIFO of encoded packets awaiting delivery.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::lock;

/// Ordered queue of fully-encoded outgoing packets for one slot.
///
/// The queue outlives any single connection: it is reset, not recreated,
/// when its slot is reused. Every reset moves the queue to a new epoch and
/// callers must present the epoch of the connection they act for, so a
/// handle left over from a previous occupant can neither add to nor take
/// from the current one's packets.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    inner: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    epoch: u64,
    packets: VecDeque<Vec<u8>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all pending packets and switches to `epoch`.
    pub(crate) fn reset(&self, epoch: u64) {
        let mut state = lock(&self.inner);
        state.epoch = epoch;
        state.packets.clear();
    }

    /// Appends a packet. Returns `false` if `epoch` is stale.
    pub fn push(&self, epoch: u64, packet: Vec<u8>) -> bool {
        let mut state = lock(&self.inner);
        if state.epoch != epoch {
            return false;
        }
        state.packets.push_back(packet);
        true
    }

    /// Removes the oldest packet. Returns `None` if empty or `epoch` is stale.
    pub fn pop(&self, epoch: u64) -> Option<Vec<u8>> {
        let mut state = lock(&self.inner);
        if state.epoch != epoch {
            return None;
        }
        state.packets.pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = OutboundQueue::new();
        queue.reset(1);
        assert!(queue.push(1, vec![1]));
        assert!(queue.push(1, vec![2]));
        assert!(queue.push(1, vec![3]));

        assert_eq!(queue.pop(1), Some(vec![1]));
        assert_eq!(queue.pop(1), Some(vec![2]));
        assert_eq!(queue.pop(1), Some(vec![3]));
        assert_eq!(queue.pop(1), None);
    }

    #[test]
    fn reset_clears_pending() {
        let queue = OutboundQueue::new();
        queue.reset(1);
        queue.push(1, vec![1]);
        queue.push(1, vec![2]);

        queue.reset(2);
        assert!(queue.is_empty());
        assert_eq!(queue.pop(2), None);
    }

    #[test]
    fn stale_epoch_is_refused() {
        let queue = OutboundQueue::new();
        queue.reset(1);
        queue.push(1, vec![1]);
        queue.reset(2);
        queue.push(2, vec![2]);

        assert!(!queue.push(1, vec![9]));
        assert_eq!(queue.pop(1), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(2), Some(vec![2]));
    }
}
