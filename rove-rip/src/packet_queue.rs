//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::warn;

use crate::network::SendDestination;
use crate::version::Version;

// Default bound on the number of packets buffered per port.
const DEFAULT_CAPACITY: usize = 64;

// One encoded packet waiting for transmission.
#[derive(Debug)]
pub struct QueuedPacket<V: Version> {
    pub dst: SendDestination<V::SocketAddr>,
    pub pdu: V::Pdu,
    pub buf: Bytes,
}

// Bounded FIFO of outbound wire packets.
//
// The head packet stays queued until its transmission completes, so packets
// leave the wire in enqueue order. On overflow the whole backlog is dropped
// at once; a transmit path that slow won't be saved by a longer queue.
#[derive(Debug)]
pub struct PacketQueue<V: Version> {
    queue: VecDeque<QueuedPacket<V>>,
    capacity: usize,
    drops: u64,
}

// ===== impl PacketQueue =====

impl<V> PacketQueue<V>
where
    V: Version,
{
    pub fn new() -> PacketQueue<V> {
        PacketQueue {
            queue: VecDeque::new(),
            capacity: DEFAULT_CAPACITY,
            drops: 0,
        }
    }

    pub fn enqueue(&mut self, packet: QueuedPacket<V>) {
        if self.queue.len() >= self.capacity {
            let dropped = self.queue.len();
            warn!(%dropped, "packet queue overflow, flushing backlog");
            self.flush();
            self.drops += dropped as u64;
        }
        self.queue.push_back(packet);
    }

    pub fn head(&self) -> Option<&QueuedPacket<V>> {
        self.queue.front()
    }

    pub fn pop_head(&mut self) -> Option<QueuedPacket<V>> {
        self.queue.pop_front()
    }

    pub fn flush(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }
}

impl<V> Default for PacketQueue<V>
where
    V: Version,
{
    fn default() -> PacketQueue<V> {
        PacketQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Command, PduVersion};
    use crate::version::Ripv2;

    fn packet(seq: u8) -> QueuedPacket<Ripv2> {
        QueuedPacket {
            dst: SendDestination::Multicast(1),
            pdu: <Ripv2 as Version>::Pdu::new(Command::Response, vec![]),
            buf: Bytes::copy_from_slice(&[seq]),
        }
    }

    #[test]
    fn fifo_order() {
        let mut queue = PacketQueue::<Ripv2>::new();
        queue.enqueue(packet(1));
        queue.enqueue(packet(2));

        assert_eq!(queue.head().unwrap().buf[0], 1);
        assert_eq!(queue.pop_head().unwrap().buf[0], 1);
        assert_eq!(queue.pop_head().unwrap().buf[0], 2);
        assert!(queue.pop_head().is_none());
    }

    #[test]
    fn overflow_flushes_backlog() {
        let mut queue = PacketQueue::<Ripv2>::new();
        for seq in 0..DEFAULT_CAPACITY {
            queue.enqueue(packet(seq as u8));
        }
        assert_eq!(queue.len(), DEFAULT_CAPACITY);

        // The packet that overflows the queue survives; the backlog is
        // accounted as dropped.
        queue.enqueue(packet(0xFF));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.head().unwrap().buf[0], 0xFF);
        assert_eq!(queue.drops(), DEFAULT_CAPACITY as u64);
    }
}
