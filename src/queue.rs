//! In-flight message pool for the simulated cluster.
//!
//! Messages are grouped per (sender, receiver) pair and kept FIFO within
//! a pair: the scheduler may interleave pairs any way it likes, but
//! earlier enqueues on a pair are always delivered before later ones.
//! `BTreeMap` keys give deterministic iteration order.

use crate::trace::NodeId;
use raft::eraftpb::Message;
use std::collections::{BTreeMap, VecDeque};

/// Per-simulation pool of undelivered consensus messages, addressable by
/// (sender, receiver, index).
#[derive(Debug, Default)]
pub struct MessageQueue {
    queues: BTreeMap<(NodeId, NodeId), VecDeque<Message>>,
}

impl MessageQueue {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an outbound message under its (from, to) pair.
    pub fn push(&mut self, msg: Message) {
        let key = (msg.from, msg.to);
        self.queues.entry(key).or_default().push_back(msg);
    }

    /// Removes and returns the `index`-th queued message from `from` to
    /// `to`. Returns `None` (a no-op for the caller) when no such entry
    /// exists.
    pub fn take(&mut self, from: NodeId, to: NodeId, index: usize) -> Option<Message> {
        let queue = self.queues.get_mut(&(from, to))?;
        let msg = queue.remove(index)?;
        if queue.is_empty() {
            self.queues.remove(&(from, to));
        }
        Some(msg)
    }

    /// Number of queued messages from `from` to `to`.
    pub fn pending(&self, from: NodeId, to: NodeId) -> usize {
        self.queues.get(&(from, to)).map_or(0, VecDeque::len)
    }

    /// Senders with at least one message queued to `to`, in ascending
    /// sender order, with their counts.
    pub fn senders_to(&self, to: NodeId) -> Vec<(NodeId, usize)> {
        self.queues
            .iter()
            .filter(|((_, t), q)| *t == to && !q.is_empty())
            .map(|((f, _), q)| (*f, q.len()))
            .collect()
    }

    /// Drops every queued message whose sender is `node`.
    pub fn drop_outbound(&mut self, node: NodeId) {
        self.queues.retain(|(from, _), _| *from != node);
    }

    /// Total number of in-flight messages.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// True if no messages are in flight.
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    /// Discards all in-flight messages.
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: NodeId, to: NodeId, index: u64) -> Message {
        let mut m = Message::default();
        m.from = from;
        m.to = to;
        m.index = index;
        m
    }

    #[test]
    fn fifo_within_a_pair() {
        let mut queue = MessageQueue::new();
        queue.push(msg(1, 2, 10));
        queue.push(msg(1, 2, 11));

        assert_eq!(queue.pending(1, 2), 2);
        assert_eq!(queue.take(1, 2, 0).unwrap().index, 10);
        assert_eq!(queue.take(1, 2, 0).unwrap().index, 11);
        assert!(queue.is_empty());
    }

    #[test]
    fn take_missing_entry_is_none() {
        let mut queue = MessageQueue::new();
        queue.push(msg(1, 2, 1));

        assert!(queue.take(2, 1, 0).is_none());
        assert!(queue.take(1, 2, 5).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn senders_are_reported_in_ascending_order() {
        let mut queue = MessageQueue::new();
        queue.push(msg(3, 1, 0));
        queue.push(msg(2, 1, 0));
        queue.push(msg(2, 1, 1));
        queue.push(msg(3, 2, 0));

        assert_eq!(queue.senders_to(1), vec![(2, 2), (3, 1)]);
    }

    #[test]
    fn drop_outbound_removes_only_that_sender() {
        let mut queue = MessageQueue::new();
        queue.push(msg(1, 2, 0));
        queue.push(msg(2, 1, 0));
        queue.push(msg(1, 3, 0));

        queue.drop_outbound(1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending(2, 1), 1);
    }
}
