//! Bounded per-connection outbound message queue shared by Server-Sent-Events and WebSocket
//! clients.
//!
//! Each message tracks how many of its bytes were handed to the transport (`sent`) and how many
//! the transport has confirmed (`acked`).  Acknowledgements arrive in arbitrary amounts: they
//! are fed to the head of the queue and whatever exceeds the head message rolls over to the
//! next one.

use alloc::collections::VecDeque;

use crate::transport::Transport;

/// A message that can sit in a [`MessageQueue`].
pub trait QueuedMessage {
    /// Record `len` confirmed bytes, returning the surplus that belongs to later messages.
    fn ack(&mut self, len: usize) -> usize;

    /// All bytes of the message were confirmed.
    fn finished(&self) -> bool;

    /// All bytes of the message were handed to the transport.
    fn sent(&self) -> bool;

    /// Hand as many bytes as the transport takes right now.  Returns the number written.
    fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize;

    /// No frame of this message is partially on the wire.
    fn between_frames(&self) -> bool {
        true
    }
}

/// FIFO of outbound messages holding at most `capacity` entries.
#[derive(Debug)]
pub struct MessageQueue<M> {
    messages: VecDeque<M>,
    capacity: usize,
}

impl<M: QueuedMessage> MessageQueue<M> {
    /// An empty queue that holds up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
        }
    }

    /// Messages currently queued, including sent but unconfirmed ones.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// No queued messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The queue holds `capacity` messages.
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// Append a message.  A full queue hands the message back.
    pub fn enqueue(&mut self, message: M) -> Result<(), M> {
        if self.is_full() {
            error!("too many messages queued, dropping message");
            return Err(message);
        }
        self.messages.push_back(message);
        Ok(())
    }

    /// Feed `len` confirmed bytes to the queue head, popping messages as they finish.
    pub fn on_ack(&mut self, mut len: usize) {
        while len > 0 {
            let Some(head) = self.messages.front_mut() else {
                break;
            };
            let surplus = head.ack(len);
            if head.finished() {
                self.messages.pop_front();
            } else if surplus == len {
                // nothing of this message is in flight
                break;
            }
            len = surplus;
        }
    }

    /// Drop finished messages from the front of the queue.
    pub fn pop_finished(&mut self) {
        while self.messages.front().is_some_and(|m| m.finished()) {
            self.messages.pop_front();
        }
    }

    /// Send every queued message that has not been sent yet, in order, stopping at the first
    /// one the transport cannot fully take.  Returns the bytes written.
    pub fn send_pending<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
        self.pop_finished();

        let mut written = 0;
        for message in self.messages.iter_mut().filter(|m| !m.sent()) {
            written += message.send(transport);
            if !message.sent() {
                break;
            }
        }
        written
    }

    /// Head of the queue.
    pub fn front(&self) -> Option<&M> {
        self.messages.front()
    }

    /// Mutable head of the queue.
    pub fn front_mut(&mut self) -> Option<&mut M> {
        self.messages.front_mut()
    }

    /// Drop every queued message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::transport::testing::MockTransport;

    /// Minimal all-or-nothing message over a byte count.
    #[derive(Debug)]
    pub(crate) struct Counted {
        len: usize,
        sent: usize,
        acked: usize,
        finished_transitions: usize,
    }

    impl Counted {
        pub(crate) fn new(len: usize) -> Self {
            Self {
                len,
                sent: 0,
                acked: 0,
                finished_transitions: 0,
            }
        }
    }

    impl QueuedMessage for Counted {
        fn ack(&mut self, len: usize) -> usize {
            let was_finished = self.finished();
            let take = len.min(self.len - self.acked);
            self.acked += take;
            if !was_finished && self.finished() {
                self.finished_transitions += 1;
            }
            len - take
        }

        fn finished(&self) -> bool {
            self.acked == self.len
        }

        fn sent(&self) -> bool {
            self.sent == self.len
        }

        fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
            let remaining = self.len - self.sent;
            if transport.space() < remaining {
                return 0;
            }
            let written = transport.add(&std::vec![b'x'; remaining]);
            self.sent += written;
            written
        }
    }

    #[test]
    fn test_capacity_bound() {
        let mut q = MessageQueue::new(4);
        for _ in 0..4 {
            assert!(q.enqueue(Counted::new(10)).is_ok());
        }
        let rejected = q.enqueue(Counted::new(99));
        assert!(matches!(rejected, Err(Counted { len: 99, .. })));
        assert_eq!(q.len(), 4);
        assert!(q.is_full());
    }

    #[test]
    fn test_ack_rollover() {
        let mut q = MessageQueue::new(8);
        q.enqueue(Counted::new(10)).unwrap();
        q.enqueue(Counted::new(5)).unwrap();
        q.enqueue(Counted::new(7)).unwrap();

        let mut t = MockTransport::with_space(100);
        assert_eq!(q.send_pending(&mut t), 22);

        // partial acks that do not align with message boundaries
        let acks: Vec<usize> = std::vec![3, 4, 6, 2, 1];
        for a in acks {
            q.on_ack(a);
        }
        // 16 bytes confirmed: first message done, second done, third has 1 of 7
        assert_eq!(q.len(), 1);
        assert_eq!(q.front().unwrap().acked, 1);
        assert_eq!(q.front().unwrap().finished_transitions, 0);

        q.on_ack(6);
        assert!(q.is_empty());
    }

    #[test]
    fn test_finished_exactly_once() {
        let mut m = Counted::new(10);
        for a in [1, 2, 3, 4] {
            assert!(!m.finished());
            assert_eq!(m.ack(a), 0);
        }
        assert!(m.finished());
        assert_eq!(m.ack(5), 5);
        assert_eq!(m.finished_transitions, 1);
    }

    #[test]
    fn test_send_pending_keeps_order() {
        let mut q = MessageQueue::new(8);
        q.enqueue(Counted::new(10)).unwrap();
        q.enqueue(Counted::new(50)).unwrap();
        q.enqueue(Counted::new(5)).unwrap();

        let mut t = MockTransport::with_space(30);
        // second message does not fit, the third must not overtake it
        assert_eq!(q.send_pending(&mut t), 10);
        assert_eq!(t.written.len(), 10);

        t.space = 100;
        assert_eq!(q.send_pending(&mut t), 55);
    }
}
