//! The boundary between the server engine and the TCP stack underneath it.
//!
//! The engine never blocks.  Before every write it asks the transport how much [`space`] is
//! available and never writes more than that; the remainder is produced again when the stack
//! reports progress through one of the [`Server`](crate::server::Server) callbacks
//! (`on_ack`, `on_poll`, ...).
//!
//! [`space`]: Transport::space

/// Non-blocking, buffered byte sink for a single TCP connection.
pub trait Transport {
    /// Bytes that can be accepted by [`add`](Transport::add) right now without blocking.
    fn space(&self) -> usize;

    /// Queue bytes for transmission, returning how many were accepted.  Implementations must
    /// accept at least `min(data.len(), self.space())` bytes.
    fn add(&mut self, data: &[u8]) -> usize;

    /// Push queued bytes onto the wire.  Returns false when nothing could be sent.
    fn send(&mut self) -> bool {
        true
    }

    /// Whether the connection is able to take more data at all.
    fn can_send(&self) -> bool;

    /// Close the connection.  `immediate` aborts without flushing queued data.
    fn close(&mut self, immediate: bool);

    /// Whether the connection is still open.
    fn connected(&self) -> bool;

    /// Queue and send.
    fn write(&mut self, data: &[u8]) -> usize {
        let written = self.add(data);
        if written > 0 && self.can_send() {
            self.send();
        }
        written
    }
}
