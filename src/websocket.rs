//! A websocket is an HTTP connection that is "upgraded" to a WebSocket.  Which basically
//! implies taking the underlying client connection (e.g. TCP connection) and re-purposing it to
//! carry a WebSocket session.  Once upgraded, it cannot be downgraded.
//!
//! A [`WebSocket`] answers the upgrade handshake for one URL and, once the `101` head is
//! acknowledged, adopts the connection as a [`WebSocketClient`].  Everything the peer sends is
//! reported through the [`on_event`](WebSocket::on_event) callback as it arrives, a frame
//! possibly in several [`WsEvent::Data`] pieces.
//!
//! ```
//! use httplite_async::websocket::{WebSocket, WsEvent};
//! # use httplite_async::transport::Transport;
//! # fn demo<T: Transport + 'static>(ws: WebSocket<T>) {
//! ws.on_event(|ws, id, event| {
//!     if let WsEvent::Data { info, data } = event {
//!         if info.index + data.len() == info.len && info.is_final {
//!             ws.text(id, "got it");
//!         }
//!     }
//! });
//! # }
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::ascii::atoi;
use crate::buffer::ByteBufferChunk;
use crate::config::WS_MAX_QUEUED_MESSAGES;
use crate::frame::{FrameError, FrameHeader, MAX_HEADER_LEN, Opcode, sec_websocket_accept_val};
use crate::handler::RequestHandler;
use crate::header::{
    REQ_HEAD_CONNECTION, REQ_HEAD_ORIGIN, REQ_HEAD_SEC_WEBSOCKET_KEY,
    REQ_HEAD_SEC_WEBSOCKET_PROTOCOL, REQ_HEAD_SEC_WEBSOCKET_VERSION, REQ_HEAD_UPGRADE,
    RESP_HEAD_CONNECTION, RESP_HEAD_SEC_WEBSOCKET_ACCEPT, RESP_HEAD_SEC_WEBSOCKET_PROTOCOL,
    RESP_HEAD_SEC_WEBSOCKET_VERSION, RESP_HEAD_UPGRADE,
};
use crate::queue::{MessageQueue, QueuedMessage};
use crate::request::{ConnectionType, Method, Request};
use crate::response::{Response, StatusCode};
use crate::server::ConnectionId;
use crate::transport::Transport;

/// Payload of the pings sent to keep idle connections open.  Pongs echoing it are not reported.
const KEEPALIVE_PAYLOAD: &[u8] = b"httplite-keepalive";
/// Room kept free in the transport for a frame header.
const FRAME_OVERHEAD: usize = 8;
/// Largest payload sent in one outbound frame.
const MAX_FRAME_PAYLOAD: usize = 0xFFFF;

/// Called with every event of every client: the endpoint, the client and the event.
pub type EventCallback<T> = Box<dyn FnMut(&WebSocket<T>, ConnectionId, WsEvent<'_>)>;

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientStatus {
    /// Closed
    Disconnected,
    /// Open
    Connected,
    /// A close frame was sent or received and the handshake is finishing
    Disconnecting,
}

/// Describes the frame a [`WsEvent::Data`] piece belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Opcode of the message: text or binary, also for its continuation frames.
    pub message_opcode: Opcode,
    /// Frame number within a fragmented message, starting at 0.
    pub num: u32,
    /// Last frame of the message.
    pub is_final: bool,
    /// The peer masked the frame.
    pub masked: bool,
    /// Opcode of this frame.
    pub opcode: Opcode,
    /// Payload length of this frame.
    pub len: usize,
    /// Offset of the piece within the frame payload.
    pub index: usize,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            message_opcode: Opcode::Text,
            num: 0,
            is_final: true,
            masked: false,
            opcode: Opcode::Text,
            len: 0,
            index: 0,
        }
    }
}

/// Something that happened on a client connection.
#[derive(Debug, PartialEq, Eq)]
pub enum WsEvent<'a> {
    /// The client was adopted.
    Connect,
    /// The connection went away.
    Disconnect,
    /// The peer answered a ping.
    Pong(&'a [u8]),
    /// The peer closed with an error code (above 1001).
    Error {
        /// Close code
        code: u16,
        /// Close reason
        reason: &'a str,
    },
    /// A piece of a text or binary frame.
    Data {
        /// The frame the piece belongs to
        info: &'a FrameInfo,
        /// Unmasked payload bytes
        data: &'a [u8],
    },
}

enum Emitted {
    Connect,
    Disconnect,
    Pong(Vec<u8>),
    Error { code: u16, reason: String },
    Data { info: FrameInfo, data: Vec<u8> },
}

impl Emitted {
    fn as_event(&self) -> WsEvent<'_> {
        match self {
            Emitted::Connect => WsEvent::Connect,
            Emitted::Disconnect => WsEvent::Disconnect,
            Emitted::Pong(data) => WsEvent::Pong(data),
            Emitted::Error { code, reason } => WsEvent::Error {
                code: *code,
                reason,
            },
            Emitted::Data { info, data } => WsEvent::Data { info, data },
        }
    }
}

fn frame_window<T: Transport + ?Sized>(transport: &T) -> usize {
    if !transport.can_send() {
        return 0;
    }
    transport.space().saturating_sub(FRAME_OVERHEAD)
}

/// Write one unmasked frame whole.  `None` when it does not fit.
fn send_frame<T: Transport + ?Sized>(
    transport: &mut T,
    fin: bool,
    opcode: Opcode,
    data: &[u8],
) -> Option<usize> {
    let header = FrameHeader {
        fin,
        opcode,
        len: data.len(),
        mask: None,
    };
    let mut head = [0u8; MAX_HEADER_LEN];
    let head_len = header.encode(&mut head).ok()?;
    if transport.space() < head_len + data.len() {
        return None;
    }

    let mut out = Vec::with_capacity(head_len + data.len());
    out.extend_from_slice(&head[..head_len]);
    out.extend_from_slice(data);
    let written = transport.add(&out);
    if transport.can_send() {
        transport.send();
    }
    Some(written)
}

struct ControlFrame {
    opcode: Opcode,
    data: Vec<u8>,
    sent: bool,
    acked: usize,
}

impl ControlFrame {
    fn new(opcode: Opcode, data: &[u8]) -> Self {
        Self {
            opcode,
            data: data[..data.len().min(125)].to_vec(),
            sent: false,
            acked: 0,
        }
    }

    fn len(&self) -> usize {
        self.data.len() + 2
    }

    /// Record confirmed bytes, returning the surplus that belongs to data frames behind it.
    fn ack(&mut self, len: usize) -> usize {
        let take = len.min(self.len() - self.acked);
        self.acked += take;
        len - take
    }

    fn finished(&self) -> bool {
        self.sent && self.acked == self.len()
    }

    fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
        match send_frame(transport, true, self.opcode, &self.data) {
            Some(n) => {
                self.sent = true;
                n
            }
            None => 0,
        }
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Owned(Vec<u8>),
    Shared(ByteBufferChunk),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Owned(v) => v.len(),
            Payload::Shared(b) => b.len(),
        }
    }
}

/// An outbound text or binary message, sent one frame at a time.  The next frame only goes
/// out once the previous one is acknowledged.
#[derive(Debug)]
pub(crate) struct WsMessage {
    opcode: Opcode,
    payload: Payload,
    started: bool,
    sent: usize,
    ack: usize,
    acked: usize,
}

impl WsMessage {
    fn new(opcode: Opcode, payload: Payload) -> Self {
        Self {
            opcode,
            payload,
            started: false,
            sent: 0,
            ack: 0,
            acked: 0,
        }
    }
}

impl QueuedMessage for WsMessage {
    fn ack(&mut self, len: usize) -> usize {
        let take = len.min(self.ack - self.acked);
        self.acked += take;
        len - take
    }

    fn finished(&self) -> bool {
        self.sent() && self.acked == self.ack
    }

    fn sent(&self) -> bool {
        self.started && self.sent == self.payload.len()
    }

    fn between_frames(&self) -> bool {
        self.acked == self.ack
    }

    fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
        if !self.between_frames() || self.sent() {
            return 0;
        }
        let window = frame_window(transport);
        if window == 0 {
            return 0;
        }

        let total = self.payload.len();
        let to_send = (total - self.sent).min(window).min(MAX_FRAME_PAYLOAD);
        let fin = self.sent + to_send == total;
        let opcode = if self.started {
            Opcode::Continuation
        } else {
            self.opcode
        };
        let range = self.sent..self.sent + to_send;
        let written = match &self.payload {
            Payload::Owned(v) => send_frame(transport, fin, opcode, &v[range]),
            Payload::Shared(b) => send_frame(transport, fin, opcode, &b.data()[range]),
        };
        let Some(written) = written else {
            return 0;
        };

        self.started = true;
        self.sent += to_send;
        self.ack += written;
        written
    }
}

struct FrameReader {
    head: [u8; MAX_HEADER_LEN],
    head_len: usize,
    frame: Option<FrameHeader>,
    index: usize,
    control: Vec<u8>,
    info: FrameInfo,
}

impl FrameReader {
    fn new() -> Self {
        Self {
            head: [0; MAX_HEADER_LEN],
            head_len: 0,
            frame: None,
            index: 0,
            control: Vec::new(),
            info: FrameInfo::default(),
        }
    }

    /// Collect header bytes from the front of `data`.  `Ok(None)` when more are needed.
    fn read_header(&mut self, data: &mut &[u8]) -> Result<Option<FrameHeader>, FrameError> {
        loop {
            match FrameHeader::decode(&self.head[..self.head_len]) {
                Ok(header) => {
                    self.head_len = 0;
                    self.start_frame(header);
                    return Ok(Some(header));
                }
                Err(FrameError::InsufficientData(n)) => {
                    if data.is_empty() {
                        return Ok(None);
                    }
                    let n = n.min(data.len());
                    self.head[self.head_len..self.head_len + n].copy_from_slice(&data[..n]);
                    self.head_len += n;
                    *data = &data[n..];
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn start_frame(&mut self, header: FrameHeader) {
        self.frame = Some(header);
        self.index = 0;
        self.control.clear();
        if header.opcode.is_control() {
            return;
        }

        if header.opcode == Opcode::Continuation {
            self.info.num += 1;
        } else {
            self.info.message_opcode = header.opcode;
            self.info.num = 0;
        }
        self.info.opcode = header.opcode;
        self.info.is_final = header.fin;
        self.info.masked = header.mask.is_some();
        self.info.len = header.len;
        self.info.index = 0;
    }
}

/// A connection adopted by a [`WebSocket`].
pub struct WebSocketClient<T> {
    id: ConnectionId,
    transport: T,
    status: ClientStatus,
    control: VecDeque<ControlFrame>,
    queue: MessageQueue<WsMessage>,
    reader: FrameReader,
    keep_alive_period: u32,
    last_message_time: u32,
    activity: bool,
    echoing_close: bool,
}

impl<T: Transport> WebSocketClient<T> {
    pub(crate) fn new(id: ConnectionId, transport: T, keep_alive_period: u32) -> Self {
        Self {
            id,
            transport,
            status: ClientStatus::Connected,
            control: VecDeque::new(),
            queue: MessageQueue::new(WS_MAX_QUEUED_MESSAGES),
            reader: FrameReader::new(),
            keep_alive_period,
            last_message_time: 0,
            activity: true,
            echoing_close: false,
        }
    }

    /// Connection this client runs on.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Lifecycle state.
    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Idle time in milliseconds after which a keep-alive ping goes out, 0 for never.
    pub fn keep_alive_period(&self) -> u32 {
        self.keep_alive_period
    }

    /// Set the keep-alive idle time in milliseconds, 0 to turn pings off.
    pub fn set_keep_alive_period(&mut self, period_ms: u32) {
        self.keep_alive_period = period_ms;
    }

    /// Whether new messages would be dropped.
    pub fn queue_is_full(&self) -> bool {
        self.queue.is_full() || self.status != ClientStatus::Connected
    }

    /// Messages queued and not yet confirmed by the peer.
    pub fn packets_waiting(&self) -> usize {
        self.queue.len()
    }

    /// Queue a text message.
    pub fn text(&mut self, message: &str) {
        self.queue_message(WsMessage::new(Opcode::Text, Payload::Owned(message.as_bytes().to_vec())));
    }

    /// Queue a binary message.
    pub fn binary(&mut self, data: &[u8]) {
        self.queue_message(WsMessage::new(Opcode::Binary, Payload::Owned(data.to_vec())));
    }

    /// Queue a shared buffer as a text message.
    pub fn text_buffer(&mut self, buffer: &ByteBufferChunk) {
        self.queue_message(WsMessage::new(Opcode::Text, Payload::Shared(buffer.clone())));
    }

    /// Queue a shared buffer as a binary message.
    pub fn binary_buffer(&mut self, buffer: &ByteBufferChunk) {
        self.queue_message(WsMessage::new(Opcode::Binary, Payload::Shared(buffer.clone())));
    }

    /// Send a ping ahead of any queued message.
    pub fn ping(&mut self, data: &[u8]) {
        if self.status == ClientStatus::Connected {
            self.queue_control(Opcode::Ping, data);
        }
    }

    /// Start the close handshake.  `code` 0 sends a close frame without payload; the reason is
    /// cut to 123 bytes.
    pub fn close(&mut self, code: u16, reason: Option<&str>) {
        if self.status != ClientStatus::Connected {
            return;
        }
        let mut payload = Vec::new();
        if code != 0 {
            payload.extend_from_slice(&code.to_be_bytes());
            if let Some(reason) = reason {
                payload.extend_from_slice(&reason.as_bytes()[..reason.len().min(123)]);
            }
        }
        self.status = ClientStatus::Disconnecting;
        self.queue_control(Opcode::Close, &payload);
    }

    fn queue_message(&mut self, message: WsMessage) {
        if self.status != ClientStatus::Connected {
            return;
        }
        let _ = self.queue.enqueue(message);
        if self.transport.can_send() {
            self.run_queue();
        }
    }

    fn queue_control(&mut self, opcode: Opcode, data: &[u8]) {
        self.control.push_back(ControlFrame::new(opcode, data));
        if self.transport.can_send() {
            self.run_queue();
        }
    }

    /// Control frames go first, but only between frames of the message being sent.
    fn run_queue(&mut self) {
        self.queue.pop_finished();
        let between_frames = self.queue.front().is_none_or(|m| m.between_frames());
        let window = frame_window(&self.transport);

        if let Some(control) = self.control.front_mut()
            && !control.sent
            && between_frames
            && window >= control.len()
        {
            control.send(&mut self.transport);
        } else if between_frames
            && window > 0
            && let Some(message) = self.queue.front_mut()
        {
            message.send(&mut self.transport);
        }
    }

    pub(crate) fn on_ack(&mut self, len: usize, time: u32) {
        self.last_message_time = time;
        let mut len = len;

        // a control frame in flight is always ahead of any data frame on the wire
        if let Some(head) = self.control.front_mut()
            && head.sent
        {
            len = head.ack(len);
            if head.finished() {
                let echoed_close = head.opcode == Opcode::Close && self.echoing_close;
                self.control.pop_front();
                if echoed_close {
                    self.status = ClientStatus::Disconnected;
                    self.transport.close(true);
                    return;
                }
            }
        }

        if len > 0 {
            self.queue.on_ack(len);
        }
        self.run_queue();
    }

    pub(crate) fn on_poll(&mut self, now: u32) {
        if self.activity {
            self.last_message_time = now;
            self.activity = false;
        }

        let idle = self.control.is_empty() && self.queue.is_empty();
        if self.transport.can_send() && !idle {
            self.run_queue();
        } else if self.keep_alive_period > 0
            && idle
            && now.wrapping_sub(self.last_message_time) >= self.keep_alive_period
        {
            self.ping(KEEPALIVE_PAYLOAD);
        }
    }

    fn on_data(&mut self, mut data: &[u8], events: &mut Vec<Emitted>) {
        if self.status == ClientStatus::Disconnected {
            return;
        }
        self.activity = true;

        while !data.is_empty() {
            let header = match self.reader.frame {
                Some(header) => header,
                None => match self.reader.read_header(&mut data) {
                    Ok(Some(header)) => header,
                    Ok(None) => break,
                    Err(_) => {
                        warn!("websocket framing error, closing connection");
                        self.status = ClientStatus::Disconnected;
                        self.transport.close(true);
                        return;
                    }
                },
            };

            let index = self.reader.index;
            let take = (header.len - index).min(data.len());
            if take == 0 && header.len > 0 {
                break;
            }
            let mut piece = data[..take].to_vec();
            header.apply_mask(&mut piece, index);
            data = &data[take..];
            self.reader.index += take;
            let complete = self.reader.index == header.len;

            if header.opcode.is_control() {
                self.reader.control.extend_from_slice(&piece);
                if complete {
                    self.reader.frame = None;
                    let payload = core::mem::take(&mut self.reader.control);
                    self.handle_control(header.opcode, payload, events);
                }
            } else {
                let mut info = self.reader.info;
                info.index = index;
                events.push(Emitted::Data { info, data: piece });
                if complete {
                    self.reader.frame = None;
                }
            }
        }
    }

    fn handle_control(&mut self, opcode: Opcode, payload: Vec<u8>, events: &mut Vec<Emitted>) {
        match opcode {
            Opcode::Close => {
                let code = match payload.as_slice() {
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                    _ => 0,
                };
                if code > 1001 {
                    let reason = String::from_utf8_lossy(&payload[2..]).to_string();
                    events.push(Emitted::Error { code, reason });
                }

                if self.status == ClientStatus::Disconnecting {
                    self.status = ClientStatus::Disconnected;
                    self.transport.close(true);
                } else {
                    self.status = ClientStatus::Disconnecting;
                    self.echoing_close = true;
                    self.queue_control(Opcode::Close, &payload);
                }
            }
            Opcode::Ping => self.queue_control(Opcode::Pong, &payload),
            Opcode::Pong => {
                if payload != KEEPALIVE_PAYLOAD {
                    events.push(Emitted::Pong(payload));
                }
            }
            _ => {}
        }
    }
}

struct Inner<T> {
    url: String,
    clients: Vec<WebSocketClient<T>>,
    on_event: Option<EventCallback<T>>,
    enabled: bool,
    keep_alive_period: u32,
}

/// Handle to a WebSocket endpoint.  Clones share the endpoint.
pub struct WebSocket<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for WebSocket<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> WebSocket<T> {
    /// An endpoint served at `url`.
    pub fn new(url: &str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                url: url.to_string(),
                clients: Vec::new(),
                on_event: None,
                enabled: true,
                keep_alive_period: 0,
            })),
        }
    }

    /// Path this endpoint is served at.
    pub fn url(&self) -> String {
        self.inner.borrow().url.clone()
    }

    /// Receive the events of every client.  The callback may use the endpoint it is given.
    pub fn on_event(&self, f: impl FnMut(&WebSocket<T>, ConnectionId, WsEvent<'_>) + 'static) {
        self.inner.borrow_mut().on_event = Some(Box::new(f));
    }

    /// Accept (the default) or refuse new handshakes.
    pub fn enable(&self, enabled: bool) {
        self.inner.borrow_mut().enabled = enabled;
    }

    /// Whether new handshakes are accepted.
    pub fn enabled(&self) -> bool {
        self.inner.borrow().enabled
    }

    /// Keep-alive idle time in milliseconds given to new clients, 0 (the default) for none.
    pub fn set_keep_alive_period(&self, period_ms: u32) {
        self.inner.borrow_mut().keep_alive_period = period_ms;
    }

    /// Connected clients.
    pub fn count(&self) -> usize {
        self.inner
            .borrow()
            .clients
            .iter()
            .filter(|c| c.status == ClientStatus::Connected)
            .count()
    }

    /// Ids of every client, in connection order.
    pub fn client_ids(&self) -> Vec<ConnectionId> {
        self.inner.borrow().clients.iter().map(|c| c.id).collect()
    }

    /// Whether `id` is a client of this endpoint.
    pub fn has_client(&self, id: ConnectionId) -> bool {
        self.inner.borrow().clients.iter().any(|c| c.id == id)
    }

    /// Run `f` on client `id`.  `f` must not call back into this endpoint.
    pub fn with_client<R>(&self, id: ConnectionId, f: impl FnOnce(&mut WebSocketClient<T>) -> R) -> Option<R> {
        let mut inner = self.inner.borrow_mut();
        inner.clients.iter_mut().find(|c| c.id == id).map(f)
    }

    fn for_each_connected(&self, mut f: impl FnMut(&mut WebSocketClient<T>)) {
        let mut inner = self.inner.borrow_mut();
        for client in inner
            .clients
            .iter_mut()
            .filter(|c| c.status == ClientStatus::Connected)
        {
            f(client);
        }
    }

    /// Whether client `id` exists and takes new messages.
    pub fn available_for_write(&self, id: ConnectionId) -> bool {
        self.with_client(id, |c| !c.queue_is_full()).unwrap_or(false)
    }

    /// Whether every client takes new messages.
    pub fn available_for_write_all(&self) -> bool {
        self.inner.borrow().clients.iter().all(|c| !c.queue_is_full())
    }

    /// Send text to client `id`.
    pub fn text(&self, id: ConnectionId, message: &str) {
        self.with_client(id, |c| c.text(message));
    }

    /// Send binary data to client `id`.
    pub fn binary(&self, id: ConnectionId, data: &[u8]) {
        self.with_client(id, |c| c.binary(data));
    }

    /// Ping client `id`.
    pub fn ping(&self, id: ConnectionId, data: &[u8]) {
        self.with_client(id, |c| c.ping(data));
    }

    /// Close client `id`.
    pub fn close(&self, id: ConnectionId, code: u16, reason: Option<&str>) {
        self.with_client(id, |c| c.close(code, reason));
    }

    /// A shared buffer of `size` zero bytes to fill and broadcast.
    pub fn make_buffer(&self, size: usize) -> ByteBufferChunk {
        ByteBufferChunk::new(size)
    }

    /// A shared buffer holding a copy of `data`.
    pub fn make_buffer_from(&self, data: &[u8]) -> ByteBufferChunk {
        ByteBufferChunk::from_slice(data)
    }

    /// Send text to every connected client, sharing one copy of the payload.
    pub fn text_all(&self, message: &str) {
        self.text_all_buffer(&ByteBufferChunk::from_slice(message.as_bytes()));
    }

    /// Send binary data to every connected client, sharing one copy of the payload.
    pub fn binary_all(&self, data: &[u8]) {
        self.binary_all_buffer(&ByteBufferChunk::from_slice(data));
    }

    /// Send `buffer` as text to every connected client.
    pub fn text_all_buffer(&self, buffer: &ByteBufferChunk) {
        buffer.lock();
        self.for_each_connected(|c| c.text_buffer(buffer));
        buffer.unlock();
    }

    /// Send `buffer` as binary data to every connected client.
    pub fn binary_all_buffer(&self, buffer: &ByteBufferChunk) {
        buffer.lock();
        self.for_each_connected(|c| c.binary_buffer(buffer));
        buffer.unlock();
    }

    /// Ping every connected client.
    pub fn ping_all(&self, data: &[u8]) {
        self.for_each_connected(|c| c.ping(data));
    }

    /// Close every connected client.
    pub fn close_all(&self, code: u16, reason: Option<&str>) {
        self.for_each_connected(|c| c.close(code, reason));
    }

    /// Close the oldest client while more than `max_clients` are connected.  Call periodically
    /// with [`DEFAULT_MAX_WS_CLIENTS`](crate::config::DEFAULT_MAX_WS_CLIENTS) or another limit.
    pub fn cleanup_clients(&self, max_clients: usize) {
        if self.count() <= max_clients {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        if let Some(oldest) = inner
            .clients
            .iter_mut()
            .find(|c| c.status == ClientStatus::Connected)
        {
            debug!("too many websocket clients, closing the oldest");
            oldest.close(0, None);
        }
    }

    fn dispatch(&self, id: ConnectionId, events: Vec<Emitted>) {
        if events.is_empty() {
            return;
        }
        let callback = self.inner.borrow_mut().on_event.take();
        let Some(mut callback) = callback else {
            return;
        };
        for event in &events {
            callback(self, id, event.as_event());
        }
        let mut inner = self.inner.borrow_mut();
        if inner.on_event.is_none() {
            inner.on_event = Some(callback);
        }
    }

    /// Take over connection `id` once the `101` head was delivered.
    pub(crate) fn adopt(&self, id: ConnectionId, transport: T) {
        {
            let mut inner = self.inner.borrow_mut();
            let keep_alive = inner.keep_alive_period;
            inner.clients.push(WebSocketClient::new(id, transport, keep_alive));
        }
        debug!("websocket client connected");
        self.dispatch(id, alloc::vec![Emitted::Connect]);
    }

    pub(crate) fn on_data(&self, id: ConnectionId, data: &[u8]) {
        let mut events = Vec::new();
        self.with_client(id, |c| c.on_data(data, &mut events));
        self.dispatch(id, events);
    }

    pub(crate) fn on_ack(&self, id: ConnectionId, len: usize, time: u32) {
        self.with_client(id, |c| c.on_ack(len, time));
    }

    pub(crate) fn on_poll(&self, id: ConnectionId, now: u32) {
        self.with_client(id, |c| c.on_poll(now));
    }

    pub(crate) fn on_timeout(&self, id: ConnectionId) {
        self.with_client(id, |c| c.transport.close(true));
    }

    pub(crate) fn on_disconnect(&self, id: ConnectionId) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let before = inner.clients.len();
            inner.clients.retain(|c| c.id != id);
            before != inner.clients.len()
        };
        if removed {
            self.dispatch(id, alloc::vec![Emitted::Disconnect]);
        }
    }
}

impl<T: Transport> RequestHandler for WebSocket<T> {
    fn can_handle(&self, request: &mut Request) -> bool {
        {
            let inner = self.inner.borrow();
            if !inner.enabled
                || request.method() != Method::GET
                || request.url() != inner.url.as_str()
                || !request.is_expected_conn_type(&[ConnectionType::WebSocket])
            {
                return false;
            }
        }
        for name in [
            REQ_HEAD_CONNECTION,
            REQ_HEAD_UPGRADE,
            REQ_HEAD_ORIGIN,
            REQ_HEAD_SEC_WEBSOCKET_VERSION,
            REQ_HEAD_SEC_WEBSOCKET_KEY,
            REQ_HEAD_SEC_WEBSOCKET_PROTOCOL,
        ] {
            request.add_interesting_header(name);
        }
        true
    }

    fn handle_request(&mut self, request: &mut Request) {
        let (Some(version), Some(key)) = (
            request.header(REQ_HEAD_SEC_WEBSOCKET_VERSION),
            request.header(REQ_HEAD_SEC_WEBSOCKET_KEY),
        ) else {
            request.send_status(StatusCode::BAD_REQUEST);
            return;
        };

        if atoi(version.value().as_bytes()) != Some(13) {
            let mut response = Response::status(StatusCode::BAD_REQUEST);
            response.add_header(RESP_HEAD_SEC_WEBSOCKET_VERSION, "13");
            request.send(response);
            return;
        }

        let accept = match sec_websocket_accept_val(key.value()) {
            Ok(accept) => accept,
            Err(e) => {
                error!("{}", e);
                request.send_status(StatusCode::INTERNAL_SERVER_ERROR);
                return;
            }
        };
        let accept = core::str::from_utf8(&accept).unwrap_or_default().to_string();
        let protocol = request
            .header(REQ_HEAD_SEC_WEBSOCKET_PROTOCOL)
            .map(|h| h.value().to_string());

        let mut response = Response::status(StatusCode::SWITCHING_PROTOCOLS);
        response.add_header(RESP_HEAD_CONNECTION, "Upgrade");
        response.add_header(RESP_HEAD_UPGRADE, "websocket");
        response.add_header(RESP_HEAD_SEC_WEBSOCKET_ACCEPT, &accept);
        if let Some(protocol) = protocol {
            response.add_header(RESP_HEAD_SEC_WEBSOCKET_PROTOCOL, &protocol);
        }
        request.send(response.keep_alive());
    }
}
