//! Server-Sent-Events endpoint.
//!
//! An [`EventSource`] answers `GET <url>` with a `text/event-stream` head and, once the peer
//! has acknowledged it, adopts the connection as an [`EventSourceClient`].  From then on the
//! connection only carries events pushed by the application.
//!
//! ```
//! use httplite_async::event_source::EventSource;
//! # use httplite_async::transport::Transport;
//! # fn demo<T: Transport + 'static>(events: EventSource<T>) {
//! events.on_connect(|client| {
//!     if client.last_id() > 0 {
//!         client.send("welcome back", None, client.last_id(), 1000);
//!     }
//! });
//! events.send("21.5", Some("temperature"), 7, 0);
//! # }
//! ```

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt::Write as _;

use crate::ascii::atoi_lenient;
use crate::config::{DEFAULT_MAX_SSE_CLIENTS, SSE_MAX_QUEUED_MESSAGES};
use crate::handler::RequestHandler;
use crate::header::{REQ_HEAD_LAST_EVENT_ID, RESP_HEAD_CACHE_CONTROL, RESP_HEAD_CONNECTION};
use crate::queue::{MessageQueue, QueuedMessage};
use crate::request::{Method, Request};
use crate::response::{Response, StatusCode};
use crate::server::ConnectionId;
use crate::transport::Transport;

/// Called with every newly adopted client.
pub type ConnectCallback<T> = Box<dyn FnMut(&mut EventSourceClient<T>)>;

/// Render one event in `text/event-stream` framing.
///
/// `retry` and `id` are left out when zero.  Every line of `message` (split on `\r\n`, `\n\r`,
/// `\r` or `\n`) becomes its own `data:` field.
pub fn generate_event_message(message: &str, event: Option<&str>, id: u32, reconnect: u32) -> String {
    let mut ev = String::with_capacity(message.len() + 32);
    if reconnect != 0 {
        let _ = write!(ev, "retry: {reconnect}\r\n");
    }
    if id != 0 {
        let _ = write!(ev, "id: {id}\r\n");
    }
    if let Some(event) = event {
        let _ = write!(ev, "event: {event}\r\n");
    }

    let mut rest = message;
    loop {
        let Some(pos) = rest.find(['\r', '\n']) else {
            let _ = write!(ev, "data: {rest}\r\n");
            break;
        };
        let _ = write!(ev, "data: {}\r\n", &rest[..pos]);
        let bytes = rest.as_bytes();
        let skip = match (bytes[pos], bytes.get(pos + 1)) {
            (b'\r', Some(b'\n')) | (b'\n', Some(b'\r')) => 2,
            _ => 1,
        };
        rest = &rest[pos + skip..];
        if rest.is_empty() {
            break;
        }
    }
    ev.push_str("\r\n");
    ev
}

/// One rendered event on its way to a client.  Events are written whole or not at all.
#[derive(Debug)]
pub struct EventSourceMessage {
    data: Vec<u8>,
    sent: usize,
    acked: usize,
}

impl EventSourceMessage {
    /// An event holding `data` verbatim.
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            sent: 0,
            acked: 0,
        }
    }
}

impl QueuedMessage for EventSourceMessage {
    fn ack(&mut self, len: usize) -> usize {
        let take = len.min(self.data.len() - self.acked);
        self.acked += take;
        len - take
    }

    fn finished(&self) -> bool {
        self.acked == self.data.len()
    }

    fn sent(&self) -> bool {
        self.sent == self.data.len()
    }

    fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> usize {
        let remaining = &self.data[self.sent..];
        if remaining.is_empty() || transport.space() < remaining.len() {
            return 0;
        }
        let written = transport.add(remaining);
        self.sent += written;
        if written > 0 && transport.can_send() {
            transport.send();
        }
        written
    }
}

/// A connection adopted by an [`EventSource`].
pub struct EventSourceClient<T> {
    id: ConnectionId,
    transport: T,
    last_id: u32,
    queue: MessageQueue<EventSourceMessage>,
}

impl<T: Transport> EventSourceClient<T> {
    pub(crate) fn new(id: ConnectionId, transport: T, last_id: u32) -> Self {
        Self {
            id,
            transport,
            last_id,
            queue: MessageQueue::new(SSE_MAX_QUEUED_MESSAGES),
        }
    }

    /// Connection this client runs on.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Id from the `Last-Event-ID` header the peer reconnected with, 0 without one.
    pub fn last_id(&self) -> u32 {
        self.last_id
    }

    /// Events queued and not yet confirmed by the peer.
    pub fn packets_waiting(&self) -> usize {
        self.queue.len()
    }

    /// Whether the connection is still open.
    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue an event for this client alone.
    pub fn send(&mut self, message: &str, event: Option<&str>, id: u32, reconnect: u32) {
        let ev = generate_event_message(message, event, id, reconnect);
        self.write(ev.as_bytes());
    }

    /// Queue pre-rendered event bytes.
    pub fn write(&mut self, data: &[u8]) {
        if !self.connected() {
            return;
        }
        let _ = self.queue.enqueue(EventSourceMessage::new(data));
        if self.transport.can_send() {
            self.run_queue();
        }
    }

    /// Close the connection once queued data is flushed.
    pub fn close(&mut self) {
        self.transport.close(false);
    }

    fn run_queue(&mut self) {
        self.queue.send_pending(&mut self.transport);
    }

    pub(crate) fn on_ack(&mut self, len: usize) {
        self.queue.on_ack(len);
        if self.transport.can_send() {
            self.run_queue();
        }
    }

    pub(crate) fn on_poll(&mut self) {
        if !self.queue.is_empty() && self.transport.can_send() {
            self.run_queue();
        }
    }
}

struct Inner<T> {
    url: String,
    clients: Vec<EventSourceClient<T>>,
    on_connect: Option<ConnectCallback<T>>,
    username: String,
    password: String,
    max_clients: usize,
}

/// Handle to a Server-Sent-Events endpoint.  Clones share the endpoint, so one clone can be
/// registered with the server while the application keeps another to push events.
pub struct EventSource<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> EventSource<T> {
    /// An endpoint served at `url`.
    pub fn new(url: &str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                url: url.to_string(),
                clients: Vec::new(),
                on_connect: None,
                username: String::new(),
                password: String::new(),
                max_clients: DEFAULT_MAX_SSE_CLIENTS,
            })),
        }
    }

    /// Path this endpoint is served at.
    pub fn url(&self) -> String {
        self.inner.borrow().url.clone()
    }

    /// Call `f` with every new client before it starts receiving broadcasts.
    pub fn on_connect(&self, f: impl FnMut(&mut EventSourceClient<T>) + 'static) {
        self.inner.borrow_mut().on_connect = Some(Box::new(f));
    }

    /// Require Digest credentials.  Empty strings turn the check off.
    pub fn set_authentication(&self, username: &str, password: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.username = username.to_string();
        inner.password = password.to_string();
    }

    /// Refuse new clients with `503` once `max` are connected.
    pub fn set_max_clients(&self, max: usize) {
        self.inner.borrow_mut().max_clients = max;
    }

    /// Broadcast an event to every connected client.
    pub fn send(&self, message: &str, event: Option<&str>, id: u32, reconnect: u32) {
        let ev = generate_event_message(message, event, id, reconnect);
        let mut inner = self.inner.borrow_mut();
        for client in inner.clients.iter_mut().filter(|c| c.connected()) {
            client.write(ev.as_bytes());
        }
    }

    /// Close every client.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        for client in inner.clients.iter_mut().filter(|c| c.connected()) {
            client.close();
        }
    }

    /// Connected clients.
    pub fn count(&self) -> usize {
        self.inner.borrow().clients.iter().filter(|c| c.connected()).count()
    }

    /// Mean queue depth over connected clients, rounded half up.  0 without clients.
    pub fn avg_packets_waiting(&self) -> usize {
        let inner = self.inner.borrow();
        let (total, connected) = inner
            .clients
            .iter()
            .filter(|c| c.connected())
            .fold((0, 0), |(total, n), c| (total + c.packets_waiting(), n + 1));
        if connected == 0 {
            return 0;
        }
        (total + connected / 2) / connected
    }

    /// Run `f` on the client living on connection `id`.  `f` must not call back into this
    /// endpoint.
    pub fn with_client<R>(&self, id: ConnectionId, f: impl FnOnce(&mut EventSourceClient<T>) -> R) -> Option<R> {
        let mut inner = self.inner.borrow_mut();
        inner.clients.iter_mut().find(|c| c.id == id).map(f)
    }

    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.inner.borrow().clients.iter().any(|c| c.id == id)
    }

    /// Take over connection `id` once the event stream head was delivered.
    pub(crate) fn adopt(&self, id: ConnectionId, transport: T, request: &Request) {
        let last_id = request
            .header(REQ_HEAD_LAST_EVENT_ID)
            .map(|h| atoi_lenient(h.value()) as u32)
            .unwrap_or(0);
        let mut client = EventSourceClient::new(id, transport, last_id);
        debug!("event source client connected, last id {}", last_id);

        let callback = self.inner.borrow_mut().on_connect.take();
        if let Some(mut callback) = callback {
            callback(&mut client);
            let mut inner = self.inner.borrow_mut();
            if inner.on_connect.is_none() {
                inner.on_connect = Some(callback);
            }
        }
        self.inner.borrow_mut().clients.push(client);
    }

    pub(crate) fn on_ack(&self, id: ConnectionId, len: usize) {
        self.with_client(id, |c| c.on_ack(len));
    }

    pub(crate) fn on_poll(&self, id: ConnectionId) {
        self.with_client(id, |c| c.on_poll());
    }

    pub(crate) fn on_timeout(&self, id: ConnectionId) {
        self.with_client(id, |c| c.transport.close(true));
    }

    pub(crate) fn on_disconnect(&self, id: ConnectionId) {
        self.inner.borrow_mut().clients.retain(|c| c.id != id);
    }
}

impl<T: Transport> RequestHandler for EventSource<T> {
    fn can_handle(&self, request: &mut Request) -> bool {
        if request.method() != Method::GET || request.url() != self.inner.borrow().url.as_str() {
            return false;
        }
        request.add_interesting_header(REQ_HEAD_LAST_EVENT_ID);
        true
    }

    fn handle_request(&mut self, request: &mut Request) {
        let (username, password, max_clients) = {
            let inner = self.inner.borrow();
            (inner.username.clone(), inner.password.clone(), inner.max_clients)
        };
        if !username.is_empty()
            && !password.is_empty()
            && !request.authenticate(&username, &password, None, false)
        {
            request.request_authentication(None, true);
            return;
        }
        if self.count() >= max_clients {
            warn!("event source client limit reached");
            request.send_status(StatusCode::SERVICE_UNAVAILABLE);
            return;
        }

        let mut response = Response::status(StatusCode::OK);
        response.set_content_type("text/event-stream");
        response.add_header(RESP_HEAD_CACHE_CONTROL, "no-cache");
        response.add_header(RESP_HEAD_CONNECTION, "keep-alive");
        request.send(response.keep_alive());
    }
}
