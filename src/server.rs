//! The server: handler registry plus the callbacks a TCP stack drives it with.
//!
//! The stack hands each accepted connection to [`Server::on_connect`] and then reports
//! everything that happens on it through the matching `on_*` method: received bytes, bytes
//! acknowledged by the peer, idle polls, timeouts and the disconnect.  All of them must be
//! called from the one context that owns the server.
//!
//! Stacks exposing sockets as `embedded_io_async::{Read, Write}` can let [`Server::serve`]
//! drive a connection instead.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::future::Future;
use core::pin::pin;

use embedded_io_async::{Read, Write};
use futures_util::future::{Either, select};

use crate::config::ServerConfig;
use crate::connection::{Connection, Upgrade, Upgraded};
use crate::event_source::EventSource;
use crate::handler::{CallbackHandler, Handler, HandlerId, RequestHandler, Rewrite, RewriteId, Router};
use crate::parser::UploadChunk;
use crate::request::{Methods, Request, RequestError};
use crate::transport::Transport;
use crate::websocket::WebSocket;

/// Identifies a connection for as long as it is open.  Ids of closed connections are reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionId(pub(crate) usize);

/// ServerError is returned by the transport callbacks and by [`Server::serve`].
#[derive(Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServerError {
    /// The peer sent something that is not HTTP.  The connection was closed.
    ProtocolError(RequestError),
    /// No open connection has this id.
    UnknownConnection,
    /// Writing to the socket failed.
    NetworkError,
}

impl From<RequestError> for ServerError {
    fn from(value: RequestError) -> Self {
        Self::ProtocolError(value)
    }
}

enum Slot<T> {
    Http(Connection<T>),
    EventSource(EventSource<T>, Request),
    WebSocket(WebSocket<T>, Request),
}

/// Server is the main struct to be used by users of the crate.  Register handlers, then feed
/// it the events of every connection.
///
/// ```
/// use httplite_async::config::ServerConfig;
/// use httplite_async::request::Methods;
/// use httplite_async::response::StatusCode;
/// use httplite_async::server::{Server, StagedTransport};
///
/// let mut server = Server::<StagedTransport>::new(ServerConfig::default());
/// server.on("/", Methods::GET, |req| {
///     req.send_text(StatusCode::OK, "text/html", "<html>...</html>");
/// });
/// server.on_not_found(|req| req.send_text(StatusCode::NOT_FOUND, "text/plain", "Not Found"));
/// ```
pub struct Server<T> {
    config: ServerConfig,
    router: Router<T>,
    slots: Vec<Option<Slot<T>>>,
    nonce_counter: u32,
}

impl<T: Transport> Default for Server<T> {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl<T: Transport> Server<T> {
    /// A server without handlers.  Every request is answered `404` until some are added.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            slots: Vec::new(),
            nonce_counter: 0,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Answer requests for `uri` with one of `methods` using `f`.
    pub fn on(&mut self, uri: &str, methods: Methods, f: impl FnMut(&mut Request) + 'static) -> HandlerId {
        self.add_handler(CallbackHandler::new(uri, methods).with_request(f))
    }

    /// Register a handler.  Handlers are tried in registration order.
    pub fn add_handler(&mut self, handler: impl Into<Handler<T>>) -> HandlerId {
        self.router.add_handler(handler.into())
    }

    /// Register a custom handler.
    pub fn add_custom_handler(&mut self, handler: impl RequestHandler + 'static) -> HandlerId {
        self.router.add_handler(Handler::Custom(Box::new(handler)))
    }

    /// Unregister a handler, returning it.
    pub fn remove_handler(&mut self, id: HandlerId) -> Option<Handler<T>> {
        self.router.remove_handler(id)
    }

    /// Register a rewrite.  Rewrites run in registration order before handlers are matched.
    pub fn add_rewrite(&mut self, rewrite: Rewrite) -> RewriteId {
        self.router.add_rewrite(rewrite)
    }

    /// Shorthand for `add_rewrite(Rewrite::new(from, to))`.
    pub fn rewrite(&mut self, from: &str, to: &str) -> RewriteId {
        self.add_rewrite(Rewrite::new(from, to))
    }

    /// Unregister a rewrite, returning it.
    pub fn remove_rewrite(&mut self, id: RewriteId) -> Option<Rewrite> {
        self.router.remove_rewrite(id)
    }

    /// Answer requests no handler took.  Without this they get an empty `404`.
    pub fn on_not_found(&mut self, f: impl FnMut(&mut Request) + 'static) {
        self.router.catch_all_mut().set_request(Box::new(f));
    }

    /// Receive files uploaded with requests no handler took.
    pub fn on_file_upload(&mut self, f: impl FnMut(&mut Request, &UploadChunk) + 'static) {
        self.router.catch_all_mut().set_upload(Box::new(f));
    }

    /// Receive raw bodies of requests no handler took.
    pub fn on_request_body(&mut self, f: impl FnMut(&mut Request, &[u8], usize, usize) + 'static) {
        self.router.catch_all_mut().set_body(Box::new(f));
    }

    /// Drop every handler, rewrite and catch-all callback.
    pub fn reset(&mut self) {
        self.router.reset();
    }

    /// Open connections, upgraded ones included.
    pub fn connections(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn nonce_seeds(&mut self) -> (u32, u32) {
        match self.config.entropy {
            Some(entropy) => (entropy(), entropy()),
            None => {
                self.nonce_counter = self.nonce_counter.wrapping_add(0x9E37_79B9);
                (self.nonce_counter, self.nonce_counter.rotate_left(13) ^ 0x5BD1_E995)
            }
        }
    }

    /// A new connection was accepted.
    pub fn on_connect(&mut self, transport: T) -> ConnectionId {
        let seeds = self.nonce_seeds();
        let slot = Slot::Http(Connection::new(transport, &self.config, seeds));

        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        trace!("connection {} opened", index);
        ConnectionId(index)
    }

    fn slot(&mut self, id: ConnectionId) -> Result<&mut Slot<T>, ServerError> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ServerError::UnknownConnection)
    }

    /// Bytes arrived.  A protocol error closed the connection; the stack still reports the
    /// disconnect as usual.
    pub fn on_data(&mut self, id: ConnectionId, data: &[u8]) -> Result<(), ServerError> {
        let slot = self
            .slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ServerError::UnknownConnection)?;
        match slot {
            Slot::Http(conn) => conn.on_data(data, &mut self.router, &self.config)?,
            Slot::EventSource(..) => trace!("ignoring {} bytes from an event stream client", data.len()),
            Slot::WebSocket(ws, _) => ws.on_data(id, data),
        }
        self.try_upgrade(id);
        Ok(())
    }

    /// The peer confirmed `len` more bytes.  `time` is a millisecond clock.
    pub fn on_ack(&mut self, id: ConnectionId, len: usize, time: u32) -> Result<(), ServerError> {
        match self.slot(id)? {
            Slot::Http(conn) => conn.on_ack(len),
            Slot::EventSource(es, _) => es.on_ack(id, len),
            Slot::WebSocket(ws, _) => ws.on_ack(id, len, time),
        }
        self.try_upgrade(id);
        Ok(())
    }

    /// Periodic tick for an idle connection.  `now` is a millisecond clock.
    pub fn on_poll(&mut self, id: ConnectionId, now: u32) -> Result<(), ServerError> {
        match self.slot(id)? {
            Slot::Http(conn) => conn.on_poll(),
            Slot::EventSource(es, _) => es.on_poll(id),
            Slot::WebSocket(ws, _) => ws.on_poll(id, now),
        }
        self.try_upgrade(id);
        Ok(())
    }

    /// Nothing was received for too long.  The connection is aborted.
    pub fn on_timeout(&mut self, id: ConnectionId, time: u32) -> Result<(), ServerError> {
        debug!("connection {} timed out at {}", id.0, time);
        match self.slot(id)? {
            Slot::Http(conn) => conn.on_timeout(),
            Slot::EventSource(es, _) => es.on_timeout(id),
            Slot::WebSocket(ws, _) => ws.on_timeout(id),
        }
        Ok(())
    }

    /// The stack reported an error.  It is followed by [`on_disconnect`](Self::on_disconnect).
    pub fn on_error(&mut self, id: ConnectionId, code: i32) {
        warn!("connection {} error {}", id.0, code);
    }

    /// The connection is gone.  Its request, response and client are dropped.
    pub fn on_disconnect(&mut self, id: ConnectionId) {
        let Some(slot) = self.slots.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        trace!("connection {} closed", id.0);
        match slot {
            Slot::Http(mut conn) => conn.on_disconnect(),
            Slot::EventSource(es, mut request) => {
                es.on_disconnect(id);
                request.call_disconnect_callback();
            }
            Slot::WebSocket(ws, mut request) => {
                ws.on_disconnect(id);
                request.call_disconnect_callback();
            }
        }
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
    }

    /// Hand a connection whose upgrade response went out to its event source or WebSocket.
    fn try_upgrade(&mut self, id: ConnectionId) {
        let Some(entry) = self.slots.get_mut(id.0) else {
            return;
        };
        if !matches!(entry, Some(Slot::Http(conn)) if conn.ready_to_upgrade()) {
            return;
        }
        let Some(Slot::Http(conn)) = entry.take() else {
            return;
        };

        let Upgraded {
            transport,
            request,
            upgrade,
            replay,
        } = match conn.into_upgraded() {
            Ok(upgraded) => upgraded,
            Err(conn) => {
                *entry = Some(Slot::Http(conn));
                return;
            }
        };

        match upgrade {
            Upgrade::EventSource(es) => {
                debug!("connection {} upgraded to an event stream", id.0);
                es.adopt(id, transport, &request);
                *entry = Some(Slot::EventSource(es, request));
            }
            Upgrade::WebSocket(ws) => {
                debug!("connection {} upgraded to a websocket", id.0);
                *entry = Some(Slot::WebSocket(ws.clone(), request));
                ws.adopt(id, transport);
                if !replay.is_empty() {
                    ws.on_data(id, &replay);
                }
            }
        }
    }
}

struct Staging {
    out: Vec<u8>,
    window: usize,
    closed: Option<bool>,
}

/// Transport used by [`Server::serve`]: bytes are staged in memory, up to a fixed window,
/// until the serve loop writes them to the socket.
#[derive(Clone)]
pub struct StagedTransport {
    inner: Rc<RefCell<Staging>>,
}

impl StagedTransport {
    /// A transport staging at most `window` bytes.
    pub fn new(window: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Staging {
                out: Vec::new(),
                window,
                closed: None,
            })),
        }
    }

    /// Hand over the staged bytes.
    pub fn take(&self) -> Vec<u8> {
        core::mem::take(&mut self.inner.borrow_mut().out)
    }

    /// The server asked for the connection to be closed.
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed.is_some()
    }
}

impl Transport for StagedTransport {
    fn space(&self) -> usize {
        let inner = self.inner.borrow();
        if inner.closed.is_some() {
            return 0;
        }
        inner.window.saturating_sub(inner.out.len())
    }

    fn add(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space());
        self.inner.borrow_mut().out.extend_from_slice(&data[..n]);
        n
    }

    fn can_send(&self) -> bool {
        self.inner.borrow().closed.is_none()
    }

    fn close(&mut self, immediate: bool) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed.is_none() {
            inner.closed = Some(immediate);
        }
        if immediate {
            inner.out.clear();
        }
    }

    fn connected(&self) -> bool {
        self.inner.borrow().closed.is_none()
    }
}

impl Server<StagedTransport> {
    /// Serve one connection over an async socket until either side closes it.  Received bytes
    /// go through `read_buf`; at most `tx_window` bytes are staged before they are written out
    /// and acknowledged.  The result is `Ok(())` when the connection ended normally and an
    /// error on a protocol or write failure; either way the connection is finished.
    ///
    /// Without a timer the connection is only polled after socket activity, at time 0, so
    /// WebSocket keep-alive pings never fire.  Use [`serve_with_timer`](Self::serve_with_timer)
    /// for those.
    pub async fn serve<C>(
        &mut self,
        client: &mut C,
        read_buf: &mut [u8],
        tx_window: usize,
    ) -> Result<(), ServerError>
    where
        C: Read + Write,
    {
        self.serve_with_timer(client, read_buf, tx_window, core::future::pending::<u32>)
            .await
    }

    /// Like [`serve`](Self::serve), but the connection is also polled every time a future made
    /// by `tick` completes.  Its output is the current time in milliseconds, which stamps every
    /// later poll and acknowledgement.  A pending read is dropped when a tick wins, so the
    /// socket's `read` must be cancel safe.
    ///
    /// ```ignore
    /// server
    ///     .serve_with_timer(&mut socket, &mut buf, 1460, || async {
    ///         Timer::after_millis(250).await;
    ///         Instant::now().as_millis() as u32
    ///     })
    ///     .await
    /// ```
    pub async fn serve_with_timer<C, F, Fut>(
        &mut self,
        client: &mut C,
        read_buf: &mut [u8],
        tx_window: usize,
        tick: F,
    ) -> Result<(), ServerError>
    where
        C: Read + Write,
        F: FnMut() -> Fut,
        Fut: Future<Output = u32>,
    {
        let staging = StagedTransport::new(tx_window);
        let id = self.on_connect(staging.clone());
        let result = self.serve_connection(id, &staging, client, read_buf, tick).await;
        self.on_disconnect(id);
        result
    }

    async fn serve_connection<C, F, Fut>(
        &mut self,
        id: ConnectionId,
        staging: &StagedTransport,
        client: &mut C,
        read_buf: &mut [u8],
        mut tick: F,
    ) -> Result<(), ServerError>
    where
        C: Read + Write,
        F: FnMut() -> Fut,
        Fut: Future<Output = u32>,
    {
        let mut now = 0;
        loop {
            self.flush(id, staging, client, now).await?;
            if staging.is_closed() {
                return Ok(());
            }

            let read = match select(pin!(client.read(read_buf)), pin!(tick())).await {
                Either::Left((read, _)) => Some(read),
                Either::Right((time, _)) => {
                    now = time;
                    None
                }
            };
            match read {
                // a tick: the flush polls the connection
                None => {}
                Some(Ok(0) | Err(_)) => return Ok(()),
                Some(Ok(n)) => self.on_data(id, &read_buf[..n])?,
            }
        }
    }

    /// Write staged bytes out, acknowledging each batch, until the server has nothing more.
    async fn flush<C: Write>(
        &mut self,
        id: ConnectionId,
        staging: &StagedTransport,
        client: &mut C,
        now: u32,
    ) -> Result<(), ServerError> {
        loop {
            let mut out = staging.take();
            if out.is_empty() {
                self.on_poll(id, now)?;
                out = staging.take();
                if out.is_empty() {
                    return Ok(());
                }
            }
            client
                .write_all(&out)
                .await
                .map_err(|_| ServerError::NetworkError)?;
            self.on_ack(id, out.len(), now)?;
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::cell::Cell;
    use std::string::{String, ToString};
    use std::vec;

    use embedded_io_async::{ErrorKind, ErrorType};

    use super::*;
    use crate::frame::{FrameHeader, Opcode};
    use crate::response::StatusCode;
    use crate::transport::testing::MockTransport;
    use crate::websocket::WsEvent;

    /// A [`MockTransport`] the test keeps a handle to after the server took it.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<MockTransport>>);

    impl Shared {
        fn with_space(space: usize) -> Self {
            Self(Rc::new(RefCell::new(MockTransport::with_space(space))))
        }

        fn take(&self) -> String {
            String::from_utf8(self.take_bytes()).unwrap()
        }

        fn take_bytes(&self) -> Vec<u8> {
            self.0.borrow_mut().take()
        }

        fn refill(&self, space: usize) {
            self.0.borrow_mut().space = space;
        }

        fn closed(&self) -> Option<bool> {
            self.0.borrow().closed
        }
    }

    impl Transport for Shared {
        fn space(&self) -> usize {
            self.0.borrow().space()
        }

        fn add(&mut self, data: &[u8]) -> usize {
            self.0.borrow_mut().add(data)
        }

        fn can_send(&self) -> bool {
            self.0.borrow().can_send()
        }

        fn close(&mut self, immediate: bool) {
            self.0.borrow_mut().close(immediate)
        }

        fn connected(&self) -> bool {
            self.0.borrow().connected()
        }
    }

    fn server() -> Server<Shared> {
        let mut server = Server::new(ServerConfig::default());
        server.on("/index.html", Methods::GET, |req| {
            req.send_text(StatusCode::OK, "text/html", "working");
        });
        server
    }

    #[test]
    fn test_request_response_close() {
        let mut server = server();
        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());

        server
            .on_data(id, b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let expected = "HTTP/1.1 200 OK\r\n\
            Content-Length: 7\r\n\
            Content-Type: text/html\r\n\
            Connection: close\r\n\
            Accept-Ranges: none\r\n\
            \r\n\
            working";
        let written = t.take();
        assert!(written == expected, "oops, got:\n{}", written);
        assert_eq!(t.closed(), None);

        server.on_ack(id, expected.len(), 0).unwrap();
        assert_eq!(t.closed(), Some(false));

        server.on_disconnect(id);
        assert_eq!(server.connections(), 0);
        assert_eq!(server.on_data(id, b"x"), Err(ServerError::UnknownConnection));
    }

    #[test]
    fn test_not_found() {
        let mut server = server();
        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server.on_data(id, b"GET /nope HTTP/1.0\r\n\r\n").unwrap();
        let written = t.take();
        assert!(
            written == "HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "oops, got:\n{}",
            written
        );

        server.on_not_found(|req| {
            let body = std::format!("no {}", req.url());
            req.send_text(StatusCode::NOT_FOUND, "text/plain", body);
        });
        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server.on_data(id, b"GET /nope HTTP/1.1\r\n\r\n").unwrap();
        assert!(t.take().ends_with("\r\n\r\nno /nope"));
    }

    #[test]
    fn test_protocol_error_closes_silently() {
        let mut server = server();
        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        assert!(matches!(
            server.on_data(id, b"BREW /pot HTTP/1.1\r\n\r\n"),
            Err(ServerError::ProtocolError(RequestError::ProtocolError(_)))
        ));
        assert!(t.take().is_empty());
        assert_eq!(t.closed(), Some(true));
    }

    #[test]
    fn test_split_request_and_small_window() {
        let mut server = server();
        let t = Shared::with_space(20);
        let id = server.on_connect(t.clone());

        let request = b"GET /index.html HTTP/1.1\r\n\r\n";
        for b in request {
            server.on_data(id, core::slice::from_ref(b)).unwrap();
        }

        let mut written = t.take();
        assert_eq!(written.len(), 20);
        let mut last = written.len();
        for _ in 0..20 {
            if t.closed().is_some() {
                break;
            }
            t.refill(20);
            server.on_ack(id, last, 0).unwrap();
            let more = t.take();
            last = more.len();
            written.push_str(&more);
        }
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.ends_with("\r\n\r\nworking"));
        assert_eq!(t.closed(), Some(false));
    }

    #[test]
    fn test_expect_continue() {
        let mut server = server();
        let received = Rc::new(RefCell::new(String::new()));
        let body = received.clone();
        server.on("/cfg", Methods::POST, move |req| {
            body.borrow_mut().push_str(core::str::from_utf8(req.body().unwrap()).unwrap());
            req.send_status(StatusCode::NO_CONTENT);
        });

        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server
            .on_data(
                id,
                b"POST /cfg HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 2\r\nExpect: 100-continue\r\n\r\n",
            )
            .unwrap();
        assert_eq!(t.take(), "HTTP/1.1 100 Continue\r\n\r\n");

        server.on_data(id, b"{}").unwrap();
        let head = t.take();
        assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert_eq!(*received.borrow(), "{}");

        // the continue line is acked first and must not count towards the response
        server.on_ack(id, 25, 0).unwrap();
        assert_eq!(t.closed(), None);
        server.on_ack(id, head.len(), 0).unwrap();
        assert_eq!(t.closed(), Some(false));
    }

    #[test]
    fn test_rewrite_and_form_post() {
        let mut server = server();
        let seen = Rc::new(RefCell::new(vec![]));
        let params = seen.clone();
        server.on("/settings", Methods::POST, move |req| {
            for p in req.params() {
                params
                    .borrow_mut()
                    .push(std::format!("{}={} post:{}", p.name(), p.value(), p.is_post()));
            }
            req.send_status(StatusCode::OK);
        });
        server.rewrite("/old", "/settings?via=rewrite");

        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server
            .on_data(
                id,
                b"POST /old HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
Content-Length: 17\r\n\r\na=1&b=two%20words",
            )
            .unwrap();
        assert!(t.take().starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(
            *seen.borrow(),
            ["via=rewrite post:false", "a=1 post:true", "b=two words post:true"]
        );
    }

    #[test]
    fn test_catch_all_upload() {
        let mut server = server();
        let files = Rc::new(RefCell::new(vec![]));
        let sink = files.clone();
        server.on_file_upload(move |_, chunk| {
            let mut files = sink.borrow_mut();
            if chunk.index == 0 {
                files.push((chunk.filename.to_string(), vec![]));
            }
            if let Some((_, data)) = files.last_mut() {
                data.extend_from_slice(chunk.data);
            }
        });

        let body = "--B\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n\r\n\
abc\r\n--B--\r\n";
        let request = std::format!(
            "POST /up HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=B\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server.on_data(id, request.as_bytes()).unwrap();

        assert_eq!(*files.borrow(), [(String::from("x.bin"), b"abc".to_vec())]);
        // no request callback on the catch-all
        assert!(t.take().starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn test_request_disconnect_callback() {
        let mut server = server();
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        server.on("/slow", Methods::GET, move |req| {
            let flag = flag.clone();
            req.on_disconnect(move || flag.set(true));
            req.send_status(StatusCode::OK);
        });

        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server.on_data(id, b"GET /slow HTTP/1.1\r\n\r\n").unwrap();
        assert!(!called.get());
        server.on_disconnect(id);
        assert!(called.get());
    }

    #[test]
    fn test_unauthorized_keeps_connection() {
        let mut server = server();
        server.on("/admin", Methods::GET, |req| {
            if req.authenticate("admin", "secret", None, false) {
                req.send_text(StatusCode::OK, "text/plain", "welcome");
            } else {
                req.request_authentication(Some("dev"), false);
            }
        });

        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server.on_data(id, b"GET /admin HTTP/1.1\r\n\r\n").unwrap();
        let expected = "HTTP/1.1 401 Unauthorized\r\n\
            Content-Length: 0\r\n\
            Connection: keep-alive\r\n\
            WWW-Authenticate: Basic realm=\"dev\"\r\n\
            Accept-Ranges: none\r\n\
            \r\n";
        let written = t.take();
        assert!(written == expected, "oops, got:\n{}", written);
        server.on_ack(id, expected.len(), 0).unwrap();
        assert_eq!(t.closed(), None);

        server
            .on_data(id, b"GET /admin HTTP/1.1\r\nAuthorization: Basic YWRtaW46c2VjcmV0\r\n\r\n")
            .unwrap();
        let written = t.take();
        assert!(written.ends_with("\r\n\r\nwelcome"), "oops, got:\n{}", written);
        assert!(written.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_event_source_upgrade() {
        let mut server = server();
        let es = EventSource::new("/events");
        es.on_connect(|client| client.send("hi", None, client.last_id() + 1, 0));
        server.add_handler(es.clone());

        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server
            .on_data(id, b"GET /events HTTP/1.1\r\nAccept: text/event-stream\r\nLast-Event-ID: 42\r\n\r\n")
            .unwrap();
        let head = t.take();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n"));
        assert_eq!(es.count(), 0);

        server.on_ack(id, head.len(), 0).unwrap();
        assert_eq!(es.count(), 1);
        assert_eq!(t.take(), "id: 43\r\ndata: hi\r\n\r\n");
        assert_eq!(t.closed(), None);

        es.send("hello", Some("msg"), 44, 0);
        assert_eq!(t.take(), "id: 44\r\nevent: msg\r\ndata: hello\r\n\r\n");

        server.on_disconnect(id);
        assert_eq!(es.count(), 0);
    }

    fn masked_frame(first: u8, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader {
            fin: first & 0x80 != 0,
            opcode: Opcode::try_from(first & 0x0F).unwrap(),
            len: payload.len(),
            mask: Some([1, 2, 3, 4]),
        };
        let mut head = [0u8; 14];
        let n = header.encode(&mut head).unwrap();
        let mut out = head[..n].to_vec();
        let mut body = payload.to_vec();
        header.apply_mask(&mut body, 0);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_websocket_upgrade_with_early_frame() {
        let mut server = server();
        let ws = WebSocket::new("/ws");
        let got = Rc::new(RefCell::new(vec![]));
        let log = got.clone();
        ws.on_event(move |ws, id, event| match event {
            WsEvent::Connect => log.borrow_mut().push(String::from("connect")),
            WsEvent::Data { data, .. } => {
                log.borrow_mut().push(String::from_utf8(data.to_vec()).unwrap());
                ws.text(id, "pong");
            }
            WsEvent::Disconnect => log.borrow_mut().push(String::from("disconnect")),
            _ => {}
        });
        server.add_handler(ws.clone());

        let mut data = b"GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
            .to_vec();
        data.extend(masked_frame(0x81, b"ping"));

        let t = Shared::with_space(1024);
        let id = server.on_connect(t.clone());
        server.on_data(id, &data).unwrap();
        let head = t.take();
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(got.borrow().is_empty());

        server.on_ack(id, head.len(), 0).unwrap();
        assert_eq!(*got.borrow(), ["connect", "ping"]);
        assert_eq!(t.take_bytes(), b"\x81\x04pong");
    }

    #[test]
    fn test_unknown_connection() {
        let mut server = server();
        let id = ConnectionId(3);
        assert_eq!(server.on_data(id, b""), Err(ServerError::UnknownConnection));
        assert_eq!(server.on_ack(id, 1, 0), Err(ServerError::UnknownConnection));
        assert_eq!(server.on_poll(id, 0), Err(ServerError::UnknownConnection));
        server.on_disconnect(id);
    }

    struct TestClient {
        input: Vec<u8>,
        read_size: usize,
        output: Vec<u8>,
        /// Once the input is used up, wait until this many ticks went by, then hang up.
        idle: Option<Rc<Cell<u32>>>,
    }

    impl ErrorType for TestClient {
        type Error = ErrorKind;
    }

    impl Read for TestClient {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            if self.input.is_empty() {
                return match &self.idle {
                    Some(ticks) if ticks.get() < 3 => core::future::pending().await,
                    Some(_) => Ok(0),
                    None => Err(ErrorKind::ConnectionReset),
                };
            }
            let n = self.input.len().min(buf.len()).min(self.read_size);
            buf[..n].copy_from_slice(&self.input[..n]);
            self.input.drain(..n);
            Ok(n)
        }
    }

    impl Write for TestClient {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_http_server() {
        let mut server = Server::<StagedTransport>::default();
        server.on("/index.html", Methods::GET, |req| {
            req.send_text(StatusCode::OK, "text/plain", "working");
        });

        let mut client = TestClient {
            input: b"GET /index.html HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc".to_vec(),
            read_size: 5,
            output: Vec::new(),
            idle: None,
        };
        let mut read_buf = [0u8; 64];

        match server.serve(&mut client, &mut read_buf, 16).await {
            Ok(_) => {}
            Err(e) => {
                std::panic!("{:?}", e);
            }
        }

        let expected = "HTTP/1.1 200 OK\r\n\
            Content-Length: 7\r\n\
            Content-Type: text/plain\r\n\
            Connection: close\r\n\
            Accept-Ranges: none\r\n\
            \r\n\
            working";
        let written = String::from_utf8(client.output).unwrap();
        assert!(written == expected, "oops, got:\n{}", written);
        assert_eq!(server.connections(), 0);
    }

    #[tokio::test]
    async fn test_serve_protocol_error() {
        let mut server = Server::<StagedTransport>::default();
        let mut client = TestClient {
            input: b"\r\n\r\n".to_vec(),
            read_size: 64,
            output: Vec::new(),
            idle: None,
        };
        let mut read_buf = [0u8; 64];
        assert!(matches!(
            server.serve(&mut client, &mut read_buf, 256).await,
            Err(ServerError::ProtocolError(_))
        ));
        assert!(client.output.is_empty());
        assert_eq!(server.connections(), 0);
    }

    #[tokio::test]
    async fn test_serve_with_timer_sends_keepalive() {
        let mut server = Server::<StagedTransport>::default();
        let ws = WebSocket::new("/ws");
        ws.set_keep_alive_period(1000);
        server.add_handler(ws.clone());

        let ticks = Rc::new(Cell::new(0));
        let mut client = TestClient {
            input: b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
                .to_vec(),
            read_size: 256,
            output: Vec::new(),
            idle: Some(ticks.clone()),
        };
        let mut read_buf = [0u8; 256];

        let clock = ticks.clone();
        let tick = move || {
            let clock = clock.clone();
            async move {
                clock.set(clock.get() + 1);
                clock.get() * 1000
            }
        };
        server
            .serve_with_timer(&mut client, &mut read_buf, 512, tick)
            .await
            .unwrap();

        let out = client.output;
        assert!(out.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
        let ping = b"\x89\x12httplite-keepalive";
        let pings = out.windows(ping.len()).filter(|w| *w == &ping[..]).count();
        assert_eq!(pings, 3);
        assert_eq!(server.connections(), 0);
        assert_eq!(ws.count(), 0);
    }
}
