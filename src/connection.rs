//! One HTTP exchange on one connection: parse the request, run its handler, stream the
//! response, then either close the connection or hand it over to an event source or a
//! WebSocket.

use alloc::vec::Vec;

use crate::config::ServerConfig;
use crate::event_source::EventSource;
use crate::handler::{Attached, Handler, Router};
use crate::parser::{ParseEvents, RequestParser, UploadChunk};
use crate::request::{ConnectionType, Request, RequestError};
use crate::response::{Response, ResponseState, StatusCode};
use crate::transport::Transport;
use crate::websocket::WebSocket;

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Where the connection goes once the response head is delivered.
pub(crate) enum Upgrade<T> {
    EventSource(EventSource<T>),
    WebSocket(WebSocket<T>),
}

/// What is left of a connection after its upgrade response went out.
pub(crate) struct Upgraded<T> {
    pub(crate) transport: T,
    pub(crate) request: Request,
    pub(crate) upgrade: Upgrade<T>,
    /// Bytes the peer sent right behind the request.
    pub(crate) replay: Vec<u8>,
}

/// Parser events routed to the attached handler.
struct Dispatch<'a, T> {
    router: &'a mut Router<T>,
    transport: &'a mut T,
    unowned_acks: &'a mut usize,
}

impl<T: Transport> ParseEvents for Dispatch<'_, T> {
    fn headers_complete(&mut self, req: &mut Request) -> bool {
        self.router.rewrite(req);
        self.router.attach(req);
        req.remove_uninteresting_headers();

        if req.expecting_continue && req.version() > 0 {
            *self.unowned_acks += self.transport.write(CONTINUE);
        }

        req.handler
            .and_then(|attached| self.router.get_mut(attached))
            .is_some_and(|h| !h.is_trivial())
    }

    fn body(&mut self, req: &mut Request, data: &[u8], index: usize, total: usize) -> bool {
        match req.handler.and_then(|attached| self.router.get_mut(attached)) {
            Some(handler) => handler.handle_body(req, data, index, total),
            None => false,
        }
    }

    fn upload(&mut self, req: &mut Request, chunk: &UploadChunk) {
        if let Some(handler) = req.handler.and_then(|attached| self.router.get_mut(attached)) {
            handler.handle_upload(req, chunk);
        }
    }

    fn complete(&mut self, req: &mut Request) {
        self.router.handle(req);
    }
}

/// A connection still speaking HTTP.
pub(crate) struct Connection<T> {
    transport: T,
    request: Request,
    parser: RequestParser,
    response: Option<Response>,
    upgrade: Option<Upgrade<T>>,
    /// Acknowledged bytes that belong to no response, e.g. `100 Continue`.
    unowned_acks: usize,
    replay: Vec<u8>,
    max_replay: usize,
    nonce_seeds: (u32, u32),
    closing: bool,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(transport: T, config: &ServerConfig, nonce_seeds: (u32, u32)) -> Self {
        Self {
            transport,
            request: Request::new(nonce_seeds),
            parser: RequestParser::new(config),
            response: None,
            upgrade: None,
            unowned_acks: 0,
            replay: Vec::new(),
            max_replay: config.max_body_size,
            nonce_seeds,
            closing: false,
        }
    }

    pub(crate) fn on_data(
        &mut self,
        data: &[u8],
        router: &mut Router<T>,
        config: &ServerConfig,
    ) -> Result<(), RequestError> {
        let consumed = if self.parser.is_complete() {
            0
        } else {
            let mut events = Dispatch {
                router: &mut *router,
                transport: &mut self.transport,
                unowned_acks: &mut self.unowned_acks,
            };
            match self.parser.feed(&mut self.request, data, &mut events) {
                Ok(n) => n,
                Err(e) => {
                    self.close(true);
                    return Err(e);
                }
            }
        };
        self.keep_excess(&data[consumed..]);

        if self.parser.is_complete() && self.response.is_none() {
            self.start_response(router, config);
        }
        Ok(())
    }

    /// Bytes behind the request.  Only a WebSocket peer may talk before its handshake
    /// completes; anything else is dropped.
    fn keep_excess(&mut self, excess: &[u8]) {
        if excess.is_empty() {
            return;
        }
        if self.request.conn_type() == ConnectionType::WebSocket
            && self.replay.len() + excess.len() <= self.max_replay
        {
            self.replay.extend_from_slice(excess);
        } else {
            debug!("discarding {} bytes received after the request", excess.len());
        }
    }

    fn start_response(&mut self, router: &Router<T>, config: &ServerConfig) {
        let mut response = match self.request.response.take() {
            Some(response) => response,
            None => {
                warn!("handler did not respond, sending 500");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        if response.is_keep_alive()
            && let Some(Attached::Handler(id)) = self.request.handler
        {
            self.upgrade = match router.handler(id) {
                Some(Handler::EventSource(es)) => Some(Upgrade::EventSource(es.clone())),
                Some(Handler::WebSocket(ws)) => Some(Upgrade::WebSocket(ws.clone())),
                _ => None,
            };
        }

        response.respond(&mut self.transport, self.request.version(), &config.default_headers);
        self.response = Some(response);
        self.check_finished();
    }

    pub(crate) fn on_ack(&mut self, len: usize) {
        let own = len.min(self.unowned_acks);
        self.unowned_acks -= own;
        if let Some(response) = self.response.as_mut() {
            response.ack(&mut self.transport, len - own);
        }
        self.check_finished();
    }

    pub(crate) fn on_poll(&mut self) {
        if let Some(response) = self.response.as_mut() {
            response.poll(&mut self.transport);
        }
        self.check_finished();
    }

    pub(crate) fn on_timeout(&mut self) {
        self.close(true);
    }

    pub(crate) fn on_disconnect(&mut self) {
        self.request.call_disconnect_callback();
    }

    fn check_finished(&mut self) {
        let Some(state) = self.response.as_ref().map(Response::state) else {
            return;
        };
        match state {
            ResponseState::End if self.upgrade.is_none() => {
                if self.response.as_ref().is_some_and(Response::reuses_connection) {
                    self.restart();
                } else {
                    self.close(false);
                }
            }
            // the response already closed the transport
            ResponseState::Failed => self.closing = true,
            _ => {}
        }
    }

    /// Drop the answered request and wait for the next one.
    fn restart(&mut self) {
        debug!("response delivered, waiting for the next request");
        self.request.call_disconnect_callback();
        self.request = Request::new(self.nonce_seeds);
        self.parser.reset();
        self.response = None;
        self.replay.clear();
    }

    fn close(&mut self, immediate: bool) {
        if !self.closing {
            self.closing = true;
            self.transport.close(immediate);
        }
    }

    /// The upgrade response was delivered and the connection can change hands.
    pub(crate) fn ready_to_upgrade(&self) -> bool {
        self.upgrade.is_some()
            && self
                .response
                .as_ref()
                .is_some_and(|r| r.state() == ResponseState::End)
    }

    pub(crate) fn into_upgraded(mut self) -> Result<Upgraded<T>, Self> {
        if !self.ready_to_upgrade() {
            return Err(self);
        }
        let Some(upgrade) = self.upgrade.take() else {
            return Err(self);
        };
        Ok(Upgraded {
            transport: self.transport,
            request: self.request,
            upgrade,
            replay: self.replay,
        })
    }
}
