//! Request routing: rewrite rules, handlers and the catch-all.
//!
//! Handlers are consulted in registration order and the first whose filter and
//! [`can_handle`](RequestHandler::can_handle) accept a request gets it.  Requests nobody takes
//! go to the catch-all, which answers `404 Not Found` unless configured otherwise.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::event_source::EventSource;
use crate::parser::UploadChunk;
use crate::request::{ANY_HEADER, Methods, Request};
use crate::response::StatusCode;
use crate::transport::Transport;
use crate::websocket::WebSocket;

/// Called with a complete request.
pub type RequestCallback = Box<dyn FnMut(&mut Request)>;
/// Called with every slice of an uploaded file.
pub type UploadCallback = Box<dyn FnMut(&mut Request, &UploadChunk)>;
/// Called with every slice of a raw body: data, offset and declared total.
pub type BodyCallback = Box<dyn FnMut(&mut Request, &[u8], usize, usize)>;
/// Decides whether a handler or rewrite applies to a request.
pub type Filter = Box<dyn Fn(&Request) -> bool>;

/// Identifies a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandlerId(usize);

/// Identifies a registered rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RewriteId(usize);

/// The handler a request was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attached {
    Handler(HandlerId),
    CatchAll,
}

/// Something that answers requests.
pub trait RequestHandler {
    /// Cheap pre-check run before [`can_handle`](Self::can_handle).
    fn filter(&self, _request: &Request) -> bool {
        true
    }

    /// Whether this handler takes `request`.  Runs once the headers are read; handlers that
    /// need a header to survive parsing declare it here with
    /// [`Request::add_interesting_header`].
    fn can_handle(&self, request: &mut Request) -> bool;

    /// Answer a complete request.
    fn handle_request(&mut self, request: &mut Request);

    /// A slice of an uploaded file.
    fn handle_upload(&mut self, _request: &mut Request, _chunk: &UploadChunk) {}

    /// A slice of a raw body.  Return true to take the bytes so they are not buffered.
    fn handle_body(&mut self, _request: &mut Request, _data: &[u8], _index: usize, _total: usize) -> bool {
        false
    }

    /// Trivial handlers do not look at the body, so it is skipped rather than parsed.
    fn is_trivial(&self) -> bool {
        true
    }
}

/// Handler built from closures, matching on URI and method.
///
/// The URI matches exactly, as a directory (`/api` also matches `/api/led`), as a prefix when
/// it ends in `*`, or, with the `regex` feature, as a regular expression when it is written
/// `^...$`; capture groups become [`path arguments`](Request::path_arg).
pub struct CallbackHandler {
    uri: String,
    methods: Methods,
    #[cfg(feature = "regex")]
    pattern: Option<regex::Regex>,
    filter: Option<Filter>,
    on_request: Option<RequestCallback>,
    on_upload: Option<UploadCallback>,
    on_body: Option<BodyCallback>,
}

impl CallbackHandler {
    /// A handler for `uri` and `methods` without callbacks yet.
    pub fn new(uri: &str, methods: Methods) -> Self {
        Self {
            uri: uri.to_string(),
            methods,
            #[cfg(feature = "regex")]
            pattern: compile_pattern(uri),
            filter: None,
            on_request: None,
            on_upload: None,
            on_body: None,
        }
    }

    /// Call `f` with every complete request.
    pub fn with_request(mut self, f: impl FnMut(&mut Request) + 'static) -> Self {
        self.on_request = Some(Box::new(f));
        self
    }

    /// Call `f` with every slice of an uploaded file.
    pub fn with_upload(mut self, f: impl FnMut(&mut Request, &UploadChunk) + 'static) -> Self {
        self.on_upload = Some(Box::new(f));
        self
    }

    /// Call `f` with every slice of a raw body instead of buffering it.
    pub fn with_body(mut self, f: impl FnMut(&mut Request, &[u8], usize, usize) + 'static) -> Self {
        self.on_body = Some(Box::new(f));
        self
    }

    /// Only consider requests `f` accepts.
    pub fn with_filter(mut self, f: impl Fn(&Request) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    pub(crate) fn catch_all() -> Self {
        Self::new("", Methods::ANY)
    }

    pub(crate) fn set_request(&mut self, f: RequestCallback) {
        self.on_request = Some(f);
    }

    pub(crate) fn set_upload(&mut self, f: UploadCallback) {
        self.on_upload = Some(f);
    }

    pub(crate) fn set_body(&mut self, f: BodyCallback) {
        self.on_body = Some(f);
    }

    fn matches_uri(&self, request: &mut Request) -> bool {
        #[cfg(feature = "regex")]
        if let Some(pattern) = &self.pattern {
            let url = request.url().into_owned();
            let Some(captures) = pattern.captures(&url) else {
                return false;
            };
            request.path_params = captures
                .iter()
                .skip(1)
                .map(|c| c.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            return true;
        }

        if self.uri.is_empty() {
            return true;
        }
        let url = request.url();
        if let Some(prefix) = self.uri.strip_suffix('*') {
            return url.starts_with(prefix);
        }
        url == self.uri.as_str()
            || (url.starts_with(self.uri.as_str())
                && url.as_bytes().get(self.uri.len()) == Some(&b'/'))
    }
}

#[cfg(feature = "regex")]
fn compile_pattern(uri: &str) -> Option<regex::Regex> {
    if !(uri.starts_with('^') && uri.ends_with('$')) {
        return None;
    }
    match regex::Regex::new(uri) {
        Ok(r) => Some(r),
        Err(_) => {
            warn!("invalid route pattern, matching it literally");
            None
        }
    }
}

impl RequestHandler for CallbackHandler {
    fn filter(&self, request: &Request) -> bool {
        self.filter.as_ref().is_none_or(|f| f(request))
    }

    fn can_handle(&self, request: &mut Request) -> bool {
        if self.on_request.is_none() || !self.methods.contains(request.method()) {
            return false;
        }
        if !self.matches_uri(request) {
            return false;
        }
        request.add_interesting_header(ANY_HEADER);
        true
    }

    fn handle_request(&mut self, request: &mut Request) {
        if request.body_too_large() && self.on_body.is_none() {
            request.send_status(StatusCode::PAYLOAD_TOO_LARGE);
            return;
        }
        match self.on_request.as_mut() {
            Some(f) => f(request),
            None => request.send_status(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn handle_upload(&mut self, request: &mut Request, chunk: &UploadChunk) {
        if let Some(f) = self.on_upload.as_mut() {
            f(request, chunk);
        }
    }

    fn handle_body(&mut self, request: &mut Request, data: &[u8], index: usize, total: usize) -> bool {
        match self.on_body.as_mut() {
            Some(f) => {
                f(request, data, index, total);
                true
            }
            None => false,
        }
    }

    fn is_trivial(&self) -> bool {
        self.on_request.is_none() && self.on_upload.is_none() && self.on_body.is_none()
    }
}

/// Rewrites requests for `from` to another URL, optionally adding query parameters.
pub struct Rewrite {
    from: String,
    to_url: String,
    params: String,
    filter: Option<Filter>,
}

impl Rewrite {
    /// Rewrite `from` to `to`.  A query string in `to` is added to the request parameters.
    pub fn new(from: &str, to: &str) -> Self {
        let (to_url, params) = to.split_once('?').unwrap_or((to, ""));
        Self {
            from: from.to_string(),
            to_url: to_url.to_string(),
            params: params.to_string(),
            filter: None,
        }
    }

    /// Only rewrite requests `f` accepts.
    pub fn with_filter(mut self, f: impl Fn(&Request) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    /// Path this rewrite applies to.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Target path.
    pub fn to_url(&self) -> &str {
        &self.to_url
    }

    /// Query parameters added on rewrite.
    pub fn params(&self) -> &str {
        &self.params
    }

    fn matches(&self, request: &Request) -> bool {
        self.from == request.url() && self.filter.as_ref().is_none_or(|f| f(request))
    }
}

/// A registered handler.
pub enum Handler<T> {
    /// Closure based handler.
    Callback(CallbackHandler),
    /// Server-Sent-Events endpoint.
    EventSource(EventSource<T>),
    /// WebSocket endpoint.
    WebSocket(WebSocket<T>),
    /// Any other handler.
    Custom(Box<dyn RequestHandler>),
}

impl<T: Transport> Handler<T> {
    fn as_handler(&self) -> &dyn RequestHandler {
        match self {
            Handler::Callback(h) => h,
            Handler::EventSource(h) => h,
            Handler::WebSocket(h) => h,
            Handler::Custom(h) => h.as_ref(),
        }
    }

    fn as_handler_mut(&mut self) -> &mut dyn RequestHandler {
        match self {
            Handler::Callback(h) => h,
            Handler::EventSource(h) => h,
            Handler::WebSocket(h) => h,
            Handler::Custom(h) => h.as_mut(),
        }
    }
}

impl<T> From<CallbackHandler> for Handler<T> {
    fn from(value: CallbackHandler) -> Self {
        Handler::Callback(value)
    }
}

impl<T> From<EventSource<T>> for Handler<T> {
    fn from(value: EventSource<T>) -> Self {
        Handler::EventSource(value)
    }
}

impl<T> From<WebSocket<T>> for Handler<T> {
    fn from(value: WebSocket<T>) -> Self {
        Handler::WebSocket(value)
    }
}

/// Registered rewrites and handlers, in registration order.
pub(crate) struct Router<T> {
    handlers: Vec<(HandlerId, Handler<T>)>,
    rewrites: Vec<(RewriteId, Rewrite)>,
    catch_all: CallbackHandler,
    next_id: usize,
}

impl<T: Transport> Router<T> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Vec::new(),
            rewrites: Vec::new(),
            catch_all: CallbackHandler::catch_all(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn add_handler(&mut self, handler: Handler<T>) -> HandlerId {
        let id = HandlerId(self.next_id());
        self.handlers.push((id, handler));
        id
    }

    pub(crate) fn remove_handler(&mut self, id: HandlerId) -> Option<Handler<T>> {
        let pos = self.handlers.iter().position(|(h, _)| *h == id)?;
        Some(self.handlers.remove(pos).1)
    }

    pub(crate) fn add_rewrite(&mut self, rewrite: Rewrite) -> RewriteId {
        let id = RewriteId(self.next_id());
        self.rewrites.push((id, rewrite));
        id
    }

    pub(crate) fn remove_rewrite(&mut self, id: RewriteId) -> Option<Rewrite> {
        let pos = self.rewrites.iter().position(|(r, _)| *r == id)?;
        Some(self.rewrites.remove(pos).1)
    }

    pub(crate) fn catch_all_mut(&mut self) -> &mut CallbackHandler {
        &mut self.catch_all
    }

    pub(crate) fn reset(&mut self) {
        self.handlers.clear();
        self.rewrites.clear();
        self.catch_all = CallbackHandler::catch_all();
    }

    pub(crate) fn handler(&self, id: HandlerId) -> Option<&Handler<T>> {
        self.handlers.iter().find(|(h, _)| *h == id).map(|(_, h)| h)
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = &Handler<T>> {
        self.handlers.iter().map(|(_, h)| h)
    }

    /// Apply every matching rewrite in order; a rewrite may feed the next one.
    pub(crate) fn rewrite(&self, request: &mut Request) {
        for (_, rewrite) in &self.rewrites {
            if rewrite.matches(request) {
                if !rewrite.params.is_empty() {
                    request.add_get_params(&rewrite.params);
                }
                request.set_url(&rewrite.to_url);
            }
        }
    }

    /// Pick the handler for `request`.
    pub(crate) fn attach(&self, request: &mut Request) {
        for (id, handler) in &self.handlers {
            let handler = handler.as_handler();
            if handler.filter(request) && handler.can_handle(request) {
                request.handler = Some(Attached::Handler(*id));
                return;
            }
        }
        request.add_interesting_header(ANY_HEADER);
        request.handler = Some(Attached::CatchAll);
    }

    pub(crate) fn get_mut(&mut self, attached: Attached) -> Option<&mut dyn RequestHandler> {
        match attached {
            Attached::CatchAll => Some(&mut self.catch_all),
            Attached::Handler(id) => self
                .handlers
                .iter_mut()
                .find(|(h, _)| *h == id)
                .map(|(_, h)| h.as_handler_mut()),
        }
    }

    /// Hand a complete request to its handler.  The catch-all without a request callback
    /// answers 404.
    pub(crate) fn handle(&mut self, request: &mut Request) {
        let Some(attached) = request.handler else {
            request.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        };
        if attached == Attached::CatchAll && self.catch_all.on_request.is_none() {
            request.send_status(StatusCode::NOT_FOUND);
            return;
        }
        match self.get_mut(attached) {
            Some(handler) => handler.handle_request(request),
            None => {
                debug!("handler removed while a request was in flight");
                request.send_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }
}
