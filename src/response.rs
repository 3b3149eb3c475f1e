//! The response delivery state machine.
//!
//! A [`Response`] never blocks and never writes more than the transport reports as available.
//! [`respond`](Response::respond) sends what fits; every later [`ack`](Response::ack) or
//! [`poll`](Response::poll) resumes where the previous write stopped.
//!
//! ```text
//! Setup -> Headers -> Content -> WaitAck -> End
//!              \          \
//!               `----------`--> Failed  (source became invalid)
//! ```

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write as _;
use core::task::Poll;

use embedded_io::{Read, ReadReady};

use crate::ascii::{CRLF, write_hex_padded};
use crate::content::{CallbackSource, ContentSource, MemorySource, StreamSource};
use crate::header::{
    Header, RESP_HEAD_ACCEPT_RANGES, RESP_HEAD_CONNECTION, RESP_HEAD_CONTENT_LENGTH,
    RESP_HEAD_CONTENT_TYPE, RESP_HEAD_TRANSFER_ENCODING, encode_header,
};
use crate::template::TemplateSource;
use crate::transport::Transport;

/// Chunk framing overhead: four hex digits, CRLF, payload, CRLF.
const CHUNK_OVERHEAD: usize = 8;
/// Largest payload a four digit chunk length can describe.
const MAX_CHUNK_PAYLOAD: usize = 0xFFFF;

/// HTTP status code returned in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusCode(pub u16);

#[allow(missing_docs)]
impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const SWITCHING_PROTOCOLS: StatusCode = StatusCode(101);
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
}

impl StatusCode {
    /// Reason phrase for the status line.  Empty for codes without one.
    #[rustfmt::skip]
    pub fn reason(self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            203 => "Non-Authoritative Information",
            204 => "No Content",
            205 => "Reset Content",
            206 => "Partial Content",
            300 => "Multiple Choices",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            307 => "Temporary Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Authentication Required",
            408 => "Request Time-out",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Request Entity Too Large",
            414 => "Request-URI Too Large",
            415 => "Unsupported Media Type",
            416 => "Requested range not satisfiable",
            417 => "Expectation Failed",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Time-out",
            505 => "HTTP Version not supported",
            _ => "",
        }
    }
}

/// Where a response is in its delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseState {
    /// Being configured by a handler; nothing sent yet.
    Setup,
    /// The head is (partially) on its way.
    Headers,
    /// The body is (partially) on its way.
    Content,
    /// Everything was written; waiting for the transport to confirm it.
    WaitAck,
    /// Every written byte was confirmed.
    End,
    /// The content source failed mid-stream.
    Failed,
}

enum Body {
    /// Content known up front, packed together with the head where possible.
    Basic(MemorySource),
    /// Content pulled from a source through a scratch buffer.
    Source(Box<dyn ContentSource>),
}

/// An HTTP response owned by the request it answers.
pub struct Response {
    code: StatusCode,
    content_type: String,
    content_length: usize,
    send_content_length: bool,
    chunked: bool,
    keep_alive: bool,
    reuse: bool,
    headers: Vec<Header>,
    body: Body,
    state: ResponseState,
    head: Vec<u8>,
    head_sent: usize,
    content_sent: usize,
    written: usize,
    acked: usize,
}

impl core::fmt::Debug for Response {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Response")
            .field("code", &self.code)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("chunked", &self.chunked)
            .field("state", &self.state)
            .field("written", &self.written)
            .field("acked", &self.acked)
            .finish_non_exhaustive()
    }
}

impl Response {
    fn with_body(code: StatusCode, content_type: &str, body: Body) -> Self {
        let (content_length, send_content_length, chunked) = match &body {
            Body::Basic(m) => (m.len().unwrap_or(0), true, false),
            Body::Source(s) => match s.len() {
                Some(len) => (len, true, false),
                None => (0, false, true),
            },
        };

        Self {
            code,
            content_type: content_type.to_string(),
            content_length,
            send_content_length,
            chunked,
            keep_alive: false,
            reuse: false,
            headers: Vec::new(),
            body,
            state: ResponseState::Setup,
            head: Vec::new(),
            head_sent: 0,
            content_sent: 0,
            written: 0,
            acked: 0,
        }
    }

    /// A response without a body.
    pub fn status(code: StatusCode) -> Self {
        Self::with_body(code, "", Body::Basic(MemorySource::new(&b""[..])))
    }

    /// A response carrying `content`.
    pub fn text(
        code: StatusCode,
        content_type: &str,
        content: impl Into<Cow<'static, str>>,
    ) -> Self {
        let bytes: Cow<'static, [u8]> = match content.into() {
            Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
            Cow::Owned(s) => Cow::Owned(s.into_bytes()),
        };
        Self::with_body(code, content_type, Body::Basic(MemorySource::new(bytes)))
    }

    /// A response streaming `data` through the fill path.
    pub fn memory(code: StatusCode, content_type: &str, data: impl Into<Cow<'static, [u8]>>) -> Self {
        Self::from_source(code, content_type, MemorySource::new(data))
    }

    /// A response backed by any content source.  Sources of unknown length are sent chunked.
    pub fn from_source(
        code: StatusCode,
        content_type: &str,
        source: impl ContentSource + 'static,
    ) -> Self {
        Self::with_body(code, content_type, Body::Source(Box::new(source)))
    }

    /// A response reading `len` bytes from a stream, chunked when the length is unknown.
    pub fn stream<R>(code: StatusCode, content_type: &str, reader: R, len: Option<usize>) -> Self
    where
        R: Read + ReadReady + 'static,
    {
        Self::from_source(code, content_type, StreamSource::new(reader, len))
    }

    /// A response of `len` bytes produced by `filler`, called with the scratch buffer and the
    /// number of bytes produced so far.
    pub fn callback<F>(code: StatusCode, content_type: &str, len: usize, filler: F) -> Self
    where
        F: FnMut(&mut [u8], usize) -> Poll<usize> + 'static,
    {
        Self::from_source(code, content_type, CallbackSource::new(Some(len), filler))
    }

    /// A chunked response produced by `filler` until it returns `Ready(0)`.
    pub fn chunked<F>(code: StatusCode, content_type: &str, filler: F) -> Self
    where
        F: FnMut(&mut [u8], usize) -> Poll<usize> + 'static,
    {
        Self::from_source(code, content_type, CallbackSource::new(None, filler))
    }

    /// A chunked response of `source` with `%name%` placeholders replaced by `processor`.
    pub fn template<S, F>(code: StatusCode, content_type: &str, source: S, processor: F) -> Self
    where
        S: ContentSource + 'static,
        F: FnMut(&str) -> String + 'static,
    {
        Self::from_source(code, content_type, TemplateSource::new(source, processor))
    }

    /// Keep the connection open once delivered, for protocol upgrades and event streams.
    pub(crate) fn keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self.send_content_length = false;
        self
    }

    /// Serve the next request on the same connection once delivered.
    pub(crate) fn reuse_connection(mut self) -> Self {
        self.reuse = true;
        self.add_header(RESP_HEAD_CONNECTION, "keep-alive");
        self
    }

    /// Status code.
    pub fn code(&self) -> u16 {
        self.code.0
    }

    /// Change the status code.  Ignored once sending started.
    pub fn set_code(&mut self, code: StatusCode) {
        if self.state == ResponseState::Setup {
            self.code = code;
        }
    }

    /// Change the content type.  Ignored once sending started.
    pub fn set_content_type(&mut self, content_type: &str) {
        if self.state == ResponseState::Setup {
            self.content_type = content_type.to_string();
        }
    }

    /// Declare the body length, turning chunking off.  Ignored once sending started.
    pub fn set_content_length(&mut self, len: usize) {
        if self.state == ResponseState::Setup && !matches!(self.body, Body::Basic(_)) {
            self.content_length = len;
            self.send_content_length = true;
            self.chunked = false;
        }
    }

    /// Add a header.  Ignored once sending started.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if self.state == ResponseState::Setup {
            self.headers.push(Header::new(name, value));
        }
    }

    /// Headers added to this response.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Declared body length, 0 when unknown.
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// Whether the body goes out with chunked framing.
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Current delivery state.
    pub fn state(&self) -> ResponseState {
        self.state
    }

    /// Sending started.
    pub fn started(&self) -> bool {
        self.state != ResponseState::Setup
    }

    /// Delivered or failed.
    pub fn finished(&self) -> bool {
        matches!(self.state, ResponseState::End | ResponseState::Failed)
    }

    /// Failed mid-stream.
    pub fn failed(&self) -> bool {
        self.state == ResponseState::Failed
    }

    /// Whether the connection stays open once the response is delivered.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Whether the connection reads another request once the response is delivered.
    pub(crate) fn reuses_connection(&self) -> bool {
        self.reuse
    }

    /// Whether the content source can still produce the body.
    pub fn source_valid(&self) -> bool {
        match &self.body {
            Body::Basic(_) => true,
            Body::Source(s) => s.is_valid(),
        }
    }

    fn assemble_head(&mut self, version: u8, default_headers: &[Header]) {
        if version == 0 && self.chunked {
            // HTTP/1.0 has no chunked framing: the end of the body is the end of the connection
            self.chunked = false;
        }

        let mut head = Vec::with_capacity(128);
        let _ = write!(
            ByteWriter(&mut head),
            "HTTP/1.{} {} {}\r\n",
            version,
            self.code.0,
            self.code.reason()
        );
        if self.send_content_length {
            encode_header(&mut head, RESP_HEAD_CONTENT_LENGTH, &format!("{}", self.content_length));
        }
        if !self.content_type.is_empty() {
            encode_header(&mut head, RESP_HEAD_CONTENT_TYPE, &self.content_type);
        }
        for header in default_headers.iter().chain(self.headers.iter()) {
            header.encode(&mut head);
        }
        if !self.keep_alive && !self.headers.iter().any(|h| h.is(RESP_HEAD_CONNECTION)) {
            encode_header(&mut head, RESP_HEAD_CONNECTION, "close");
        }
        if version > 0 {
            encode_header(&mut head, RESP_HEAD_ACCEPT_RANGES, "none");
            if self.chunked {
                encode_header(&mut head, RESP_HEAD_TRANSFER_ENCODING, "chunked");
            }
        }
        head.extend_from_slice(CRLF);

        self.head = head;
        self.head_sent = 0;
    }

    /// Assemble the head and send as much of the response as the transport takes.
    pub fn respond<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        version: u8,
        default_headers: &[Header],
    ) {
        if self.state != ResponseState::Setup {
            return;
        }
        self.assemble_head(version, default_headers);
        self.state = ResponseState::Headers;

        if let Body::Basic(content) = &mut self.body {
            let head = &self.head;
            let content_len = content.remaining().len();
            let space = transport.space();

            if content_len == 0 && space >= head.len() {
                self.written += transport.add(head);
                self.head_sent = head.len();
                self.state = ResponseState::WaitAck;
            } else if content_len > 0 && space >= head.len() + content_len {
                let mut out = Vec::with_capacity(head.len() + content_len);
                out.extend_from_slice(head);
                out.extend_from_slice(content.remaining());
                self.written += transport.add(&out);
                self.head_sent = head.len();
                content.advance(content_len);
                self.content_sent = content_len;
                self.state = ResponseState::WaitAck;
            } else if space > 0 && space < head.len() {
                let n = transport.add(&head[..space]);
                self.written += n;
                self.head_sent = n;
            } else if space >= head.len() {
                let shift = space - head.len();
                let mut out = Vec::with_capacity(space);
                out.extend_from_slice(head);
                out.extend_from_slice(&content.remaining()[..shift]);
                self.written += transport.add(&out);
                self.head_sent = head.len();
                content.advance(shift);
                self.content_sent = shift;
                self.state = ResponseState::Content;
            } else {
                trace!("no space for response, waiting for the first ack");
            }

            if self.written > 0 {
                transport.send();
            }
            return;
        }

        self.drive(transport);
    }

    /// Record `len` bytes confirmed by the transport and continue sending.  Acknowledging
    /// zero bytes changes nothing.
    pub fn ack<T: Transport + ?Sized>(&mut self, transport: &mut T, len: usize) {
        if len == 0 || self.state == ResponseState::Setup || self.finished() {
            return;
        }
        self.acked += len;

        if !self.source_valid() {
            self.fail(transport);
            return;
        }

        self.drive(transport);
    }

    /// Retry sending without new acknowledgements, for sources that were not ready.
    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if matches!(self.state, ResponseState::Headers | ResponseState::Content) {
            self.drive(transport);
        }
    }

    fn drive<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        let before = self.written;

        if self.state == ResponseState::Headers {
            let remaining = &self.head[self.head_sent..];
            let n = remaining.len().min(transport.space());
            if n > 0 {
                let n = transport.add(&remaining[..n]);
                self.head_sent += n;
                self.written += n;
            }
            if self.head_sent == self.head.len() {
                self.state = ResponseState::Content;
            }
        }

        if self.state == ResponseState::Content {
            self.send_content(transport);
        }

        if self.written > before {
            transport.send();
        }

        if self.state == ResponseState::WaitAck && self.acked >= self.written {
            self.state = ResponseState::End;
        }
    }

    fn send_content<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        let space = transport.space();

        match &mut self.body {
            Body::Basic(content) => {
                let remaining = content.remaining();
                let n = remaining.len().min(space);
                if n > 0 {
                    let n = transport.add(&remaining[..n]);
                    content.advance(n);
                    self.content_sent += n;
                    self.written += n;
                }
                if content.remaining().is_empty() {
                    self.state = ResponseState::WaitAck;
                }
            }
            Body::Source(source) if self.chunked => {
                if space <= CHUNK_OVERHEAD {
                    return;
                }
                let payload = (space - CHUNK_OVERHEAD).min(MAX_CHUNK_PAYLOAD);
                let mut buf = vec![0u8; payload + CHUNK_OVERHEAD];

                let n = match source.fill(&mut buf[6..6 + payload]) {
                    Poll::Ready(n) => n.min(payload),
                    Poll::Pending => return,
                };
                if !source.is_valid() {
                    self.fail(transport);
                    return;
                }
                write_hex_padded(n, &mut buf[..4]);
                buf[4..6].copy_from_slice(CRLF);
                buf[6 + n..8 + n].copy_from_slice(CRLF);

                self.written += transport.add(&buf[..n + CHUNK_OVERHEAD]);
                self.content_sent += n;
                if n == 0 {
                    self.state = ResponseState::WaitAck;
                }
            }
            Body::Source(source) => {
                let mut max = space;
                if self.send_content_length {
                    max = max.min(self.content_length.saturating_sub(self.content_sent));
                    if max == 0 && self.content_sent >= self.content_length {
                        self.state = ResponseState::WaitAck;
                        return;
                    }
                }
                if max == 0 {
                    return;
                }

                let mut buf = vec![0u8; max];
                let n = match source.fill(&mut buf) {
                    Poll::Ready(n) => n.min(max),
                    Poll::Pending => return,
                };
                if !source.is_valid() {
                    self.fail(transport);
                    return;
                }
                if n == 0 {
                    if self.send_content_length {
                        warn!("content source ended early");
                    }
                    self.state = ResponseState::WaitAck;
                    return;
                }

                self.written += transport.add(&buf[..n]);
                self.content_sent += n;
                if self.send_content_length && self.content_sent >= self.content_length {
                    self.state = ResponseState::WaitAck;
                }
            }
        }
    }

    fn fail<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        warn!("response source became invalid, closing connection");
        self.state = ResponseState::Failed;
        transport.close(true);
    }
}

struct ByteWriter<'a>(&'a mut Vec<u8>);

impl core::fmt::Write for ByteWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// A response body printed piece by piece with [`core::fmt::Write`], sent once complete.
///
/// ```
/// use core::fmt::Write;
/// use httplite_async::response::{Response, ResponseStream, StatusCode};
///
/// let mut stream = ResponseStream::new(StatusCode::OK, "text/plain");
/// write!(stream, "uptime: {}s", 42).unwrap();
/// let response: Response = stream.into();
/// assert_eq!(response.content_length(), 11);
/// ```
#[derive(Debug)]
pub struct ResponseStream {
    code: StatusCode,
    content_type: String,
    headers: Vec<Header>,
    buffer: Vec<u8>,
}

impl ResponseStream {
    /// An empty body for a `code` response of `content_type`.
    pub fn new(code: StatusCode, content_type: &str) -> Self {
        Self {
            code,
            content_type: content_type.to_string(),
            headers: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) -> usize {
        self.buffer.extend_from_slice(data);
        data.len()
    }

    /// Add a header.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push(Header::new(name, value));
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Nothing written so far.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl core::fmt::Write for ResponseStream {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

impl From<ResponseStream> for Response {
    fn from(value: ResponseStream) -> Self {
        let mut response = Response::memory(value.code, &value.content_type, value.buffer);
        response.headers = value.headers;
        response
    }
}
