use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::any::Any;
use core::ops::BitOr;

use crate::ascii::{COLON, SP, url_decode};
use crate::auth::{
    DigestCredentials, check_basic_authentication, check_digest_authentication,
    request_digest_authentication,
};
use crate::handler::Attached;
use crate::header::{
    Header, RESP_HEAD_LOCATION, RESP_HEAD_WWW_AUTHENTICATE, RequestHeader,
};
use crate::response::{Response, StatusCode};

const GET: &[u8] = "GET".as_bytes();
const POST: &[u8] = "POST".as_bytes();
const PUT: &[u8] = "PUT".as_bytes();
const PATCH: &[u8] = "PATCH".as_bytes();
const DELETE: &[u8] = "DELETE".as_bytes();
const OPTIONS: &[u8] = "OPTIONS".as_bytes();
const HEAD: &[u8] = "HEAD".as_bytes();

/// Interest in every header.
pub const ANY_HEADER: &str = "ANY";

/// Errors raised while parsing a request.  Every variant is fatal to the connection.
#[derive(Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// The bytes received are not a valid HTTP request
    ProtocolError(&'static str),
    /// A request, header or part header line exceeded the configured maximum
    LineTooLong,
    /// The multipart body does not follow its declared boundary
    BodyError(&'static str),
}

/// Method such as GET. POST, DELETE etc.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    #[allow(missing_docs)]
    GET,
    #[allow(missing_docs)]
    POST,
    #[allow(missing_docs)]
    DELETE,
    #[allow(missing_docs)]
    PUT,
    #[allow(missing_docs)]
    PATCH,
    #[allow(missing_docs)]
    HEAD,
    #[allow(missing_docs)]
    OPTIONS,
}

impl Method {
    /// The bit of this method inside a [`Methods`] mask.
    pub const fn bit(self) -> u8 {
        match self {
            Self::GET => 1,
            Self::POST => 2,
            Self::DELETE => 4,
            Self::PUT => 8,
            Self::PATCH => 16,
            Self::HEAD => 32,
            Self::OPTIONS => 64,
        }
    }

    /// The method token as sent on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::POST => "POST",
            Self::DELETE => "DELETE",
            Self::PUT => "PUT",
            Self::PATCH => "PATCH",
            Self::HEAD => "HEAD",
            Self::OPTIONS => "OPTIONS",
        }
    }
}

impl TryFrom<&[u8]> for Method {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            GET => Ok(Self::GET),
            POST => Ok(Self::POST),
            PUT => Ok(Self::PUT),
            PATCH => Ok(Self::PATCH),
            DELETE => Ok(Self::DELETE),
            OPTIONS => Ok(Self::OPTIONS),
            HEAD => Ok(Self::HEAD),
            _ => Err("unknown http method"),
        }
    }
}

/// A set of methods a handler answers to.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Methods(u8);

impl Methods {
    /// Every method.
    pub const ANY: Methods = Methods(0b0111_1111);
    #[allow(missing_docs)]
    pub const GET: Methods = Methods(Method::GET.bit());
    #[allow(missing_docs)]
    pub const POST: Methods = Methods(Method::POST.bit());
    #[allow(missing_docs)]
    pub const DELETE: Methods = Methods(Method::DELETE.bit());
    #[allow(missing_docs)]
    pub const PUT: Methods = Methods(Method::PUT.bit());
    #[allow(missing_docs)]
    pub const PATCH: Methods = Methods(Method::PATCH.bit());
    #[allow(missing_docs)]
    pub const HEAD: Methods = Methods(Method::HEAD.bit());
    #[allow(missing_docs)]
    pub const OPTIONS: Methods = Methods(Method::OPTIONS.bit());

    /// Whether `method` is part of the set.
    pub const fn contains(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }
}

impl From<Method> for Methods {
    fn from(value: Method) -> Self {
        Methods(value.bit())
    }
}

impl BitOr for Methods {
    type Output = Methods;

    fn bitor(self, rhs: Self) -> Self::Output {
        Methods(self.0 | rhs.0)
    }
}

/// The kind of connection the client asked for in its headers.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionType {
    /// Plain request/response
    Http,
    /// `Upgrade: websocket`
    WebSocket,
    /// `Accept: text/event-stream`
    EventStream,
}

/// A query, form or multipart parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: String,
    value: String,
    size: usize,
    is_post: bool,
    is_file: bool,
}

impl Param {
    pub(crate) fn new(name: String, value: String, is_post: bool, is_file: bool, size: usize) -> Self {
        Self {
            name,
            value,
            size,
            is_post,
            is_file,
        }
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter value.  For file uploads this is the file name.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Uploaded size of a file parameter, otherwise 0.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Came from the request body rather than the query string.
    pub fn is_post(&self) -> bool {
        self.is_post
    }

    /// A multipart file upload.
    pub fn is_file(&self) -> bool {
        self.is_file
    }
}

/// Request contains the details parsed from the bytes read from the client so far.  It lives
/// for as long as the connection and owns the [`Response`] sent back.
pub struct Request {
    pub(crate) version: u8,
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) host: String,
    pub(crate) content_type: String,
    pub(crate) content_length: usize,
    pub(crate) boundary: String,
    pub(crate) authorization: String,
    pub(crate) is_digest: bool,
    pub(crate) is_multipart: bool,
    pub(crate) expecting_continue: bool,
    pub(crate) conn_type: ConnectionType,
    pub(crate) headers: Vec<Header>,
    pub(crate) params: Vec<Param>,
    pub(crate) path_params: Vec<String>,
    pub(crate) interesting_headers: Vec<String>,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) body_too_large: bool,
    pub(crate) handler: Option<Attached>,
    pub(crate) response: Option<Response>,
    temp_object: Option<Box<dyn Any>>,
    disconnect_callback: Option<Box<dyn FnOnce()>>,
    nonce_seeds: (u32, u32),
}

impl core::fmt::Debug for Request {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("version", &self.version)
            .field("host", &self.host)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub(crate) fn new(nonce_seeds: (u32, u32)) -> Self {
        Self {
            version: 0,
            method: Method::GET,
            url: String::new(),
            host: String::new(),
            content_type: String::new(),
            content_length: 0,
            boundary: String::new(),
            authorization: String::new(),
            is_digest: false,
            is_multipart: false,
            expecting_continue: false,
            conn_type: ConnectionType::Http,
            headers: Vec::new(),
            params: Vec::new(),
            path_params: Vec::new(),
            interesting_headers: Vec::new(),
            body: None,
            body_too_large: false,
            handler: None,
            response: None,
            temp_object: None,
            disconnect_callback: None,
            nonce_seeds,
        }
    }

    pub(crate) fn parse_request_line(&mut self, data: &[u8]) -> Result<(), RequestError> {
        let line = core::str::from_utf8(data)
            .map_err(|_| RequestError::ProtocolError("http request is not valid utf8"))?;

        let mut words = line.splitn(3, |c: char| c as u32 == u32::from(SP));
        let method = words
            .next()
            .ok_or(RequestError::ProtocolError("malformed http request"))?;
        self.method = Method::try_from(method.as_bytes())
            .map_err(|_| RequestError::ProtocolError("unknown http method"))?;

        let target = words.next().unwrap_or("");
        if target.is_empty() {
            return Err(RequestError::ProtocolError("malformed http request"));
        }

        self.version = match words.next().map(str::trim) {
            Some(v) if v.starts_with("HTTP/1.0") => 0,
            Some(v) if v.starts_with("HTTP/") => 1,
            _ => return Err(RequestError::ProtocolError("malformed http version")),
        };

        match target.split_once('?') {
            Some((path, query)) => {
                self.url = path.to_string();
                self.add_get_params(query);
            }
            None => self.url = target.to_string(),
        }

        Ok(())
    }

    pub(crate) fn parse_header_line(&mut self, data: &[u8]) -> Result<(), RequestError> {
        let line = core::str::from_utf8(data)
            .map_err(|_| RequestError::ProtocolError("http header is not valid utf8"))?;

        let Some((name, value)) = line.split_once(COLON as char) else {
            return Err(RequestError::ProtocolError("malformed http header"));
        };
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(RequestError::ProtocolError("malformed http header"));
        }

        match RequestHeader::try_from((name, value)).map_err(RequestError::ProtocolError)? {
            RequestHeader::Host(h) => self.host = h.to_string(),
            RequestHeader::ContentLength(l) => self.content_length = l,
            RequestHeader::ContentType(ct) => {
                let base = ct.split(';').next().unwrap_or("").trim();
                self.content_type = base.to_string();
                if ct.starts_with("multipart/") {
                    self.boundary = multipart_boundary(ct)
                        .ok_or(RequestError::BodyError("missing multipart boundary"))?;
                    self.is_multipart = true;
                }
            }
            RequestHeader::Expect(e) => {
                self.expecting_continue = e.eq_ignore_ascii_case("100-continue");
            }
            RequestHeader::Authorization(a) => {
                if let Some(creds) = strip_prefix_ignore_case(a, "Basic ") {
                    self.authorization = creds.trim().to_string();
                    self.is_digest = false;
                } else if let Some(creds) = strip_prefix_ignore_case(a, "Digest ") {
                    self.authorization = creds.trim().to_string();
                    self.is_digest = true;
                }
            }
            RequestHeader::Upgrade(u) => {
                if u.eq_ignore_ascii_case("websocket") {
                    self.conn_type = ConnectionType::WebSocket;
                }
            }
            RequestHeader::Accept(a) => {
                if self.conn_type == ConnectionType::Http && contains_ignore_case(a, "text/event-stream") {
                    self.conn_type = ConnectionType::EventStream;
                }
            }
            _ => {}
        }

        self.headers.push(Header::new(name, value));
        Ok(())
    }

    /// Add `a=1&b=2` style parameters, percent decoding names and values.
    pub(crate) fn add_get_params(&mut self, query: &str) {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            self.params.push(Param::new(
                url_decode(name).into_owned(),
                url_decode(value).into_owned(),
                false,
                false,
                0,
            ));
        }
    }

    pub(crate) fn add_param(&mut self, param: Param) {
        self.params.push(param);
    }

    pub(crate) fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    /// Drop every header no handler asked for, unless one asked for [`ANY_HEADER`].
    pub(crate) fn remove_uninteresting_headers(&mut self) {
        if self.interesting_headers.iter().any(|h| h == ANY_HEADER) {
            return;
        }
        let interesting = &self.interesting_headers;
        self.headers
            .retain(|h| interesting.iter().any(|name| h.is(name)));
    }

    pub(crate) fn call_disconnect_callback(&mut self) {
        if let Some(cb) = self.disconnect_callback.take() {
            cb();
        }
    }

    /// `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Request method as sent on the wire.
    pub fn method_to_string(&self) -> &'static str {
        self.method.as_str()
    }

    /// Percent decoded path, without the query string.
    pub fn url(&self) -> Cow<'_, str> {
        url_decode(&self.url)
    }

    /// Path exactly as received, without the query string.
    pub fn raw_url(&self) -> &str {
        &self.url
    }

    /// Value of the `Host` header.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Media type of the body, without parameters.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Declared body length.
    pub fn content_length(&self) -> usize {
        self.content_length
    }

    /// The body is `multipart/*`.
    pub fn is_multipart(&self) -> bool {
        self.is_multipart
    }

    /// Kind of connection the client asked for.
    pub fn conn_type(&self) -> ConnectionType {
        self.conn_type
    }

    /// Whether the requested connection type is one of `expected`.
    pub fn is_expected_conn_type(&self, expected: &[ConnectionType]) -> bool {
        expected.contains(&self.conn_type)
    }

    /// Ask the parser to keep header `name`.  Must be called while the request is being
    /// matched to a handler; [`ANY_HEADER`] keeps all of them.
    pub fn add_interesting_header(&mut self, name: &str) {
        if !self.interesting_headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            self.interesting_headers.push(name.to_string());
        }
    }

    /// Kept headers.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First kept header called `name`.
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.is(name))
    }

    /// Whether a header called `name` was kept.
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// All parameters: query, form and file.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Parameter `name` from the body (`post`) or the query string, optionally a file.
    pub fn param(&self, name: &str, post: bool, file: bool) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name == name && p.is_post == post && p.is_file == file)
    }

    /// Whether [`param`](Self::param) would find something.
    pub fn has_param(&self, name: &str, post: bool, file: bool) -> bool {
        self.param(name, post, file).is_some()
    }

    /// Value of the first parameter called `name` regardless of where it came from.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|p| p.name == name).map(|p| p.value())
    }

    /// Whether any parameter is called `name`.
    pub fn has_arg(&self, name: &str) -> bool {
        self.arg(name).is_some()
    }

    /// Capture group `index` of a regex route.
    pub fn path_arg(&self, index: usize) -> Option<&str> {
        self.path_params.get(index).map(String::as_str)
    }

    /// Raw body, once complete.  `None` for form and multipart bodies, bodies streamed to a
    /// body callback and bodies that exceeded the configured maximum.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// The declared body exceeded the configured maximum and was not buffered.
    pub fn body_too_large(&self) -> bool {
        self.body_too_large
    }

    /// Attach a handler owned object to the request, dropped with it.
    pub fn set_temp_object(&mut self, object: Box<dyn Any>) {
        self.temp_object = Some(object);
    }

    /// The attached object, if it is a `T`.
    pub fn temp_object_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.temp_object.as_mut().and_then(|o| o.downcast_mut::<T>())
    }

    /// Detach the attached object.
    pub fn take_temp_object(&mut self) -> Option<Box<dyn Any>> {
        self.temp_object.take()
    }

    /// Run `callback` when the connection goes away.
    pub fn on_disconnect(&mut self, callback: impl FnOnce() + 'static) {
        self.disconnect_callback = Some(Box::new(callback));
    }

    /// Attach the response for this request.  Only the first response is kept; a response
    /// whose source is already unusable is replaced by a 500.
    pub fn send(&mut self, response: Response) {
        if self.response.is_some() {
            warn!("response already attached, ignoring another");
            return;
        }
        if !response.source_valid() {
            warn!("response source invalid, sending 500");
            self.response = Some(Response::status(StatusCode::INTERNAL_SERVER_ERROR));
            return;
        }
        self.response = Some(response);
    }

    /// Send an empty response with `code`.
    pub fn send_status(&mut self, code: StatusCode) {
        self.send(Response::status(code));
    }

    /// Send `content` with `code` and `content_type`.
    pub fn send_text(
        &mut self,
        code: StatusCode,
        content_type: &str,
        content: impl Into<Cow<'static, str>>,
    ) {
        self.send(Response::text(code, content_type, content));
    }

    /// Send a `302 Found` pointing at `url`.
    pub fn redirect(&mut self, url: &str) {
        let mut response = Response::status(StatusCode::FOUND);
        response.add_header(RESP_HEAD_LOCATION, url);
        self.send(response);
    }

    /// Whether a response has been attached.
    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Check the `Authorization` header against `username` and `password`.  With
    /// `password_is_hash`, `password` is an HA1 hash for Digest or the raw base64 credentials
    /// for Basic.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        realm: Option<&str>,
        password_is_hash: bool,
    ) -> bool {
        if self.authorization.is_empty() {
            return false;
        }
        if self.is_digest {
            let expected = DigestCredentials {
                username,
                password,
                realm,
                password_is_hash,
                ..Default::default()
            };
            check_digest_authentication(&self.authorization, self.method_to_string(), &expected)
        } else if !password_is_hash {
            check_basic_authentication(&self.authorization, username, password)
        } else {
            self.authorization == password
        }
    }

    /// Check the `Authorization` header against a stored hash: `user:realm:HA1` for Digest,
    /// the base64 credentials for Basic.
    pub fn authenticate_hash(&self, hash: &str) -> bool {
        if self.authorization.is_empty() || hash.is_empty() {
            return false;
        }
        if !self.is_digest {
            return self.authorization == hash;
        }

        let mut parts = hash.splitn(3, ':');
        let (Some(username), Some(realm), Some(ha1)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if username.is_empty() || realm.is_empty() {
            return false;
        }

        let expected = DigestCredentials {
            username,
            password: ha1,
            realm: Some(realm),
            password_is_hash: true,
            ..Default::default()
        };
        check_digest_authentication(&self.authorization, self.method_to_string(), &expected)
    }

    /// Answer with `401 Unauthorized` and a Basic or Digest challenge for `realm`.  The
    /// connection stays open so the client can retry with credentials.
    pub fn request_authentication(&mut self, realm: Option<&str>, digest: bool) {
        let challenge = if digest {
            format!(
                "Digest {}",
                request_digest_authentication(realm, self.nonce_seeds)
            )
        } else {
            format!("Basic realm=\"{}\"", realm.unwrap_or("Login Required"))
        };

        let mut response = Response::status(StatusCode::UNAUTHORIZED).reuse_connection();
        response.add_header(RESP_HEAD_WWW_AUTHENTICATE, &challenge);
        self.send(response);
    }
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    let lower_pos = content_type
        .as_bytes()
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"boundary="))?;
    let boundary = content_type[lower_pos + 9..]
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .replace('"', "");

    if boundary.is_empty() { None } else { Some(boundary) }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn request(lines: &[&str]) -> Request {
        let mut req = Request::new((1, 2));
        req.parse_request_line(lines[0].as_bytes()).unwrap();
        for line in &lines[1..] {
            req.parse_header_line(line.as_bytes()).unwrap();
        }
        req
    }

    #[test]
    fn test_request_line() {
        let req = request(&["GET /a%20b/c?x=1&y=two%20words&flag HTTP/1.1"]);
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.raw_url(), "/a%20b/c");
        assert_eq!(req.url(), "/a b/c");
        assert_eq!(req.version(), 1);
        assert_eq!(req.arg("x"), Some("1"));
        assert_eq!(req.arg("y"), Some("two words"));
        assert_eq!(req.arg("flag"), Some(""));
        assert!(req.has_param("y", false, false));
        assert!(!req.has_param("y", true, false));

        let req = request(&["DELETE /thing HTTP/1.0"]);
        assert_eq!(req.method(), Method::DELETE);
        assert_eq!(req.version(), 0);
    }

    #[test]
    fn test_request_line_errors() {
        let mut req = Request::new((0, 0));
        assert_eq!(
            req.parse_request_line(b"BREW /pot HTTP/1.1"),
            Err(RequestError::ProtocolError("unknown http method"))
        );
        assert!(req.parse_request_line(b"GET").is_err());
        assert!(req.parse_request_line(b"GET  HTTP/1.1").is_err());
        assert_eq!(
            req.parse_request_line(b"GET /x"),
            Err(RequestError::ProtocolError("malformed http version"))
        );
        assert!(req.parse_request_line(b"GET /x FTP/1.0").is_err());
    }

    #[test]
    fn test_headers() {
        let req = request(&[
            "POST /upload HTTP/1.1",
            "host: device.local",
            "Content-Type: multipart/form-data; boundary=\"----abc\"",
            "Content-Length: 42",
            "Expect: 100-continue",
            "X-Custom:  spaced  ",
        ]);
        assert_eq!(req.host(), "device.local");
        assert_eq!(req.content_type(), "multipart/form-data");
        assert!(req.is_multipart());
        assert_eq!(req.boundary, "----abc");
        assert_eq!(req.content_length(), 42);
        assert!(req.expecting_continue);
        assert_eq!(req.header("x-custom").unwrap().value(), "spaced");
        assert!(req.has_header("HOST"));
    }

    #[test]
    fn test_header_errors() {
        let mut req = Request::new((0, 0));
        assert!(req.parse_header_line(b"no colon here").is_err());
        assert!(req.parse_header_line(b": empty name").is_err());
        assert!(req.parse_header_line(b"Content-Length: lots").is_err());
        assert!(req.parse_header_line(b"Content-Type: multipart/form-data").is_err());
    }

    #[test]
    fn test_connection_type() {
        let req = request(&["GET /ws HTTP/1.1", "Upgrade: WebSocket"]);
        assert_eq!(req.conn_type(), ConnectionType::WebSocket);

        let req = request(&["GET /events HTTP/1.1", "Accept: text/event-stream"]);
        assert_eq!(req.conn_type(), ConnectionType::EventStream);
        assert!(req.is_expected_conn_type(&[ConnectionType::Http, ConnectionType::EventStream]));
    }

    #[test]
    fn test_interesting_headers() {
        let mut req = request(&[
            "GET /events HTTP/1.1",
            "Host: x",
            "Last-Event-ID: 42",
            "User-Agent: test",
        ]);
        req.add_interesting_header("last-event-id");
        req.remove_uninteresting_headers();
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header("Last-Event-ID").unwrap().value(), "42");
        // dedicated fields survive the filter
        assert_eq!(req.host(), "x");

        let mut req = request(&["GET / HTTP/1.1", "Host: x", "User-Agent: test"]);
        req.add_interesting_header(ANY_HEADER);
        req.remove_uninteresting_headers();
        assert_eq!(req.headers().len(), 2);
    }

    #[test]
    fn test_methods_mask() {
        let m = Methods::GET | Methods::POST;
        assert!(m.contains(Method::GET));
        assert!(m.contains(Method::POST));
        assert!(!m.contains(Method::PUT));
        assert!(Methods::ANY.contains(Method::OPTIONS));
    }

    #[test]
    fn test_basic_authenticate() {
        let req = request(&["GET / HTTP/1.1", "Authorization: Basic YWRtaW46c2VjcmV0"]);
        assert!(req.authenticate("admin", "secret", None, false));
        assert!(!req.authenticate("admin", "wrong", None, false));
        assert!(req.authenticate_hash("YWRtaW46c2VjcmV0"));

        let req = request(&["GET / HTTP/1.1"]);
        assert!(!req.authenticate("admin", "secret", None, false));
    }

    #[test]
    fn test_request_authentication() {
        let mut req = request(&["GET / HTTP/1.1"]);
        req.request_authentication(Some("dev"), false);
        let resp = req.response.as_ref().unwrap();
        assert_eq!(resp.code(), 401);
        assert_eq!(
            resp.headers().iter().find(|h| h.is("WWW-Authenticate")).unwrap().value(),
            "Basic realm=\"dev\""
        );

        let mut req = request(&["GET / HTTP/1.1"]);
        req.request_authentication(None, true);
        let resp = req.response.as_ref().unwrap();
        let challenge = resp.headers()[0].value();
        assert!(challenge.starts_with("Digest realm=\"httplite\", qop=\"auth\""));
    }

    #[test]
    fn test_single_response() {
        let mut req = request(&["GET / HTTP/1.1"]);
        req.send_status(StatusCode::OK);
        req.send_status(StatusCode::NOT_FOUND);
        assert_eq!(req.response.as_ref().unwrap().code(), 200);
    }

    #[test]
    fn test_temp_object() {
        let mut req = request(&["GET / HTTP/1.1"]);
        req.set_temp_object(Box::new(7usize));
        *req.temp_object_mut::<usize>().unwrap() += 1;
        assert_eq!(req.temp_object_mut::<usize>(), Some(&mut 8));
        assert!(req.temp_object_mut::<u8>().is_none());
    }
}
