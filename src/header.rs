use alloc::string::String;
use alloc::vec::Vec;

use crate::ascii::{COLON, CRLF, SP, atoi};

/// Host
pub const REQ_HEAD_HOST: &str = "Host";
/// Upgrade
pub const REQ_HEAD_UPGRADE: &str = "Upgrade";
/// Accept
pub const REQ_HEAD_ACCEPT: &str = "Accept";
/// Authorization
pub const REQ_HEAD_AUTHORIZATION: &str = "Authorization";
/// Expect
pub const REQ_HEAD_EXPECT: &str = "Expect";
/// Connection
pub const REQ_HEAD_CONNECTION: &str = "Connection";
/// Origin
pub const REQ_HEAD_ORIGIN: &str = "Origin";
/// Content-Length
pub const REQ_HEAD_CONTENT_LENGTH: &str = "Content-Length";
/// Content-Type
pub const REQ_HEAD_CONTENT_TYPE: &str = "Content-Type";
/// Content-Disposition (multipart part headers)
pub const REQ_HEAD_CONTENT_DISPOSITION: &str = "Content-Disposition";
/// Last-Event-ID
pub const REQ_HEAD_LAST_EVENT_ID: &str = "Last-Event-ID";
/// Sec-WebSocket-Key
pub const REQ_HEAD_SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
/// Sec-WebSocket-Version
pub const REQ_HEAD_SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";
/// Sec-WebSocket-Protocol
pub const REQ_HEAD_SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";

/// Accept-Ranges
pub const RESP_HEAD_ACCEPT_RANGES: &str = "Accept-Ranges";
/// Cache-Control
pub const RESP_HEAD_CACHE_CONTROL: &str = "Cache-Control";
/// Connection
pub const RESP_HEAD_CONNECTION: &str = "Connection";
/// Content-Length
pub const RESP_HEAD_CONTENT_LENGTH: &str = "Content-Length";
/// Content-Type
pub const RESP_HEAD_CONTENT_TYPE: &str = "Content-Type";
/// Location
pub const RESP_HEAD_LOCATION: &str = "Location";
/// Transfer-Encoding
pub const RESP_HEAD_TRANSFER_ENCODING: &str = "Transfer-Encoding";
/// Upgrade
pub const RESP_HEAD_UPGRADE: &str = "Upgrade";
/// WWW-Authenticate
pub const RESP_HEAD_WWW_AUTHENTICATE: &str = "WWW-Authenticate";
/// Sec-WebSocket-Accept
pub const RESP_HEAD_SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
/// Sec-WebSocket-Protocol
pub const RESP_HEAD_SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";
/// Sec-WebSocket-Version
pub const RESP_HEAD_SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";

/// A single header line.  Names compare case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Build a header from a name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Header name as received or as added.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header value, without surrounding whitespace.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Case insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub(crate) fn encode(&self, dest: &mut Vec<u8>) {
        encode_header(dest, &self.name, &self.value);
    }
}

pub(crate) fn encode_header(dest: &mut Vec<u8>, name: &str, value: &str) {
    dest.extend_from_slice(name.as_bytes());
    dest.extend_from_slice(&[COLON, SP]);
    dest.extend_from_slice(value.as_bytes());
    dest.extend_from_slice(CRLF);
}

/// The request headers the parser consumes into dedicated request fields.  Everything else is
/// `Other` and only survives when a handler declared interest in it.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestHeader<'a> {
    Host(&'a str),
    ContentType(&'a str),
    ContentLength(usize),
    Expect(&'a str),
    Authorization(&'a str),
    Upgrade(&'a str),
    Accept(&'a str),
    Other(&'a str, &'a str),
}

impl<'a> TryFrom<(&'a str, &'a str)> for RequestHeader<'a> {
    type Error = &'static str;

    fn try_from(value: (&'a str, &'a str)) -> Result<Self, Self::Error> {
        match value.0 {
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_HOST) => Ok(RequestHeader::Host(value.1)),
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_CONTENT_TYPE) => {
                Ok(RequestHeader::ContentType(value.1))
            }
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_CONTENT_LENGTH) => {
                Ok(RequestHeader::ContentLength(
                    atoi(value.1.as_bytes()).ok_or("invalid content-length")?,
                ))
            }
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_EXPECT) => {
                Ok(RequestHeader::Expect(value.1))
            }
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_AUTHORIZATION) => {
                Ok(RequestHeader::Authorization(value.1))
            }
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_UPGRADE) => {
                Ok(RequestHeader::Upgrade(value.1))
            }
            _ if value.0.eq_ignore_ascii_case(REQ_HEAD_ACCEPT) => {
                Ok(RequestHeader::Accept(value.1))
            }
            _ => Ok(RequestHeader::Other(value.0, value.1)),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_request_header_classification() {
        assert_eq!(
            RequestHeader::try_from(("content-length", "12")),
            Ok(RequestHeader::ContentLength(12))
        );
        assert_eq!(
            RequestHeader::try_from(("HOST", "example.com")),
            Ok(RequestHeader::Host("example.com"))
        );
        assert_eq!(
            RequestHeader::try_from(("X-Thing", "1")),
            Ok(RequestHeader::Other("X-Thing", "1"))
        );
        assert!(RequestHeader::try_from(("Content-Length", "twelve")).is_err());
    }

    #[test]
    fn test_header_encode() {
        let mut out = Vec::new();
        let h = Header::new("Cache-Control", "no-cache");
        h.encode(&mut out);
        assert_eq!(out.as_slice(), b"Cache-Control: no-cache\r\n");
        assert!(h.is("cache-control"));
    }
}
