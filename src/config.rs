//! Server wide configuration.
//!
//! A [`ServerConfig`] is handed to [`Server::new`](crate::server::Server::new) once and consulted
//! by every connection.  Limits exist so that a single peer cannot make the server buffer an
//! unbounded amount of data.
//!
//! ```
//! use httplite_async::config::ServerConfig;
//! use httplite_async::header::Header;
//!
//! let config = ServerConfig {
//!     default_headers: vec![Header::new("Access-Control-Allow-Origin", "*")],
//!     max_body_size: 4 * 1024,
//!     ..ServerConfig::default()
//! };
//! # let _ = config;
//! ```

use alloc::vec::Vec;

use crate::header::Header;

/// Outbound SSE messages held per client before new ones are dropped.
pub const SSE_MAX_QUEUED_MESSAGES: usize = 32;
/// SSE clients accepted per event source unless configured otherwise.
pub const DEFAULT_MAX_SSE_CLIENTS: usize = 8;
/// Outbound WebSocket messages held per client before new ones are dropped.
pub const WS_MAX_QUEUED_MESSAGES: usize = 32;
/// WebSocket clients kept by [`WebSocket::cleanup_clients`](crate::websocket::WebSocket::cleanup_clients)
/// by default.
pub const DEFAULT_MAX_WS_CLIENTS: usize = 8;

/// Configuration shared by all connections of a server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Headers added to the head of every response, ahead of handler supplied headers
    /// (default: none).
    pub default_headers: Vec<Header>,

    /// Largest raw (non form, non multipart) request body buffered for a handler
    /// (default: `16384`).
    ///
    /// Bodies declaring a larger `Content-Length` are counted but not stored, and
    /// [`Request::body_too_large`](crate::request::Request::body_too_large) reports it.
    pub max_body_size: usize,

    /// Longest request line, header line or multipart part header accepted (default: `2048`).
    ///
    /// Longer lines are a protocol error and the connection is dropped.
    pub max_line_length: usize,

    /// Largest slice of an uploaded file handed to an upload callback in one call
    /// (default: `1460`, one ethernet segment of payload).
    pub upload_chunk_size: usize,

    /// Source of randomness for Digest authentication nonces (default: `None`).
    ///
    /// Without one, nonces are derived from an internal counter which makes them predictable.
    /// Targets with a hardware RNG should provide it here.
    pub entropy: Option<fn() -> u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_headers: Vec::new(),
            max_body_size: 16 * 1024,
            max_line_length: 2048,
            upload_chunk_size: 1460,
            entropy: None,
        }
    }
}
