//! # Httplite-async
//!
//! `httplite-async` is an event driven HTTP/1.1 server engine aimed at `no_std` targets with a
//! heap, such as microcontrollers running a callback based TCP stack.
//!
//! This crate provides:
//!
//! * incremental parsing of requests as bytes arrive, including form posts and streamed
//!   `multipart/form-data` uploads.
//! * routing to handlers by path, prefix or (with the `regex` feature) regular expression,
//!   with rewrites and a catch-all.
//! * responses streamed under the flow control of the TCP stack: from memory, from a reader,
//!   from a callback, chunked, or through a `%placeholder%` template processor.
//! * Server-Sent-Events and WebSocket endpoints with bounded per-client queues.
//! * Basic and Digest authentication.
//!
//! This crate does **not** provide:
//!
//! * a TCP stack.  The stack drives the server through its `on_*` callbacks.
//! * TLS, HTTP/2 or keep-alive between plain requests.
//!
//! ## Basic Use
//!
//! Start by creating a [`server::Server`] and registering handlers on it.  The TCP stack then
//! reports each connection's events to the server: [`on_connect`](server::Server::on_connect)
//! with a [`transport::Transport`] for the new connection, followed by `on_data`, `on_ack`,
//! `on_poll`, `on_timeout` and `on_disconnect`.  The server never writes more than the
//! transport says it has room for and continues when bytes are acknowledged.
//!
//! Sockets implementing `embedded_io_async::{Read, Write}` can be handed to
//! [`Server::serve`](server::Server::serve) instead.
//!
//! ## Example
//!
//! ```
//! use httplite_async::config::ServerConfig;
//! use httplite_async::request::Methods;
//! use httplite_async::response::StatusCode;
//! use httplite_async::server::Server;
//! use httplite_async::transport::Transport;
//! use httplite_async::websocket::{WebSocket, WsEvent};
//!
//! const HTML_INDEX: &str = "<html>...</html>";
//!
//! // A connection of the TCP stack (not shown)
//! # #[derive(Default)]
//! # struct Socket { tx: Vec<u8> }
//! # impl Transport for Socket {
//! #     fn space(&self) -> usize { 1460 - self.tx.len().min(1460) }
//! #     fn add(&mut self, data: &[u8]) -> usize {
//! #         let n = data.len().min(self.space());
//! #         self.tx.extend_from_slice(&data[..n]);
//! #         n
//! #     }
//! #     fn can_send(&self) -> bool { true }
//! #     fn close(&mut self, _immediate: bool) {}
//! #     fn connected(&self) -> bool { true }
//! # }
//!
//! let mut server = Server::<Socket>::new(ServerConfig::default());
//! server.on("/", Methods::GET, |req| {
//!     req.send_text(StatusCode::OK, "text/html", HTML_INDEX);
//! });
//!
//! let ws = WebSocket::new("/ws");
//! ws.on_event(|ws, id, event| {
//!     if let WsEvent::Data { .. } = event {
//!         ws.text(id, "got it");
//!     }
//! });
//! server.add_handler(ws.clone());
//!
//! // called by the TCP stack
//! let id = server.on_connect(Socket::default());
//! if server.on_data(id, b"GET / HTTP/1.1\r\nHost: device\r\n\r\n").is_err() {
//!     // the connection was closed
//! }
//! server.on_disconnect(id);
//! ```
//!
//! ## Features
//!
//! * `defmt`: log through `defmt`.
//! * `log`: log through the `log` facade.
//! * `regex`: regular expression routes (implies `std`).
//! * `std`: build against the standard library.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

#[macro_use]
mod fmt;

mod ascii;
/// Authentication helpers
pub mod auth;
/// Shared WebSocket payload buffers
pub mod buffer;
/// Server configuration and limits
pub mod config;
mod connection;
/// Response content sources
pub mod content;
/// Server-Sent-Events
pub mod event_source;
/// WebSocket frames
pub mod frame;
/// Request handlers and routing
pub mod handler;
/// HTTP Headers
pub mod header;
/// Incremental request parsing
pub mod parser;
/// Outbound message queues
pub mod queue;
/// HTTP Requests
pub mod request;
/// HTTP responses
pub mod response;
/// HTTP server
pub mod server;
/// Template processing
pub mod template;
/// The TCP stack boundary
pub mod transport;
/// Websockets
pub mod websocket;
