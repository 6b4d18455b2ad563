//! An embeddable, thread-pooled HTTP/1.1 server framework.
//!
//! The core is deliberately small: an accept loop hands connections
//! to a bounded worker pool, each worker parses one request, runs it
//! through your handler (usually a [`PathRouter`] wrapped in
//! filters), and writes the response. WebSocket upgrades move the
//! socket to a single nonblocking manager thread that multiplexes
//! all upgraded connections.
//!
//! ```rust,no_run
//! use handy_http::{HandlerContext, HttpServer, PathRouter,
//!     ServerConfig};
//!
//! let mut router = PathRouter::new();
//! router.get("/hello", |ctx: &mut HandlerContext| {
//!     ctx.response.send_str("text/plain", "Hello world!")
//! });
//! let server = HttpServer::new(
//!     ServerConfig::new().port(8080).done(), router);
//! server.start().expect("server failed");
//! ```

#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod server;
pub mod websocket;
mod body;
mod enums;
mod error;
mod filter;
mod handler;
mod headers;
mod request;
mod response;
mod router;

pub use crate::body::{BodyKind, BodyReader};
pub use crate::enums::{Method, Status, Version, reason_phrase};
pub use crate::error::Error;
pub use crate::filter::{Filter, FilteredHandler, Next};
pub use crate::handler::{Handler, HandlerContext};
pub use crate::headers::Headers;
pub use crate::request::{PathParams, QueryParams, Request,
    RequestBuilder};
pub use crate::response::ResponseWriter;
pub use crate::router::PathRouter;
pub use crate::server::{HttpServer, ServerConfig, ServerHandle,
    ServerStatus};
pub use crate::websocket::{WebSocketConfig, WebSocketHandler,
    WebSocketMessageHandler};
