//! RFC 6455 WebSocket support: the upgrade handshake, the frame
//! codec, and the manager thread that owns all upgraded connections.

mod frames;
mod handler;
mod manager;

pub use self::frames::Packet;
pub use self::handler::{WebSocketHandler, WebSocketMessageHandler};
pub use self::manager::{ConnectionId, ManagerHandle, WebSocketManager,
    WsConnection};

use std::fmt;
use std::str::from_utf8_unchecked;
use std::time::Duration;

use sha1::Sha1;

use crate::enums::Method;
use crate::error::Error;
use crate::request::Request;

/// WebSocket GUID constant (provided by spec)
pub const GUID: &'static str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The `Sec-WebSocket-Accept` header value
///
/// Formats itself straight into the header, so the upgrade handler
/// can pass it to `set_header` via `to_string`.
pub struct Accept([u8; 20]);

impl Accept {
    /// Create an Accept header value from a key received in header
    ///
    /// Note: key here is a key as passed in header value
    /// (base64-encoded) and is not validated (which is not required
    /// by spec)
    pub fn from_key_bytes(key: &[u8]) -> Accept {
        let mut sha1 = Sha1::new();
        sha1.update(key);
        sha1.update(GUID.as_bytes());
        Accept(sha1.digest().bytes())
    }
}

impl fmt::Display for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const CHARS: &'static [u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                                       abcdefghijklmnopqrstuvwxyz\
                                       0123456789+/";
        let mut buf = [0u8; 28];
        for i in 0..6 {
            let n = ((self.0[i*3+0] as usize) << 16) |
                    ((self.0[i*3+1] as usize) <<  8) |
                     (self.0[i*3+2] as usize) ;
            buf[i*4+0] = CHARS[(n >> 18) & 63];
            buf[i*4+1] = CHARS[(n >> 12) & 63];
            buf[i*4+2] = CHARS[(n >>  6) & 63];
            buf[i*4+3] = CHARS[(n >>  0) & 63];
        }
        let n = ((self.0[18] as usize) << 16) |
                ((self.0[19] as usize) <<  8);
        buf[24] = CHARS[(n >> 18) & 63];
        buf[25] = CHARS[(n >> 12) & 63];
        buf[26] = CHARS[(n >> 6) & 63];
        buf[27] = b'=';
        fmt::Write::write_str(f, unsafe {
            from_utf8_unchecked(&buf)
        })
    }
}

impl fmt::Debug for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "websocket::Accept({})", self)
    }
}

/// Check that a request is a well-formed WebSocket upgrade and
/// compute the accept token.
///
/// Only `GET` requests carrying `Upgrade: websocket`, a `Connection`
/// header listing `upgrade`, `Sec-WebSocket-Version: 13` and a
/// `Sec-WebSocket-Key` qualify. Anything else is a protocol error,
/// which the exception handler turns into a `400`.
pub fn validate_upgrade(req: &Request) -> Result<Accept, Error> {
    if *req.method() != Method::Get {
        debug!("websocket upgrade with method {}", req.method());
        return Err(Error::Protocol("websocket upgrade must be GET"));
    }
    let upgrade_ok = req.headers().get("Upgrade")
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        debug!("missing Upgrade: websocket");
        return Err(Error::Protocol("missing websocket upgrade header"));
    }
    if !req.headers().has_token("Connection", "upgrade") {
        debug!("missing Connection: Upgrade");
        return Err(Error::Protocol(
            "missing Connection: Upgrade header"));
    }
    let version_ok = req.headers().get("Sec-WebSocket-Version")
        .map(|v| v.trim() == "13")
        .unwrap_or(false);
    if !version_ok {
        debug!("unsupported websocket version {:?}",
            req.headers().get("Sec-WebSocket-Version"));
        return Err(Error::Protocol("only websocket version 13 \
            is supported"));
    }
    match req.headers().get("Sec-WebSocket-Key") {
        Some(key) => Ok(Accept::from_key_bytes(key.trim().as_bytes())),
        None => {
            debug!("missing Sec-WebSocket-Key");
            Err(Error::Protocol("missing Sec-WebSocket-Key header"))
        }
    }
}

/// Tuning knobs of the WebSocket subsystem.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub(crate) max_message_size: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) tick_interval: Duration,
}

impl WebSocketConfig {
    /// Create a config with defaults
    pub fn new() -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: 10 << 20,
            idle_timeout: Duration::from_secs(60),
            tick_interval: Duration::from_millis(100),
        }
    }

    /// Maximum size of a complete (reassembled) message
    ///
    /// If a message grows larger than this, the connection is closed
    /// with code 1009.
    pub fn max_message_size(&mut self, size: usize) -> &mut Self {
        self.max_message_size = size;
        self
    }

    /// Connections idle longer than this are closed with code 1001.
    ///
    /// Any complete frame counts as activity, pings and pongs
    /// included.
    pub fn idle_timeout(&mut self, dur: Duration) -> &mut Self {
        self.idle_timeout = dur;
        self
    }

    /// Upper bound on one poll wait, so registrations and broadcasts
    /// deposited by other threads are picked up promptly.
    pub fn tick_interval(&mut self, dur: Duration) -> &mut Self {
        self.tick_interval = dur;
        self
    }

    /// Finish the builder chain with an owned copy.
    pub fn done(&mut self) -> WebSocketConfig {
        self.clone()
    }
}

#[cfg(test)]
mod test {
    use crate::request::Request;
    use super::{Accept, validate_upgrade};

    fn upgrade_request() -> crate::request::RequestBuilder {
        Request::build("GET", "/ws")
            .header("Host", "localhost")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13")
    }

    #[test]
    fn rfc_sample_accept_token() {
        let accept = Accept::from_key_bytes(b"dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept.to_string(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn valid_handshake() {
        let req = upgrade_request().done();
        let accept = validate_upgrade(&req).unwrap();
        assert_eq!(accept.to_string(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn connection_header_as_list() {
        let req = Request::build("GET", "/ws")
            .header("Upgrade", "WebSocket")
            .header("Connection", "keep-alive, Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13")
            .done();
        assert!(validate_upgrade(&req).is_ok());
    }

    #[test]
    fn wrong_method_fails() {
        let req = Request::build("POST", "/ws")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13")
            .done();
        assert!(validate_upgrade(&req).is_err());
    }

    #[test]
    fn missing_headers_fail() {
        let full = [
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ];
        for skip in full.iter().map(|&(name, _)| name) {
            let mut builder = Request::build("GET", "/ws");
            for &(name, value) in full.iter() {
                if name != skip {
                    builder = builder.header(name, value);
                }
            }
            let req = builder.done();
            assert!(validate_upgrade(&req).is_err(),
                "handshake without {} must fail", skip);
        }
    }

    #[test]
    fn bad_version_fails() {
        let req = Request::build("GET", "/ws")
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "8")
            .done();
        assert!(validate_upgrade(&req).is_err());
    }
}
