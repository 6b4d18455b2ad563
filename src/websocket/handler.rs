use crate::error::Error;
use crate::handler::{Handler, HandlerContext};

use super::manager::{ConnectionId, WsConnection};
use super::validate_upgrade;

/// Callbacks for a single WebSocket connection.
///
/// All of them run inline on the manager thread, between polls over
/// every other connection: return promptly. Long or blocking work
/// belongs on your own threads, with results pushed back through a
/// `ManagerHandle`.
///
/// Every method has a no-op default, so implementations override only
/// what they care about.
pub trait WebSocketMessageHandler: Send {
    /// The connection finished its upgrade and is now owned by the
    /// manager.
    fn on_connection_established(&mut self, _conn: &mut WsConnection) {}

    /// A complete text message arrived.
    fn on_text_message(&mut self, _conn: &mut WsConnection,
        _text: &str) {}

    /// A complete binary message arrived.
    fn on_binary_message(&mut self, _conn: &mut WsConnection,
        _data: &[u8]) {}

    /// A ping arrived. Return `false` to suppress the automatic pong
    /// (e.g. to answer later by hand).
    fn on_ping(&mut self, _conn: &mut WsConnection, _payload: &[u8])
        -> bool
    {
        true
    }

    /// A pong arrived.
    fn on_pong(&mut self, _conn: &mut WsConnection, _payload: &[u8]) {}

    /// The peer sent a close frame. The manager answers with the
    /// echoing close frame and shuts the socket down afterwards; this
    /// callback is informational.
    fn on_close_message(&mut self, _conn: &mut WsConnection,
        _code: u16, _reason: &str) {}

    /// The socket is gone, whatever the cause. Last call for this
    /// connection.
    fn on_connection_closed(&mut self, _id: ConnectionId) {}
}

/// The HTTP handler that performs the WebSocket upgrade.
///
/// Route it wherever WebSocket clients connect:
///
/// ```rust,ignore
/// router.get("/ws", WebSocketHandler::new(|| Box::new(EchoChat)));
/// ```
///
/// For each successful handshake the factory produces the message
/// handler owning that connection; the worker then passes the socket
/// to the manager. A request that is not a well-formed upgrade gets
/// `400 Bad Request`.
pub struct WebSocketHandler<F> {
    factory: F,
}

impl<F> WebSocketHandler<F>
    where F: Fn() -> Box<dyn WebSocketMessageHandler> + Send + Sync
{
    pub fn new(factory: F) -> WebSocketHandler<F> {
        WebSocketHandler { factory: factory }
    }
}

impl<F> Handler for WebSocketHandler<F>
    where F: Fn() -> Box<dyn WebSocketMessageHandler> + Send + Sync
{
    fn handle(&self, ctx: &mut HandlerContext) -> Result<(), Error> {
        let accept = validate_upgrade(&ctx.request)?;
        if let Some(server) = ctx.server() {
            if server.websocket_manager().is_none() {
                return Err(Error::internal(
                    "websocket upgrade while websockets are disabled"));
            }
        }
        ctx.response.custom_status(101, None)?;
        ctx.response.set_header("Upgrade", "websocket")?;
        ctx.response.set_header("Connection", "Upgrade")?;
        ctx.response.set_header("Sec-WebSocket-Accept",
            &accept.to_string())?;
        ctx.response.finish()?;
        ctx.upgrade_connection((self.factory)());
        Ok(())
    }
}
