use crate::error::Error;
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::server::ServerHandle;
use crate::websocket::WebSocketMessageHandler;

/// Everything a handler gets to see for one request/response
/// exchange.
///
/// Owns the request and the response writer for the duration of the
/// exchange; the serving worker takes them back when the handler
/// returns. The server handle is the way back into the core: stopping
/// the server, checking readiness, reaching the WebSocket manager.
pub struct HandlerContext {
    pub request: Request,
    pub response: ResponseWriter,
    server: Option<ServerHandle>,
    worker_id: usize,
    pub(crate) upgrade: Option<Box<dyn WebSocketMessageHandler>>,
}

impl HandlerContext {
    /// Context without a running server behind it, for handler tests.
    pub fn detached(request: Request, response: ResponseWriter)
        -> HandlerContext
    {
        HandlerContext {
            request: request,
            response: response,
            server: None,
            worker_id: 0,
            upgrade: None,
        }
    }

    pub(crate) fn for_worker(request: Request, response: ResponseWriter,
        server: ServerHandle, worker_id: usize)
        -> HandlerContext
    {
        HandlerContext {
            request: request,
            response: response,
            server: Some(server),
            worker_id: worker_id,
            upgrade: None,
        }
    }

    /// Handle of the server this exchange runs on. `None` only in
    /// detached test contexts.
    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    /// Index of the worker thread serving this exchange.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Ask the worker to hand this connection over to the WebSocket
    /// manager once the (already flushed) `101` response is out.
    ///
    /// Called by the upgrade handler; user code normally never calls
    /// this directly.
    pub fn upgrade_connection(&mut self,
        handler: Box<dyn WebSocketMessageHandler>)
    {
        self.upgrade = Some(handler);
    }

    pub(crate) fn into_parts(self)
        -> (Request, ResponseWriter,
            Option<Box<dyn WebSocketMessageHandler>>)
    {
        (self.request, self.response, self.upgrade)
    }
}

/// The request-handling capability.
///
/// One operation: look at the context, leave a response behind.
/// Failures propagate to the exception handler, which turns them into
/// canonical error responses.
///
/// Implemented by closures, so most handlers need no named type:
///
/// ```rust,ignore
/// router.get("/hello", |ctx: &mut HandlerContext| {
///     ctx.response.send_str("text/plain", "Hello world!")
/// });
/// ```
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &mut HandlerContext) -> Result<(), Error>;
}

impl<F> Handler for F
    where F: Fn(&mut HandlerContext) -> Result<(), Error> + Send + Sync
{
    fn handle(&self, ctx: &mut HandlerContext) -> Result<(), Error> {
        self(ctx)
    }
}

impl Handler for Box<dyn Handler> {
    fn handle(&self, ctx: &mut HandlerContext) -> Result<(), Error> {
        (**self).handle(ctx)
    }
}

#[cfg(test)]
mod test {
    use crate::request::Request;
    use crate::response::ResponseWriter;
    use super::{Handler, HandlerContext};

    #[test]
    fn closures_are_handlers() {
        let handler = |ctx: &mut HandlerContext| {
            ctx.response.send_str("text/plain", "ok")
        };
        let req = Request::build("GET", "/").done();
        let resp = ResponseWriter::for_sink(Box::new(Vec::new()));
        let mut ctx = HandlerContext::detached(req, resp);
        handler.handle(&mut ctx).unwrap();
        assert_eq!(ctx.response.status_code(), 200);
        assert!(ctx.server().is_none());
    }
}
