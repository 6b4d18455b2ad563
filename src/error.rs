use std::io;

use httparse;

use crate::enums::Method;

quick_error! {
    /// Everything that can go wrong while serving a request.
    ///
    /// Transport and syntax errors terminate the connection; the
    /// remaining variants are produced by handlers and converted into
    /// canonical responses before the connection is closed.
    #[derive(Debug)]
    pub enum Error {
        /// Socket I/O failed or timed out
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        /// The request head does not parse
        ParseError(err: httparse::Error) {
            description("parse error")
            display("parse error: {:?}", err)
            from()
        }
        /// The peer violated the protocol in some other way
        Protocol(msg: &'static str) {
            description("protocol error")
            display("protocol error: {}", msg)
        }
        /// No route matched the request path
        NotFound {
            description("not found")
        }
        /// A route matched the path under a different method
        MethodNotAllowed(allow: Vec<Method>) {
            description("method not allowed")
        }
        /// The request body exceeds what the handler is willing to read
        PayloadTooLarge {
            description("payload too large")
        }
        /// Handler failure or a violated API contract
        Internal(err: Box<dyn std::error::Error + Send + Sync>) {
            description("internal error")
            display("internal error: {}", err)
            cause(&**err)
        }
    }
}

impl Error {
    /// Wrap any error (or message) as an internal server error.
    pub fn internal<E>(err: E) -> Error
        where E: Into<Box<dyn std::error::Error + Send + Sync>>
    {
        Error::Internal(err.into())
    }

    /// The status code this error is reported to the client with, or
    /// `None` when the connection is beyond a coherent response.
    pub fn status_code(&self) -> Option<u16> {
        match *self {
            Error::ParseError(..) | Error::Protocol(..) => Some(400),
            // a misframed body surfaces as InvalidData from the reader
            Error::Io(ref e) if e.kind() == io::ErrorKind::InvalidData
                => Some(400),
            Error::Io(..) => None,
            Error::NotFound => Some(404),
            Error::MethodNotAllowed(..) => Some(405),
            Error::PayloadTooLarge => Some(413),
            Error::Internal(..) => Some(500),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    fn send_sync<T: Send + Sync>(_: &T) {}

    #[test]
    fn error_is_send_sync() {
        send_sync(&Error::NotFound);
    }

    #[test]
    fn internal_from_str() {
        let e = Error::internal("continuation invoked twice");
        assert_eq!(e.status_code(), Some(500));
        assert_eq!(format!("{}", e),
            "internal error: continuation invoked twice");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::Protocol("x").status_code(), Some(400));
        assert_eq!(Error::NotFound.status_code(), Some(404));
        assert_eq!(Error::PayloadTooLarge.status_code(), Some(413));
        let io = Error::from(
            std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert_eq!(io.status_code(), None);
    }
}
