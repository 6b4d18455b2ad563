use std::io::Read;
use std::str::from_utf8;

use httparse;
use netbuf::Buf;

use crate::body::BodyKind;
use crate::enums::{Method, Version};
use crate::error::Error;
use crate::headers::Headers;

/// Number of headers to allocate on the stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Fully parsed request head. The body is framed but untouched; any
/// bytes read past the header terminator stay in the receive buffer.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub raw_query: Option<String>,
    pub version: Version,
    pub headers: Headers,
    pub body: BodyKind,
}

/// Read from `stream` into `buf` until a complete request head is
/// parsed, and strip it from the buffer.
///
/// Returns `None` when the peer closed before sending anything (the
/// normal end of a connection). A close mid-head, a head that does
/// not fit into `max_head` bytes, or malformed syntax are protocol
/// errors; socket failures and timeouts come back as I/O errors.
pub fn read_head<R: Read>(stream: &mut R, buf: &mut Buf,
    max_head: usize)
    -> Result<Option<RequestHead>, Error>
{
    loop {
        if buf.len() > 0 {
            match try_parse(&buf[..])? {
                Some((head, bytes)) => {
                    if bytes > max_head {
                        return Err(Error::Protocol(
                            "request head too large"));
                    }
                    buf.consume(bytes);
                    return Ok(Some(head));
                }
                None => {
                    if buf.len() >= max_head {
                        return Err(Error::Protocol(
                            "request head too large"));
                    }
                }
            }
        }
        let read = buf.read_from(stream)?;
        if read == 0 {
            if buf.len() == 0 {
                return Ok(None);
            }
            return Err(Error::Protocol(
                "connection closed inside request head"));
        }
    }
}

fn try_parse(data: &[u8])
    -> Result<Option<(RequestHead, usize)>, Error>
{
    let mut stack_headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
    let mut vec_headers;
    let mut raw = httparse::Request::new(&mut stack_headers);
    let mut parsed = raw.parse(data);
    if matches!(parsed, Err(httparse::Error::TooManyHeaders)) {
        vec_headers = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
        raw = httparse::Request::new(&mut vec_headers);
        parsed = raw.parse(data);
    }
    match parsed? {
        httparse::Status::Complete(bytes) => {
            let head = build_head(&raw)?;
            Ok(Some((head, bytes)))
        }
        httparse::Status::Partial => Ok(None),
    }
}

fn build_head(raw: &httparse::Request) -> Result<RequestHead, Error> {
    let method = Method::from(raw.method.expect("complete request"));
    let version = match raw.version.expect("complete request") {
        0 => Version::Http10,
        _ => Version::Http11,
    };

    let target = raw.path.expect("complete request");
    if !target.starts_with('/') {
        // only origin-form targets reach handlers; a reverse proxy in
        // front takes care of absolute-form
        return Err(Error::Protocol("request target is not origin-form"));
    }
    let (path, raw_query) = match target.find('?') {
        Some(at) => (target[..at].to_string(),
                     Some(target[at+1..].to_string())),
        None => (target.to_string(), None),
    };

    let mut headers = Headers::new();
    for h in raw.headers.iter() {
        let value = from_utf8(h.value)
            .map_err(|_| Error::Protocol("header value is not \
                valid UTF-8"))?;
        headers.add(h.name, value);
    }

    let body = body_framing(&headers)?;

    Ok(RequestHead {
        method: method,
        path: path,
        raw_query: raw_query,
        version: version,
        headers: headers,
        body: body,
    })
}

/// Implements the request body length rules of RFC 7230 §3.3.3:
/// a chunked `Transfer-Encoding` wins, then a single valid
/// `Content-Length`, otherwise there is no body.
fn body_framing(headers: &Headers) -> Result<BodyKind, Error> {
    let mut transfer_encoding = None;
    for value in headers.all("Transfer-Encoding") {
        transfer_encoding = value.split(',').last();
    }
    if let Some(encoding) = transfer_encoding {
        if encoding.trim().eq_ignore_ascii_case("chunked") {
            return Ok(BodyKind::Chunked);
        }
        return Err(Error::Protocol("unsupported transfer encoding"));
    }

    let mut lengths = headers.all("Content-Length");
    match lengths.next() {
        Some(first) => {
            if lengths.any(|other| other != first) {
                return Err(Error::Protocol(
                    "conflicting Content-Length headers"));
            }
            let n = first.trim().parse::<u64>()
                .map_err(|_| Error::Protocol(
                    "invalid Content-Length header"))?;
            Ok(BodyKind::Fixed(n))
        }
        None => Ok(BodyKind::Empty),
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Cursor, Read};
    use netbuf::Buf;

    use crate::body::BodyKind;
    use crate::enums::{Method, Version};
    use crate::error::Error;
    use super::{RequestHead, read_head};

    /// Serves its input one byte per read, like a slow peer.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    fn parse(wire: &[u8]) -> Result<Option<RequestHead>, Error> {
        let mut buf = Buf::new();
        read_head(&mut Cursor::new(wire.to_vec()), &mut buf, 8192)
    }

    #[test]
    fn simple_get() {
        let head = parse(
            b"GET /hello?name=world HTTP/1.1\r\n\
              Host: example.com\r\n\
              \r\n").unwrap().unwrap();
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.path, "/hello");
        assert_eq!(head.raw_query.as_ref().map(|s| s.as_str()),
            Some("name=world"));
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.headers.get("host"), Some("example.com"));
        assert_eq!(head.body, BodyKind::Empty);
    }

    #[test]
    fn byte_at_a_time() {
        let wire = b"POST /x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc";
        let mut buf = Buf::new();
        let head = read_head(
            &mut Trickle(Cursor::new(wire.to_vec())), &mut buf, 8192)
            .unwrap().unwrap();
        assert_eq!(head.method, Method::Post);
        assert_eq!(head.body, BodyKind::Fixed(3));
    }

    #[test]
    fn leftover_stays_in_buffer() {
        let wire = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut buf = Buf::new();
        read_head(&mut Cursor::new(wire.to_vec()), &mut buf, 8192)
            .unwrap().unwrap();
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn unknown_method_is_kept() {
        let head = parse(b"PROPFIND / HTTP/1.1\r\n\r\n")
            .unwrap().unwrap();
        assert_eq!(head.method,
            Method::Other("PROPFIND".to_string()));
    }

    #[test]
    fn chunked_framing_detected() {
        let head = parse(
            b"POST /up HTTP/1.1\r\n\
              Transfer-Encoding: gzip, chunked\r\n\
              \r\n").unwrap().unwrap();
        assert_eq!(head.body, BodyKind::Chunked);
    }

    #[test]
    fn chunked_overrides_content_length() {
        let head = parse(
            b"POST /up HTTP/1.1\r\n\
              Content-Length: 10\r\n\
              Transfer-Encoding: chunked\r\n\
              \r\n").unwrap().unwrap();
        assert_eq!(head.body, BodyKind::Chunked);
    }

    #[test]
    fn conflicting_content_length() {
        assert_matches!(parse(
            b"POST /x HTTP/1.1\r\n\
              Content-Length: 3\r\n\
              Content-Length: 4\r\n\
              \r\n"),
            Err(Error::Protocol(..)));
    }

    #[test]
    fn repeated_equal_content_length_is_accepted() {
        let head = parse(
            b"POST /x HTTP/1.1\r\n\
              Content-Length: 3\r\n\
              Content-Length: 3\r\n\
              \r\n").unwrap().unwrap();
        assert_eq!(head.body, BodyKind::Fixed(3));
    }

    #[test]
    fn invalid_content_length() {
        assert_matches!(parse(
            b"POST /x HTTP/1.1\r\nContent-Length: ten\r\n\r\n"),
            Err(Error::Protocol(..)));
    }

    #[test]
    fn malformed_request_line() {
        assert_matches!(parse(b"GET / TTMP/2.0\r\n\r\n"),
            Err(Error::ParseError(..)));
    }

    #[test]
    fn absolute_form_rejected() {
        assert_matches!(parse(
            b"GET http://example.com/x HTTP/1.1\r\n\r\n"),
            Err(Error::Protocol(..)));
    }

    #[test]
    fn clean_eof_is_none() {
        assert_matches!(parse(b""), Ok(None));
    }

    #[test]
    fn eof_mid_head() {
        assert_matches!(parse(b"GET / HTTP/1.1\r\nHost:"),
            Err(Error::Protocol(..)));
    }

    #[test]
    fn oversized_head() {
        let mut wire = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..300 {
            wire.extend_from_slice(
                format!("X-Pad-{}: {}\r\n", i, "y".repeat(60))
                    .as_bytes());
        }
        wire.extend_from_slice(b"\r\n");
        let mut buf = Buf::new();
        let res = read_head(&mut Cursor::new(wire), &mut buf, 1024);
        assert_matches!(res, Err(Error::Protocol(..)));
    }
}
