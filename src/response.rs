use std::io::{Read, Write};
use std::time::SystemTime;

use httpdate::fmt_http_date;

use crate::enums::{Status, reason_phrase};
use crate::error::Error;
use crate::headers::Headers;

/// Size of the copy buffer used by the streaming body helpers.
const STREAM_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    /// Nothing on the wire yet; status and headers are mutable.
    Staging,
    /// Head written, fixed framing, this many body bytes still owed.
    FixedBody { remaining: u64 },
    /// Head written, chunked framing.
    ChunkedBody,
    /// Head written for a status that must not carry a body.
    Bodyless,
    /// The message is complete.
    Done,
}

/// Writes one HTTP/1.1 response to a byte sink.
///
/// Status and headers are staged in memory and serialized on the first
/// body write (or on `finish` for bodyless responses); from then on
/// they are immutable. The framing is decided at that point:
///
/// - a caller-supplied `Content-Length` means fixed framing, and the
///   body must come to exactly that many bytes;
/// - a body of known size sets `Content-Length` automatically;
/// - otherwise the body is sent with chunked transfer coding.
///
/// Responses to HEAD requests keep their `Content-Length` but have
/// their body bytes suppressed. 1xx, 204 and 304 never carry a body.
pub struct ResponseWriter {
    sink: Box<dyn Write + Send>,
    status: u16,
    reason: Option<String>,
    headers: Headers,
    default_headers: Vec<(String, String)>,
    is_head: bool,
    state: WriteState,
}

fn invalid_header_bytes(value: &[u8]) -> bool {
    value.iter().any(|&x| x == b'\r' || x == b'\n')
}

fn bodyless_status(code: u16) -> bool {
    (code >= 100 && code < 200) || code == 204 || code == 304
}

impl ResponseWriter {
    pub(crate) fn new(sink: Box<dyn Write + Send>, is_head: bool,
        default_headers: Vec<(String, String)>)
        -> ResponseWriter
    {
        ResponseWriter {
            sink: sink,
            status: 200,
            reason: None,
            headers: Headers::new(),
            default_headers: default_headers,
            is_head: is_head,
            state: WriteState::Staging,
        }
    }

    /// A writer over a plain sink, for exercising handlers without a
    /// server.
    pub fn for_sink(sink: Box<dyn Write + Send>) -> ResponseWriter {
        ResponseWriter::new(sink, false, Vec::new())
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn is_flushed(&self) -> bool {
        self.state != WriteState::Staging
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set the status from the `Status` enum.
    pub fn status(&mut self, status: Status) -> Result<(), Error> {
        let code = status.code();
        self.custom_status(code, None)
    }

    /// Set any status code in 100..=599 with an optional custom
    /// reason phrase.
    pub fn custom_status(&mut self, code: u16, reason: Option<&str>)
        -> Result<(), Error>
    {
        if self.state != WriteState::Staging {
            return Err(Error::internal("status changed after the \
                response head was flushed"));
        }
        if code < 100 || code > 599 {
            return Err(Error::internal("status code out of range"));
        }
        self.status = code;
        self.reason = reason.map(|r| r.to_string());
        Ok(())
    }

    /// Append a header, keeping existing values of the same name.
    pub fn add_header(&mut self, name: &str, value: &str)
        -> Result<(), Error>
    {
        self.check_mutable(name, value)?;
        self.headers.add(name, value);
        Ok(())
    }

    /// Replace all values of a header.
    pub fn set_header(&mut self, name: &str, value: &str)
        -> Result<(), Error>
    {
        self.check_mutable(name, value)?;
        self.headers.set(name, value);
        Ok(())
    }

    fn check_mutable(&self, name: &str, value: &str)
        -> Result<(), Error>
    {
        if self.state != WriteState::Staging {
            return Err(Error::internal("header mutated after the \
                response head was flushed"));
        }
        if invalid_header_bytes(name.as_bytes())
            || invalid_header_bytes(value.as_bytes())
        {
            return Err(Error::internal("header contains CR or LF"));
        }
        Ok(())
    }

    /// Drop everything a failed handler staged, so the error response
    /// is not framed by its leftovers. Only meaningful before flush.
    pub(crate) fn reset_for_error(&mut self) {
        if self.state == WriteState::Staging {
            self.headers = Headers::new();
            self.reason = None;
        }
    }

    /// Serialize the head. `known_size` is the body size when the
    /// caller can tell it upfront.
    fn flush_head(&mut self, known_size: Option<u64>)
        -> Result<(), Error>
    {
        debug_assert_eq!(self.state, WriteState::Staging);

        for &(ref name, ref value) in &self.default_headers {
            if !self.headers.contains(name) {
                self.headers.add(name.as_str(), value.as_str());
            }
        }
        if !self.headers.contains("Date") {
            self.headers.add("Date", fmt_http_date(SystemTime::now()));
        }
        // keep-alive is not implemented, so advertise the close unless
        // the handler set its own Connection header (e.g. an upgrade)
        if !self.headers.contains("Connection") {
            self.headers.add("Connection", "close");
        }

        let next = if bodyless_status(self.status) {
            WriteState::Bodyless
        } else if let Some(value) = self.headers.get("Content-Length") {
            let n = value.trim().parse::<u64>()
                .map_err(|_| Error::internal(
                    "unparseable Content-Length set on response"))?;
            WriteState::FixedBody { remaining: n }
        } else if self.headers.contains("Transfer-Encoding") {
            WriteState::ChunkedBody
        } else if let Some(size) = known_size {
            self.headers.add("Content-Length", size.to_string());
            WriteState::FixedBody { remaining: size }
        } else {
            self.headers.add("Transfer-Encoding", "chunked");
            WriteState::ChunkedBody
        };

        let reason = match self.reason {
            Some(ref r) => r.clone(),
            None => reason_phrase(self.status).to_string(),
        };
        let mut head = Vec::with_capacity(256);
        write!(&mut head, "HTTP/1.1 {} {}\r\n", self.status, reason)
            .expect("writing to a Vec cannot fail");
        for (name, value) in self.headers.iter() {
            write!(&mut head, "{}: {}\r\n", name, value)
                .expect("writing to a Vec cannot fail");
        }
        head.extend_from_slice(b"\r\n");
        self.sink.write_all(&head)?;
        self.state = next;
        Ok(())
    }

    /// Write a piece of the body. On the first call the head is
    /// flushed; with no `Content-Length` in place the response
    /// switches to chunked framing.
    pub fn write_body(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state == WriteState::Staging {
            self.flush_head(None)?;
        }
        match self.state {
            WriteState::Staging => unreachable!(),
            WriteState::FixedBody { remaining } => {
                if (data.len() as u64) > remaining {
                    self.state = WriteState::Done;
                    return Err(Error::Protocol(
                        "response body exceeds declared Content-Length"));
                }
                if !self.is_head {
                    self.sink.write_all(data)?;
                }
                let left = remaining - data.len() as u64;
                self.state = if left == 0 {
                    WriteState::Done
                } else {
                    WriteState::FixedBody { remaining: left }
                };
                Ok(())
            }
            WriteState::ChunkedBody => {
                if data.is_empty() {
                    // an empty chunk would terminate the body
                    return Ok(());
                }
                if !self.is_head {
                    write!(self.sink, "{:x}\r\n", data.len())
                        .map_err(Error::Io)?;
                    self.sink.write_all(data)?;
                    self.sink.write_all(b"\r\n")?;
                }
                Ok(())
            }
            WriteState::Bodyless => {
                if data.is_empty() {
                    return Ok(());
                }
                Err(Error::internal("body written to a response status \
                    that forbids one"))
            }
            WriteState::Done => {
                Err(Error::internal("body written after the response \
                    was completed"))
            }
        }
    }

    /// Send a complete string body with the given content type.
    pub fn send_str(&mut self, content_type: &str, body: &str)
        -> Result<(), Error>
    {
        self.send_bytes(content_type, body.as_bytes())
    }

    /// Send a complete in-memory body with the given content type.
    pub fn send_bytes(&mut self, content_type: &str, body: &[u8])
        -> Result<(), Error>
    {
        self.set_header("Content-Type", content_type)?;
        self.flush_head(Some(body.len() as u64))?;
        self.write_body(body)
    }

    /// Stream a body of known size from a byte source.
    pub fn stream_body(&mut self, source: &mut dyn Read, size: u64)
        -> Result<(), Error>
    {
        if self.state != WriteState::Staging {
            return Err(Error::internal("body streaming must start \
                before the head is flushed"));
        }
        self.flush_head(Some(size))?;
        self.copy_from(source)
    }

    /// Stream a body of unknown size; the wire framing is chunked.
    pub fn stream_body_chunked(&mut self, source: &mut dyn Read)
        -> Result<(), Error>
    {
        if self.state != WriteState::Staging {
            return Err(Error::internal("body streaming must start \
                before the head is flushed"));
        }
        self.flush_head(None)?;
        self.copy_from(source)
    }

    fn copy_from(&mut self, source: &mut dyn Read)
        -> Result<(), Error>
    {
        let mut chunk = [0u8; STREAM_CHUNK];
        loop {
            let n = source.read(&mut chunk)?;
            if n == 0 {
                return Ok(());
            }
            self.write_body(&chunk[..n])?;
        }
    }

    /// Set a status and complete the response with no body.
    pub fn send_status(&mut self, status: Status) -> Result<(), Error> {
        self.status(status)?;
        self.finish()
    }

    /// Complete the response.
    ///
    /// Flushes the head if nothing was written yet (a status-only
    /// response with zero-length body), terminates chunked framing,
    /// and verifies that a fixed-length body was written in full.
    /// Idempotent once the message is done.
    pub fn finish(&mut self) -> Result<(), Error> {
        match self.state {
            WriteState::Staging => {
                if !bodyless_status(self.status)
                    && !self.headers.contains("Content-Length")
                    && !self.headers.contains("Transfer-Encoding")
                {
                    self.headers.add("Content-Length", "0");
                }
                self.flush_head(None)?;
                match self.state {
                    // an empty fixed body is already complete
                    WriteState::FixedBody { remaining }
                        if remaining > 0 =>
                    {
                        self.state = WriteState::Done;
                        return Err(Error::Protocol(
                            "response body shorter than declared \
                             Content-Length"));
                    }
                    WriteState::ChunkedBody => {
                        if !self.is_head {
                            self.sink.write_all(b"0\r\n\r\n")?;
                        }
                    }
                    _ => {}
                }
                self.state = WriteState::Done;
            }
            WriteState::FixedBody { remaining } => {
                self.state = WriteState::Done;
                if remaining > 0 {
                    return Err(Error::Protocol(
                        "response body shorter than declared \
                         Content-Length"));
                }
            }
            WriteState::ChunkedBody => {
                if !self.is_head {
                    self.sink.write_all(b"0\r\n\r\n")?;
                }
                self.state = WriteState::Done;
            }
            WriteState::Bodyless | WriteState::Done => {
                self.state = WriteState::Done;
            }
        }
        self.sink.flush()?;
        Ok(())
    }
}
