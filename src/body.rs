use std::cmp::min;
use std::io::{self, Read};

use httparse::{self, parse_chunk_size};
use netbuf::Buf;

/// How the body of a request is framed on the wire.
///
/// Detected from the headers while parsing the head; the body bytes
/// themselves are never read ahead of the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body follows the head
    Empty,
    /// Exactly this many bytes follow
    Fixed(u64),
    /// `Transfer-Encoding: chunked` framing
    Chunked,
}

/// Lazy byte stream of a request body.
///
/// Bytes that were read past the header terminator while hunting for
/// `CRLF CRLF` sit in `buf` and are served before the socket is touched
/// again. The stream can be consumed at most once; reading past the end
/// keeps returning zero.
///
/// Chunk framing is decoded incrementally, so arbitrarily large bodies
/// flow through a bounded buffer.
pub struct BodyReader {
    progress: Progress,
    buf: Buf,
    source: Option<Box<dyn Read + Send>>,
}

enum Progress {
    Empty,
    Fixed { remaining: u64 },
    Chunked(ChunkState),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// A chunk-size line is expected at the front of the buffer
    Header,
    /// Inside chunk data
    Data { remaining: u64 },
    /// The CRLF that terminates a chunk's data
    DataCrlf,
    /// After the last (zero-size) chunk; trailer lines are discarded
    Trailers,
}

fn bad_framing(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn eof_in_body() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof,
        "connection closed inside request body")
}

impl BodyReader {
    pub(crate) fn new(kind: BodyKind, prefix: Buf,
        source: Box<dyn Read + Send>)
        -> BodyReader
    {
        BodyReader {
            progress: match kind {
                BodyKind::Empty => Progress::Empty,
                BodyKind::Fixed(0) => Progress::Done,
                BodyKind::Fixed(n) => Progress::Fixed { remaining: n },
                BodyKind::Chunked => Progress::Chunked(ChunkState::Header),
            },
            buf: prefix,
            source: Some(source),
        }
    }

    /// An already-consumed body. Used for requests without one.
    pub fn empty() -> BodyReader {
        BodyReader {
            progress: Progress::Empty,
            buf: Buf::new(),
            source: None,
        }
    }

    /// A body served entirely from memory. This is what request
    /// builders use in tests.
    pub fn from_bytes(data: &[u8]) -> BodyReader {
        let mut buf = Buf::new();
        buf.extend(data);
        BodyReader {
            progress: if data.is_empty() {
                Progress::Empty
            } else {
                Progress::Fixed { remaining: data.len() as u64 }
            },
            buf: buf,
            source: None,
        }
    }

    /// Number of bytes left, when the framing makes it known upfront.
    pub fn size_hint(&self) -> Option<u64> {
        match self.progress {
            Progress::Empty | Progress::Done => Some(0),
            Progress::Fixed { remaining } => Some(remaining),
            Progress::Chunked(..) => None,
        }
    }

    /// Hand back whatever was buffered but not consumed. Used when a
    /// connection leaves the HTTP protocol after an upgrade.
    pub(crate) fn take_buffered(&mut self) -> Vec<u8> {
        let bytes = self.buf[..].to_vec();
        let len = bytes.len();
        self.buf.consume(len);
        bytes
    }

    fn refill(&mut self) -> io::Result<usize> {
        match self.source {
            Some(ref mut s) => self.buf.read_from(s),
            None => Ok(0),
        }
    }

    fn refill_or_eof(&mut self) -> io::Result<()> {
        if self.refill()? == 0 {
            return Err(eof_in_body());
        }
        Ok(())
    }

    /// Serve up to `remaining`/`out.len()` bytes out of the buffer.
    fn serve(&mut self, out: &mut [u8], remaining: u64) -> (usize, u64) {
        let take = min(min(remaining, out.len() as u64) as usize,
                       self.buf.len());
        out[..take].copy_from_slice(&self.buf[..take]);
        self.buf.consume(take);
        (take, remaining - take as u64)
    }
}

impl Read for BodyReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            match self.progress {
                Progress::Empty | Progress::Done => return Ok(0),
                Progress::Fixed { remaining } => {
                    if self.buf.len() == 0 {
                        self.refill_or_eof()?;
                    }
                    let (took, left) = self.serve(out, remaining);
                    self.progress = if left == 0 {
                        Progress::Done
                    } else {
                        Progress::Fixed { remaining: left }
                    };
                    return Ok(took);
                }
                Progress::Chunked(ChunkState::Header) => {
                    match parse_chunk_size(&self.buf[..]) {
                        Ok(httparse::Status::Complete((used, 0))) => {
                            self.buf.consume(used);
                            self.progress =
                                Progress::Chunked(ChunkState::Trailers);
                        }
                        Ok(httparse::Status::Complete((used, size))) => {
                            self.buf.consume(used);
                            self.progress = Progress::Chunked(
                                ChunkState::Data { remaining: size });
                        }
                        Ok(httparse::Status::Partial) => {
                            self.refill_or_eof()?;
                        }
                        Err(..) => {
                            return Err(bad_framing("invalid chunk size"));
                        }
                    }
                }
                Progress::Chunked(ChunkState::Data { remaining }) => {
                    if self.buf.len() == 0 {
                        self.refill_or_eof()?;
                    }
                    let (took, left) = self.serve(out, remaining);
                    self.progress = Progress::Chunked(if left == 0 {
                        ChunkState::DataCrlf
                    } else {
                        ChunkState::Data { remaining: left }
                    });
                    if took > 0 {
                        return Ok(took);
                    }
                }
                Progress::Chunked(ChunkState::DataCrlf) => {
                    if self.buf.len() < 2 {
                        self.refill_or_eof()?;
                        continue;
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(bad_framing("chunk data not \
                            terminated by CRLF"));
                    }
                    self.buf.consume(2);
                    self.progress = Progress::Chunked(ChunkState::Header);
                }
                Progress::Chunked(ChunkState::Trailers) => {
                    match self.buf[..].iter().position(|&b| b == b'\n') {
                        // the blank line ends the trailer section
                        Some(1) if self.buf[0] == b'\r' => {
                            self.buf.consume(2);
                            self.progress = Progress::Done;
                            return Ok(0);
                        }
                        Some(idx) => {
                            // a trailer field, dropped
                            self.buf.consume(idx + 1);
                        }
                        None => {
                            self.refill_or_eof()?;
                        }
                    }
                }
            }
        }
    }
}
