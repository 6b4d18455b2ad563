//! End-to-end WebSocket tests with a hand-rolled client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use handy_http::websocket::{WebSocketConfig, WebSocketHandler,
    WebSocketMessageHandler, WsConnection};
use handy_http::{Error, HandlerContext, HttpServer, PathRouter,
    ServerHandle, ServerConfig};

/// Greets on connect and echoes every message back.
struct Echo;

impl WebSocketMessageHandler for Echo {
    fn on_connection_established(&mut self, conn: &mut WsConnection) {
        conn.send_text("welcome");
    }
    fn on_text_message(&mut self, conn: &mut WsConnection,
        text: &str)
    {
        conn.send_text(text);
    }
    fn on_binary_message(&mut self, conn: &mut WsConnection,
        data: &[u8])
    {
        conn.send_binary(data);
    }
}

struct TestServer {
    handle: ServerHandle,
    runner: JoinHandle<Result<(), Error>>,
}

fn start(config: WebSocketConfig) -> TestServer {
    let mut router = PathRouter::new();
    router.get("/ws", WebSocketHandler::new(|| {
        Box::new(Echo) as Box<dyn WebSocketMessageHandler>
    }));
    router.get("/plain", |ctx: &mut HandlerContext| {
        ctx.response.send_str("text/plain", "no upgrade here")
    });
    let server = Arc::new(HttpServer::new(
        ServerConfig::new()
            .port(0)
            .worker_pool_size(2)
            .websocket(config)
            .done(),
        router));
    let handle = server.handle();
    let runner = thread::spawn(move || server.start());
    for _ in 0..2000 {
        if handle.is_ready() {
            return TestServer {
                handle: handle,
                runner: runner,
            };
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("server did not become ready");
}

fn quick_config() -> WebSocketConfig {
    WebSocketConfig::new()
        .tick_interval(Duration::from_millis(20))
        .done()
}

impl TestServer {
    fn upgrade(&self) -> (TcpStream, String) {
        let addr = self.handle.local_addr().expect("server address");
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        stream.write_all(
            b"GET /ws HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n")
            .expect("send handshake");
        let head = read_response_head(&mut stream);
        (stream, head)
    }

    fn stop(self) {
        self.handle.stop();
        self.runner.join().expect("server thread")
            .expect("server result");
    }
}

/// Read exactly up to the blank line, leaving any frames unread.
fn read_response_head(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut byte = [0u8; 1];
    while !data.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).expect("read head byte");
        assert!(n > 0, "eof inside response head");
        data.push(byte[0]);
    }
    String::from_utf8(data).expect("response head is utf-8")
}

fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).expect("frame header");
    assert_eq!(head[1] & 0x80, 0, "server frames must be unmasked");
    let len = match head[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            stream.read_exact(&mut ext).expect("extended length");
            ((ext[0] as usize) << 8) | ext[1] as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            stream.read_exact(&mut ext).expect("extended length");
            ext.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
        }
        n => n as usize,
    };
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("frame payload");
    (head[0] & 0x0F, payload)
}

fn masked_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 125);
    let key = [0x11, 0x22, 0x33, 0x44];
    let mut out = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    out.extend_from_slice(&key);
    for (i, &b) in payload.iter().enumerate() {
        out.push(b ^ key[i % 4]);
    }
    out
}

#[test]
fn handshake_and_text_echo() {
    let server = start(quick_config());
    let (mut stream, head) = server.upgrade();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "unexpected response: {}", head);
    assert!(head.contains(
        "Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(head.contains("Upgrade: websocket\r\n"));
    assert!(head.contains("Connection: Upgrade\r\n"));

    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!((opcode, &payload[..]), (0x1, &b"welcome"[..]));

    stream.write_all(&masked_frame(0x1, b"hi")).expect("send text");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!((opcode, &payload[..]), (0x1, &b"hi"[..]));

    server.stop();
}

#[test]
fn binary_echo_and_fragmented_message() {
    let server = start(quick_config());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    stream.write_all(&masked_frame(0x2, &[1, 2, 3]))
        .expect("send binary");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!((opcode, &payload[..]), (0x2, &[1u8, 2, 3][..]));

    // "hel" + "lo" split across a continuation, echoed as one message
    let key = [9u8, 9, 9, 9];
    let mut first = vec![0x01, 0x83];
    first.extend_from_slice(&key);
    first.extend(b"hel".iter().enumerate()
        .map(|(i, &b)| b ^ key[i % 4]));
    let mut second = vec![0x80, 0x82];
    second.extend_from_slice(&key);
    second.extend(b"lo".iter().enumerate()
        .map(|(i, &b)| b ^ key[i % 4]));
    stream.write_all(&first).expect("send fragment");
    stream.write_all(&second).expect("send continuation");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!((opcode, &payload[..]), (0x1, &b"hello"[..]));

    server.stop();
}

#[test]
fn ping_gets_an_automatic_pong() {
    let server = start(quick_config());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    stream.write_all(&masked_frame(0x9, b"marco")).expect("send ping");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!((opcode, &payload[..]), (0xA, &b"marco"[..]));

    server.stop();
}

#[test]
fn close_handshake_echoes_the_code() {
    let server = start(quick_config());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    stream.write_all(&masked_frame(0x8, &[0x03, 0xE8]))
        .expect("send close");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..], &[0x03, 0xE8][..]);

    // after the close handshake the socket goes down
    let mut rest = Vec::new();
    let got = stream.read_to_end(&mut rest).unwrap_or(0);
    assert_eq!(got, 0);

    server.stop();
}

#[test]
fn unmasked_client_frame_is_closed_with_1002() {
    let server = start(quick_config());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    stream.write_all(b"\x81\x02hi").expect("send unmasked");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &[0x03, 0xEA][..]); // 1002

    server.stop();
}

#[test]
fn broadcast_reaches_registered_connections() {
    let server = start(quick_config());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    // the echo proves the registration round-trip is complete
    stream.write_all(&masked_frame(0x1, b"sync")).expect("send sync");
    let _ = read_frame(&mut stream);

    let manager = server.handle.websocket_manager()
        .expect("websockets enabled");
    manager.broadcast_text("announcement");
    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!((opcode, &payload[..]), (0x1, &b"announcement"[..]));

    server.stop();
}

#[test]
fn idle_connection_is_closed_with_1001() {
    let server = start(WebSocketConfig::new()
        .tick_interval(Duration::from_millis(20))
        .idle_timeout(Duration::from_millis(150))
        .done());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &[0x03, 0xE9][..]); // 1001

    server.stop();
}

#[test]
fn server_shutdown_closes_websockets() {
    let server = start(quick_config());
    let (mut stream, _) = server.upgrade();
    let _ = read_frame(&mut stream); // welcome

    server.stop();

    let (opcode, payload) = read_frame(&mut stream);
    assert_eq!(opcode, 0x8);
    assert_eq!(&payload[..2], &[0x03, 0xE9][..]); // 1001
    let mut rest = Vec::new();
    let got = stream.read_to_end(&mut rest).unwrap_or(0);
    assert_eq!(got, 0);
}

#[test]
fn non_upgrade_requests_still_work() {
    let server = start(quick_config());
    let addr = server.handle.local_addr().expect("server address");
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream.write_all(
        b"GET /plain HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("send request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("no upgrade here"));
    server.stop();
}

#[test]
fn plain_get_on_the_websocket_route_is_400() {
    let server = start(quick_config());
    let addr = server.handle.local_addr().expect("server address");
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream.write_all(
        b"GET /ws HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .expect("send request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "unexpected response: {}", response);
    server.stop();
}
