use std::collections::HashMap;
use std::io;
use std::net;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use netbuf::Buf;

use super::WebSocketConfig;
use super::frames::{self, CLOSE_GOING_AWAY, MessageAssembler, Packet};
use super::handler::WebSocketMessageHandler;

/// Identifies one upgraded connection for the lifetime of the
/// manager.
pub type ConnectionId = usize;

enum Command {
    Register {
        stream: net::TcpStream,
        handler: Box<dyn WebSocketMessageHandler>,
        leftover: Vec<u8>,
    },
    Send(ConnectionId, Packet),
    Broadcast(Packet),
    Close(ConnectionId, u16, String),
    Shutdown,
}

/// Thread-safe mailbox into the manager thread.
///
/// Everything deposited here is picked up between poll iterations;
/// actual socket writes always happen on the manager thread.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: Sender<Command>,
}

impl ManagerHandle {
    pub(crate) fn register(&self, stream: net::TcpStream,
        handler: Box<dyn WebSocketMessageHandler>, leftover: Vec<u8>)
    {
        self.deposit(Command::Register {
            stream: stream,
            handler: handler,
            leftover: leftover,
        });
    }

    /// Queue a packet for one connection.
    pub fn send(&self, id: ConnectionId, packet: Packet) {
        self.deposit(Command::Send(id, packet));
    }

    /// Queue a packet for every open connection.
    pub fn broadcast(&self, packet: Packet) {
        self.deposit(Command::Broadcast(packet));
    }

    /// Broadcast a text message.
    pub fn broadcast_text(&self, text: &str) {
        self.broadcast(Packet::Text(text.to_string()));
    }

    /// Broadcast a binary message.
    pub fn broadcast_binary(&self, data: &[u8]) {
        self.broadcast(Packet::Binary(data.to_vec()));
    }

    /// Start the close handshake for one connection.
    pub fn close(&self, id: ConnectionId, code: u16, reason: &str) {
        self.deposit(Command::Close(id, code, reason.to_string()));
    }

    fn deposit(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("websocket manager is gone, dropping command");
        }
    }
}

/// The single thread owning every upgraded connection.
///
/// Runs a readiness poll over all sockets with a bounded tick so the
/// mailbox is observed promptly. All message handler callbacks run
/// inline here, so none of them may block for long.
pub struct WebSocketManager {
    handle: ManagerHandle,
    thread: JoinHandle<()>,
}

impl WebSocketManager {
    pub(crate) fn start(config: WebSocketConfig) -> WebSocketManager {
        let (tx, rx) = channel();
        let thread = thread::Builder::new()
            .name("handy-websocket".to_string())
            .spawn(move || run(config, rx))
            .expect("spawning the websocket manager thread");
        WebSocketManager {
            handle: ManagerHandle { tx: tx },
            thread: thread,
        }
    }

    pub(crate) fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    /// Close every connection (code 1001) and join the thread.
    pub(crate) fn shutdown(self) {
        let _ = self.handle.tx.send(Command::Shutdown);
        let _ = self.thread.join();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Open,
    /// We sent a close frame and are waiting for the echo
    CloseSent,
    /// The socket is done for; reaped after a final flush
    Dead,
}

/// State of one upgraded connection, handed to handler callbacks.
pub struct WsConnection {
    id: ConnectionId,
    sock: TcpStream,
    in_buf: Buf,
    out_buf: Buf,
    assembler: MessageAssembler,
    state: ConnState,
    last_activity: Instant,
    want_write: bool,
}

impl WsConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a packet on this connection's outbound buffer.
    pub fn send(&mut self, packet: &Packet) {
        if self.state != ConnState::Open {
            debug!("websocket {}: send on a closing connection \
                dropped", self.id);
            return;
        }
        frames::encode_packet(&mut self.out_buf, packet);
    }

    pub fn send_text(&mut self, text: &str) {
        self.send(&Packet::Text(text.to_string()));
    }

    pub fn send_binary(&mut self, data: &[u8]) {
        self.send(&Packet::Binary(data.to_vec()));
    }

    /// Start the close handshake.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.state != ConnState::Open {
            return;
        }
        frames::write_close(&mut self.out_buf, code, reason);
        self.state = ConnState::CloseSent;
    }

    fn read_from_socket(&mut self) {
        loop {
            match self.in_buf.read_from(&mut self.sock) {
                Ok(0) => {
                    debug!("websocket {}: peer closed the socket",
                        self.id);
                    self.state = ConnState::Dead;
                    return;
                }
                Ok(..) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return;
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => {
                    debug!("websocket {}: read failed: {}",
                        self.id, e);
                    self.state = ConnState::Dead;
                    return;
                }
            }
        }
    }

    fn flush_out(&mut self) {
        if self.out_buf.len() == 0 {
            return;
        }
        match self.out_buf.write_to(&mut self.sock) {
            Ok(..) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                debug!("websocket {}: write failed: {}", self.id, e);
                self.state = ConnState::Dead;
            }
        }
    }
}

struct Registered {
    conn: WsConnection,
    handler: Box<dyn WebSocketMessageHandler>,
}

struct Manager {
    config: WebSocketConfig,
    poll: Poll,
    conns: HashMap<Token, Registered>,
    next_token: usize,
}

fn run(config: WebSocketConfig, rx: Receiver<Command>) {
    let poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            error!("websocket manager cannot create a poll \
                instance: {}", e);
            return;
        }
    };
    let mut events = Events::with_capacity(256);
    let mut manager = Manager {
        config: config,
        poll: poll,
        conns: HashMap::new(),
        next_token: 0,
    };
    debug!("websocket manager started");

    loop {
        match manager.poll.poll(&mut events,
            Some(manager.config.tick_interval))
        {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                continue;
            }
            Err(e) => {
                error!("websocket manager poll failed: {}", e);
                break;
            }
        }
        for event in events.iter() {
            manager.service(event.token(), event.is_readable());
        }
        loop {
            match rx.try_recv() {
                Ok(Command::Shutdown) => {
                    manager.close_all("server shutting down");
                    debug!("websocket manager stopped");
                    return;
                }
                Ok(command) => manager.command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    manager.close_all("server shutting down");
                    debug!("websocket manager stopped");
                    return;
                }
            }
        }
        manager.sweep_idle();
    }
}

impl Manager {
    fn command(&mut self, command: Command) {
        match command {
            Command::Register { stream, handler, leftover } => {
                self.register(stream, handler, leftover);
            }
            Command::Send(id, packet) => {
                match self.conns.get_mut(&Token(id)) {
                    Some(reg) => reg.conn.send(&packet),
                    None => debug!("send to unknown websocket {}", id),
                }
                self.service(Token(id), false);
            }
            Command::Broadcast(packet) => {
                let tokens: Vec<Token> =
                    self.conns.keys().cloned().collect();
                for token in tokens {
                    if let Some(reg) = self.conns.get_mut(&token) {
                        reg.conn.send(&packet);
                    }
                    self.service(token, false);
                }
            }
            Command::Close(id, code, reason) => {
                if let Some(reg) = self.conns.get_mut(&Token(id)) {
                    reg.conn.close(code, &reason);
                }
                self.service(Token(id), false);
            }
            Command::Shutdown => unreachable!("handled by the loop"),
        }
    }

    fn register(&mut self, stream: net::TcpStream,
        handler: Box<dyn WebSocketMessageHandler>, leftover: Vec<u8>)
    {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("websocket registration failed: {}", e);
            return;
        }
        let mut sock = TcpStream::from_std(stream);
        let token = Token(self.next_token);
        self.next_token += 1;
        if let Err(e) = self.poll.registry()
            .register(&mut sock, token, Interest::READABLE)
        {
            warn!("websocket registration failed: {}", e);
            return;
        }

        let mut in_buf = Buf::new();
        in_buf.extend(&leftover);
        let mut reg = Registered {
            conn: WsConnection {
                id: token.0,
                sock: sock,
                in_buf: in_buf,
                out_buf: Buf::new(),
                assembler: MessageAssembler::new(
                    self.config.max_message_size),
                state: ConnState::Open,
                last_activity: Instant::now(),
                want_write: false,
            },
            handler: handler,
        };
        debug!("websocket {} registered", token.0);
        reg.handler.on_connection_established(&mut reg.conn);
        self.conns.insert(token, reg);
        // the client may have sent frames right behind the handshake
        self.service(token, false);
    }

    /// Drive one connection: read if the socket is readable, decode
    /// and dispatch complete messages, flush output, then either
    /// update the poll interest or reap the connection.
    fn service(&mut self, token: Token, readable: bool) {
        let mut reg = match self.conns.remove(&token) {
            Some(reg) => reg,
            None => return,
        };
        if readable && reg.conn.state != ConnState::Dead {
            reg.conn.read_from_socket();
        }
        pump(&mut reg);
        reg.conn.flush_out();

        if reg.conn.state == ConnState::Dead {
            let id = reg.conn.id;
            let _ = self.poll.registry().deregister(&mut reg.conn.sock);
            reg.handler.on_connection_closed(id);
            debug!("websocket {} closed", id);
            return;
        }
        let want = reg.conn.out_buf.len() > 0;
        if want != reg.conn.want_write {
            let interest = if want {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            match self.poll.registry()
                .reregister(&mut reg.conn.sock, token, interest)
            {
                Ok(()) => reg.conn.want_write = want,
                Err(e) => {
                    warn!("websocket {}: reregister failed: {}",
                        reg.conn.id, e);
                }
            }
        }
        self.conns.insert(token, reg);
    }

    fn sweep_idle(&mut self) {
        let timeout = self.config.idle_timeout;
        let now = Instant::now();
        let stale: Vec<Token> = self.conns.iter()
            .filter(|(_, reg)| {
                now.duration_since(reg.conn.last_activity) > timeout
            })
            .map(|(&token, _)| token)
            .collect();
        for token in stale {
            if let Some(reg) = self.conns.get_mut(&token) {
                match reg.conn.state {
                    ConnState::Open => {
                        info!("websocket {} idle, closing",
                            reg.conn.id);
                        reg.conn.close(CLOSE_GOING_AWAY,
                            "idle timeout");
                        // grant the peer one more interval to echo
                        reg.conn.last_activity = now;
                    }
                    ConnState::CloseSent | ConnState::Dead => {
                        reg.conn.state = ConnState::Dead;
                    }
                }
            }
            self.service(token, false);
        }
    }

    fn close_all(&mut self, reason: &str) {
        let tokens: Vec<Token> = self.conns.keys().cloned().collect();
        for token in tokens {
            if let Some(mut reg) = self.conns.remove(&token) {
                reg.conn.close(CLOSE_GOING_AWAY, reason);
                reg.conn.flush_out();
                let _ = self.poll.registry()
                    .deregister(&mut reg.conn.sock);
                reg.handler.on_connection_closed(reg.conn.id);
            }
        }
    }
}

/// Decode and dispatch every complete message sitting in the input
/// buffer. Callbacks run right here, on the manager thread.
fn pump(reg: &mut Registered) {
    loop {
        if reg.conn.state == ConnState::Dead {
            return;
        }
        let packet = match reg.conn.assembler
            .feed(&mut reg.conn.in_buf)
        {
            Ok(Some(packet)) => packet,
            Ok(None) => return,
            Err(err) => {
                info!("websocket {}: {}", reg.conn.id, err);
                frames::write_close(&mut reg.conn.out_buf,
                    err.close_code(), "");
                reg.conn.state = ConnState::Dead;
                return;
            }
        };
        reg.conn.last_activity = Instant::now();
        match packet {
            Packet::Text(text) => {
                reg.handler.on_text_message(&mut reg.conn, &text);
            }
            Packet::Binary(data) => {
                reg.handler.on_binary_message(&mut reg.conn, &data);
            }
            Packet::Ping(payload) => {
                if reg.handler.on_ping(&mut reg.conn, &payload) {
                    frames::write_packet(&mut reg.conn.out_buf,
                        frames::OP_PONG, &payload);
                }
            }
            Packet::Pong(payload) => {
                reg.handler.on_pong(&mut reg.conn, &payload);
            }
            Packet::Close(code, reason) => {
                reg.handler.on_close_message(&mut reg.conn, code,
                    &reason);
                if reg.conn.state == ConnState::Open {
                    // echo the code, then drop the socket
                    frames::write_close(&mut reg.conn.out_buf,
                        code, "");
                }
                reg.conn.state = ConnState::Dead;
                return;
            }
        }
    }
}
