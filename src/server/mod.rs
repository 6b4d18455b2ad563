//! The connection-servicing core: lifecycle, accept loop, workers.

mod config;
mod parser;
mod worker;

pub use self::config::{PreBindCallback, ServerConfig};

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use socket2::{Domain, Socket, Type};

use crate::error::Error;
use crate::handler::Handler;
use crate::websocket::{ManagerHandle, WebSocketManager};
use self::worker::WorkerPool;

/// Lifecycle states of a server.
///
/// `Stopped → Starting → Ready → Stopping → Stopped`; nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Ready,
    Stopping,
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const READY: u8 = 2;
const STOPPING: u8 = 3;

struct ServerShared {
    state: AtomicU8,
    state_lock: Mutex<()>,
    state_signal: Condvar,
    local_addr: Mutex<Option<SocketAddr>>,
    websockets: Mutex<Option<ManagerHandle>>,
}

impl ServerShared {
    fn status(&self) -> ServerStatus {
        match self.state.load(Ordering::SeqCst) {
            STOPPED => ServerStatus::Stopped,
            STARTING => ServerStatus::Starting,
            READY => ServerStatus::Ready,
            _ => ServerStatus::Stopping,
        }
    }

    fn set_state(&self, state: u8) {
        let _guard = self.state_lock.lock()
            .expect("state lock poisoned");
        self.state.store(state, Ordering::SeqCst);
        self.state_signal.notify_all();
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        let _guard = self.state_lock.lock()
            .expect("state lock poisoned");
        let done = self.state
            .compare_exchange(from, to, Ordering::SeqCst,
                Ordering::SeqCst)
            .is_ok();
        if done {
            self.state_signal.notify_all();
        }
        done
    }
}

/// A cloneable reference back into a server.
///
/// This is what request handlers see (`ctx.server()`): enough to stop
/// the server, check readiness, find the bound address, and reach the
/// WebSocket manager.
#[derive(Clone)]
pub struct ServerHandle(Arc<ServerShared>);

impl ServerHandle {
    pub fn status(&self) -> ServerStatus {
        self.0.status()
    }

    /// True only while the accept loop is running.
    pub fn is_ready(&self) -> bool {
        self.0.status() == ServerStatus::Ready
    }

    /// The address the listener is bound to; useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.0.local_addr.lock().expect("addr lock poisoned")
    }

    /// Handle of the WebSocket manager, when websockets are enabled
    /// and the server is running.
    pub fn websocket_manager(&self) -> Option<ManagerHandle> {
        self.0.websockets.lock().expect("manager lock poisoned")
            .clone()
    }

    /// Begin shutdown: no further connections are dispatched, workers
    /// drain, the WebSocket manager closes its connections.
    ///
    /// Returns as soon as shutdown is underway; it is safe to call
    /// from a handler running on a worker thread. Use `wait_stopped`
    /// (from outside the server's threads) to block until teardown is
    /// complete.
    pub fn stop(&self) {
        if !self.0.transition(READY, STOPPING) {
            return;
        }
        info!("server stopping");
        // the accept call has no timeout; poke it loose
        if let Some(addr) = self.local_addr() {
            let _ = TcpStream::connect(addr);
        }
    }

    /// Block until the server is fully stopped.
    pub fn wait_stopped(&self) {
        let mut guard = self.0.state_lock.lock()
            .expect("state lock poisoned");
        while self.0.state.load(Ordering::SeqCst) != STOPPED {
            guard = self.0.state_signal.wait(guard)
                .expect("state lock poisoned");
        }
    }
}

/// An HTTP/1.1 server around a single root handler.
///
/// `start()` binds, spawns the worker pool (and the WebSocket manager
/// when enabled) and runs the accept loop on the calling thread until
/// `stop()` is invoked on a handle.
pub struct HttpServer {
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    shared: Arc<ServerShared>,
}

impl HttpServer {
    pub fn new<H>(config: Arc<ServerConfig>, handler: H) -> HttpServer
        where H: Handler + 'static
    {
        HttpServer {
            config: config,
            handler: Arc::new(handler),
            shared: Arc::new(ServerShared {
                state: AtomicU8::new(STOPPED),
                state_lock: Mutex::new(()),
                state_signal: Condvar::new(),
                local_addr: Mutex::new(None),
                websockets: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle(self.shared.clone())
    }

    /// Bind and serve until stopped.
    ///
    /// A failed bind leaves the server in `Stopped` and returns the
    /// I/O error.
    pub fn start(&self) -> Result<(), Error> {
        if !self.shared.transition(STOPPED, STARTING) {
            return Err(Error::internal("server is already running"));
        }
        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.set_state(STOPPED);
                return Err(Error::Io(e));
            }
        };
        let addr = listener.local_addr().map_err(|e| {
            self.shared.set_state(STOPPED);
            Error::Io(e)
        })?;
        *self.shared.local_addr.lock().expect("addr lock poisoned") =
            Some(addr);

        let manager = if self.config.enable_websockets {
            let manager =
                WebSocketManager::start(self.config.websocket.clone());
            *self.shared.websockets.lock()
                .expect("manager lock poisoned") =
                Some(manager.handle());
            Some(manager)
        } else {
            None
        };
        let handle = self.handle();
        let pool = WorkerPool::start(&self.config, &handle,
            &self.handler);

        self.shared.set_state(READY);
        info!("listening on http://{}", addr);

        loop {
            match listener.accept() {
                Ok((stream, _peer)) => {
                    if self.shared.status() == ServerStatus::Stopping {
                        break;
                    }
                    pool.submit(stream);
                }
                Err(e) => {
                    if self.shared.status() == ServerStatus::Stopping {
                        break;
                    }
                    warn!("accept failed: {}", e);
                }
            }
        }
        drop(listener);

        pool.shutdown();
        if let Some(manager) = manager {
            manager.shutdown();
        }
        *self.shared.websockets.lock().expect("manager lock poisoned") =
            None;
        *self.shared.local_addr.lock().expect("addr lock poisoned") =
            None;
        self.shared.set_state(STOPPED);
        info!("server stopped");
        Ok(())
    }

    fn bind(&self) -> io::Result<TcpListener> {
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput,
                "bind host does not resolve"))?;
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        for callback in &self.config.pre_bind {
            callback(&socket)?;
        }
        socket.bind(&addr.into())?;
        socket.listen(self.config.connection_queue_size as i32)?;
        Ok(socket.into())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::error::Error;
    use crate::handler::HandlerContext;
    use super::{HttpServer, ServerConfig, ServerStatus};

    fn noop_server(port: u16) -> HttpServer {
        HttpServer::new(
            ServerConfig::new().port(port).done(),
            |ctx: &mut HandlerContext| -> Result<(), Error> {
                ctx.response.finish()
            })
    }

    #[test]
    fn initial_state_is_stopped() {
        let server = noop_server(0);
        assert_eq!(server.handle().status(), ServerStatus::Stopped);
        assert!(!server.handle().is_ready());
        assert!(server.handle().local_addr().is_none());
        assert!(server.handle().websocket_manager().is_none());
    }

    #[test]
    fn failed_bind_returns_to_stopped() {
        let server = HttpServer::new(
            ServerConfig::new().host("256.256.256.256").done(),
            |ctx: &mut HandlerContext| -> Result<(), Error> {
                ctx.response.finish()
            });
        assert_matches!(server.start(), Err(Error::Io(..)));
        assert_eq!(server.handle().status(), ServerStatus::Stopped);
    }

    #[test]
    fn stop_on_a_stopped_server_is_a_noop() {
        let server = noop_server(0);
        server.handle().stop();
        assert_eq!(server.handle().status(), ServerStatus::Stopped);
    }

    #[test]
    fn full_lifecycle_over_a_thread() {
        let server = Arc::new(noop_server(0));
        let handle = server.handle();
        let runner = {
            let server = server.clone();
            std::thread::spawn(move || server.start())
        };
        while !handle.is_ready() {
            std::thread::yield_now();
        }
        assert!(handle.local_addr().is_some());
        assert!(handle.websocket_manager().is_some());
        handle.stop();
        runner.join().unwrap().unwrap();
        assert_eq!(handle.status(), ServerStatus::Stopped);
        assert!(handle.local_addr().is_none());
    }
}
