use std::io;
use std::sync::Arc;
use std::time::Duration;

use socket2::Socket;

use crate::websocket::WebSocketConfig;

/// Callback run on the listening socket after creation and before
/// `bind`, for socket options the kernel only accepts at that point.
pub type PreBindCallback =
    Box<dyn Fn(&Socket) -> io::Result<()> + Send + Sync>;

/// Fine-grained configuration of the server.
///
/// Immutable once the server starts; build it up front and pass it
/// with `done()`.
pub struct ServerConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) connection_queue_size: usize,
    pub(crate) worker_pool_size: usize,
    pub(crate) receive_buffer_size: usize,
    pub(crate) default_headers: Vec<(String, String)>,
    pub(crate) enable_websockets: bool,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) pre_bind: Vec<PreBindCallback>,
    pub(crate) websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a config with defaults.
    pub fn new() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            connection_queue_size: 64,
            worker_pool_size: 8,
            receive_buffer_size: 8192,
            default_headers: vec![
                ("Server".to_string(),
                 concat!("handy-http/", env!("CARGO_PKG_VERSION"))
                    .to_string()),
            ],
            enable_websockets: true,
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
            pre_bind: Vec::new(),
            websocket: WebSocketConfig::new(),
        }
    }

    /// Address to bind to. Default is `127.0.0.1`.
    pub fn host(&mut self, host: &str) -> &mut Self {
        self.host = host.to_string();
        self
    }

    /// Port to bind to. Default is 8080; port 0 asks the kernel for an
    /// ephemeral port (see `ServerHandle::local_addr`).
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// Capacity of the queue between the accept loop and the workers.
    ///
    /// A full queue blocks the accept loop, which is the intended
    /// backpressure. The TCP listen backlog is set to the same value.
    pub fn connection_queue_size(&mut self, value: usize) -> &mut Self {
        assert!(value > 0);
        self.connection_queue_size = value;
        self
    }

    /// Number of worker threads serving connections. Default is 8.
    pub fn worker_pool_size(&mut self, value: usize) -> &mut Self {
        assert!(value > 0);
        self.worker_pool_size = value;
        self
    }

    /// Per-connection receive buffer size, which doubles as the
    /// maximum size of a request head. Default is 8 KiB.
    pub fn receive_buffer_size(&mut self, value: usize) -> &mut Self {
        assert!(value > 0);
        self.receive_buffer_size = value;
        self
    }

    /// Header added to every response that does not set it itself.
    pub fn default_header(&mut self, name: &str, value: &str)
        -> &mut Self
    {
        self.default_headers.push(
            (name.to_string(), value.to_string()));
        self
    }

    /// Whether the WebSocket manager thread is started. Default is
    /// true; with it off, upgrade handlers fail.
    pub fn enable_websockets(&mut self, value: bool) -> &mut Self {
        self.enable_websockets = value;
        self
    }

    /// Socket read timeout for request parsing and body reads.
    /// `None` waits forever. Default is 30 seconds.
    pub fn read_timeout(&mut self, value: Option<Duration>)
        -> &mut Self
    {
        self.read_timeout = value;
        self
    }

    /// Socket write timeout for responses. Default is 30 seconds.
    pub fn write_timeout(&mut self, value: Option<Duration>)
        -> &mut Self
    {
        self.write_timeout = value;
        self
    }

    /// Add a callback run on the socket before `bind`, e.g. to set
    /// `SO_REUSEPORT`. `SO_REUSEADDR` is always set.
    pub fn pre_bind<F>(&mut self, callback: F) -> &mut Self
        where F: Fn(&Socket) -> io::Result<()> + Send + Sync + 'static
    {
        self.pre_bind.push(Box::new(callback));
        self
    }

    /// Tune the WebSocket subsystem.
    pub fn websocket(&mut self, config: WebSocketConfig) -> &mut Self {
        self.websocket = config;
        self
    }

    /// Create an Arc'd config clone to pass to the server.
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<ServerConfig> {
        let mut fresh = ServerConfig::new();
        std::mem::swap(self, &mut fresh);
        Arc::new(fresh)
    }
}
