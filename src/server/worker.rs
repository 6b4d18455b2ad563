use std::net::{Shutdown, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use netbuf::Buf;

use crate::body::BodyReader;
use crate::enums::{Method, reason_phrase};
use crate::error::Error;
use crate::handler::{Handler, HandlerContext};
use crate::request::Request;
use crate::response::ResponseWriter;
use super::ServerHandle;
use super::config::ServerConfig;
use super::parser;

/// What the accept loop feeds to the pool. One `Terminate` is queued
/// per worker at shutdown; a worker that picks one up exits without
/// taking further work.
pub(crate) enum Task {
    Serve(TcpStream),
    Terminate,
}

/// A bounded crew of long-running worker threads taking connections
/// off a shared FIFO queue.
///
/// The queue capacity equals the configured connection queue size, so
/// a saturated pool pushes back on the accept loop rather than piling
/// up connections.
pub(crate) struct WorkerPool {
    queue: SyncSender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(config: &Arc<ServerConfig>, handle: &ServerHandle,
        handler: &Arc<dyn Handler>)
        -> WorkerPool
    {
        let (tx, rx) = sync_channel(config.connection_queue_size);
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..config.worker_pool_size).map(|id| {
            let rx = rx.clone();
            let config = config.clone();
            let handle = handle.clone();
            let handler = handler.clone();
            thread::Builder::new()
                .name(format!("handy-worker-{}", id))
                .spawn(move || {
                    worker_loop(id, &rx, &config, &handle, &*handler)
                })
                .expect("spawning a worker thread")
        }).collect();
        WorkerPool {
            queue: tx,
            workers: workers,
        }
    }

    /// Queue a connection, blocking while the queue is full.
    pub fn submit(&self, stream: TcpStream) {
        if self.queue.send(Task::Serve(stream)).is_err() {
            // only possible when every worker is gone
            error!("connection queue is closed, dropping connection");
        }
    }

    /// Let in-flight exchanges finish, then join all workers.
    pub fn shutdown(mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.queue.send(Task::Terminate);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(id: usize, queue: &Mutex<Receiver<Task>>,
    config: &ServerConfig, handle: &ServerHandle, handler: &dyn Handler)
{
    trace!("worker {} started", id);
    loop {
        let task = queue.lock().expect("queue lock poisoned").recv();
        match task {
            Ok(Task::Serve(stream)) => {
                serve_connection(id, stream, config, handle, handler);
            }
            Ok(Task::Terminate) | Err(..) => break,
        }
    }
    trace!("worker {} stopped", id);
}

/// One full exchange: parse, dispatch, finish the response, close.
/// A successful upgrade instead passes the socket on to the WebSocket
/// manager and leaves it open.
fn serve_connection(id: usize, stream: TcpStream,
    config: &ServerConfig, handle: &ServerHandle, handler: &dyn Handler)
{
    let peer = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(..) => "<unknown>".to_string(),
    };
    if stream.set_read_timeout(config.read_timeout).is_err()
        || stream.set_write_timeout(config.write_timeout).is_err()
    {
        warn!("cannot set socket timeouts for {}", peer);
        return;
    }

    let mut reader = match stream.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            warn!("cannot clone socket for {}: {}", peer, e);
            return;
        }
    };
    let sink = match stream.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            warn!("cannot clone socket for {}: {}", peer, e);
            return;
        }
    };

    let mut buf = Buf::new();
    let head = match parser::read_head(&mut reader, &mut buf,
        config.receive_buffer_size)
    {
        Ok(Some(head)) => head,
        Ok(None) => {
            trace!("{} closed without a request", peer);
            return;
        }
        Err(err) => {
            info!("bad request from {}: {}", peer, err);
            refuse_connection(&err, sink, config);
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    };
    debug!("{} {} from {}", head.method, head.path, peer);

    let is_head = head.method == Method::Head;
    let body = BodyReader::new(head.body, buf, Box::new(reader));
    let request = Request::new(head.method, head.path, head.raw_query,
        head.version, head.headers, body);
    let response = ResponseWriter::new(Box::new(sink), is_head,
        config.default_headers.clone());

    let mut ctx = HandlerContext::for_worker(request, response,
        handle.clone(), id);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        handler.handle(&mut ctx)
    }));
    let (mut request, mut response, upgrade) = ctx.into_parts();
    let outcome = match outcome {
        Ok(result) => result,
        Err(panic) => Err(Error::internal(describe_panic(panic))),
    };

    match outcome {
        Ok(()) => {
            if let Some(ws_handler) = upgrade {
                if response.status_code() == 101
                    && response.is_flushed()
                {
                    match handle.websocket_manager() {
                        Some(manager) => {
                            let leftover = request.take_buffered();
                            manager.register(stream, ws_handler,
                                leftover);
                            return;
                        }
                        None => {
                            error!("connection upgraded while \
                                websockets are disabled");
                        }
                    }
                } else {
                    error!("upgrade requested without a flushed \
                        101 response");
                }
            }
            if let Err(e) = response.finish() {
                info!("response to {} failed: {}", peer, e);
            }
        }
        Err(err) => {
            write_error_response(&err, &mut response);
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Respond to a connection whose request never parsed, when the error
/// class has a canonical status. Transport errors just close.
fn refuse_connection(err: &Error, sink: TcpStream,
    config: &ServerConfig)
{
    if let Some(code) = err.status_code() {
        let mut response = ResponseWriter::new(Box::new(sink), false,
            config.default_headers.clone());
        let _ = response.custom_status(code, None);
        let _ = response.send_str("text/plain", reason_phrase(code));
        let _ = response.finish();
    }
}

/// The single interception point turning handler failures into
/// canonical responses. Details go to the log only; the client gets
/// a generic message.
fn write_error_response(err: &Error, response: &mut ResponseWriter) {
    let code = match err.status_code() {
        Some(code) => code,
        None => {
            info!("connection failed: {}", err);
            return;
        }
    };
    if response.is_flushed() {
        warn!("handler failed after the response was flushed: {}", err);
        return;
    }
    if code == 500 {
        error!("handler failed: {}", err);
    } else {
        info!("request rejected ({}): {}", code, err);
    }

    response.reset_for_error();
    let _ = response.custom_status(code, None);
    if let Error::MethodNotAllowed(ref allow) = *err {
        let list = allow.iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = response.set_header("Allow", &list);
    }
    let result = match code {
        // route misses answer with bare statuses
        404 | 405 => response.finish(),
        _ => {
            response.send_str("text/plain", reason_phrase(code))
                .and_then(|_| response.finish())
        }
    };
    if let Err(e) = result {
        info!("error response failed: {}", e);
    }
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", msg)
    } else {
        "handler panicked".to_string()
    }
}
