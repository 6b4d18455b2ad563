extern crate argparse;
extern crate env_logger;
extern crate handy_http;

use std::env;

use argparse::{ArgumentParser, Parse};

use handy_http::websocket::{WebSocketHandler,
    WebSocketMessageHandler, WsConnection};
use handy_http::{HandlerContext, HttpServer, PathRouter,
    ServerConfig};

const INDEX: &'static str = "<!DOCTYPE html>\n\
    <html><body>\n\
    <input id=\"m\"><button onclick=\"s.send(m.value)\">send</button>\n\
    <pre id=\"log\"></pre>\n\
    <script>\n\
    var s = new WebSocket('ws://' + location.host + '/ws');\n\
    s.onmessage = function(e) { log.textContent += e.data + '\\n'; };\n\
    </script>\n\
    </body></html>\n";

/// Echoes messages back and reports joins on the log.
struct EchoChat;

impl WebSocketMessageHandler for EchoChat {
    fn on_connection_established(&mut self, conn: &mut WsConnection) {
        println!("connection {} established", conn.id());
        conn.send_text("hello, you are connected");
    }
    fn on_text_message(&mut self, conn: &mut WsConnection,
        text: &str)
    {
        conn.send_text(&format!("echo: {}", text));
    }
    fn on_connection_closed(&mut self, id: usize) {
        println!("connection {} closed", id);
    }
}

fn main() {
    let mut host = "127.0.0.1".to_string();
    let mut port = 8080u16;
    {
        let mut ap = ArgumentParser::new();
        ap.set_description("Websocket echo server with a tiny web UI");
        ap.refer(&mut host)
            .add_option(&["-l", "--listen"], Parse,
                "Address to listen on");
        ap.refer(&mut port)
            .add_option(&["-p", "--port"], Parse,
                "Port to listen on");
        ap.parse_args_or_exit();
    }

    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let mut router = PathRouter::new();
    router.get("/", |ctx: &mut HandlerContext| {
        ctx.response.send_str("text/html; charset=utf-8", INDEX)
    });
    router.get("/ws", WebSocketHandler::new(|| {
        Box::new(EchoChat) as Box<dyn WebSocketMessageHandler>
    }));

    let server = HttpServer::new(
        ServerConfig::new().host(&host).port(port).done(),
        router);
    server.start().expect("server failed");
}
