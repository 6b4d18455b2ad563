extern crate argparse;
extern crate env_logger;
extern crate handy_http;

use std::env;

use argparse::{ArgumentParser, Parse};

use handy_http::{HandlerContext, HttpServer, PathRouter,
    ServerConfig};

fn main() {
    let mut host = "127.0.0.1".to_string();
    let mut port = 8080u16;
    {
        let mut ap = ArgumentParser::new();
        ap.set_description("Serve a hello-world page over HTTP");
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
    router.get("/hello", |ctx: &mut HandlerContext| {
        ctx.response.send_str("text/plain", "Hello world!")
    });
    router.get("/hello/:name", |ctx: &mut HandlerContext| {
        let name = ctx.request.path_params().get("name")
            .unwrap_or("world")
            .to_string();
        ctx.response.send_str("text/plain",
            &format!("Hello {}!", name))
    });
    router.get("/shutdown", |ctx: &mut HandlerContext| {
        if let Some(server) = ctx.server() {
            server.stop();
        }
        ctx.response.send_str("text/plain", "goodbye")
    });

    let server = HttpServer::new(
        ServerConfig::new().host(&host).port(port).done(),
        router);
    server.start().expect("server failed");
}
