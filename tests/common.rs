use h1serv::{ClientId, HttpServer};
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::sync::Once;
use std::time::Duration;

/// One fully parsed request as observed by the receive callback.
#[derive(Debug)]
pub struct Received {
    pub client_id: ClientId,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Start a server on an ephemeral localhost port, forwarding every parsed
/// request to the returned channel.
pub fn start_server() -> (HttpServer, SocketAddr, mpsc::Receiver<Received>) {
    setup_logger();

    let (tx, rx) = mpsc::channel();

    let mut server = HttpServer::initialize().expect("initialize");
    server.set_receive_callback(move |client_id, req| {
        let headers = req
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let _ = tx.send(Received {
            client_id,
            method: req.method().to_string(),
            url: req.uri().to_string(),
            headers,
            body: req.body().clone(),
        });
    });
    server.start("127.0.0.1", 0).expect("start");
    let addr = server.local_addr().expect("local_addr after start");

    (server, addr, rx)
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let tcp = TcpStream::connect(addr).expect("connect");
    tcp.set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    tcp
}

/// Read until the server closes the connection.
pub fn read_until_eof(tcp: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    tcp.read_to_end(&mut buf).expect("read to eof");
    buf
}

pub fn recv_one(rx: &mpsc::Receiver<Received>) -> Received {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("no request received")
}

pub fn setup_logger() {
    static START: Once = Once::new();
    START.call_once(|| {
        let test_log = std::env::var("TEST_LOG")
            .map(|x| x != "0" && x.to_lowercase() != "false")
            .unwrap_or(false);
        let level = if test_log {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        };
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Warn)
            .filter_module("h1serv", level)
            .target(env_logger::Target::Stdout)
            .init();
    });
}
