use h1serv::{Error, HttpServer};
use std::io::Write;

mod common;

#[test]
fn close_then_join_terminates_with_open_connections() {
    let (mut server, addr, _rx) = common::start_server();

    // park a couple of idle connections on the loop
    let mut tcp_a = common::connect(addr);
    let mut tcp_b = common::connect(addr);
    tcp_a.write_all(b"GET /pend").unwrap();
    tcp_b.write_all(b"GET /ing").unwrap();

    server.close();
    server.join().unwrap();

    // teardown closed the parked connections too
    assert!(common::read_until_eof(&mut tcp_a).is_empty());
    assert!(common::read_until_eof(&mut tcp_b).is_empty());
}

#[test]
fn drop_without_close_shuts_down() {
    let (server, addr, _rx) = common::start_server();
    let _tcp = common::connect(addr);

    // the drop backstop must stop the loop; the test hangs if it doesn't
    drop(server);
}

#[test]
fn join_before_start_is_ok() {
    common::setup_logger();
    let mut server = HttpServer::initialize().unwrap();
    server.join().unwrap();
}

#[test]
fn occupied_port_is_reported() {
    let (server, addr, _rx) = common::start_server();

    let mut second = HttpServer::initialize().unwrap();
    let err = second.start("127.0.0.1", addr.port()).unwrap_err();
    assert!(matches!(err, Error::PortInUse(_)), "got {:?}", err);

    drop(server);
}

#[test]
fn garbage_listen_address_is_rejected() {
    common::setup_logger();
    let mut server = HttpServer::initialize().unwrap();
    let err = server.start("not-an-address", 0).unwrap_err();
    assert!(matches!(err, Error::User(_)), "got {:?}", err);
}

#[test]
fn double_start_is_rejected() {
    let (mut server, _addr, _rx) = common::start_server();
    let err = server.start("127.0.0.1", 0).unwrap_err();
    assert!(matches!(err, Error::User(_)), "got {:?}", err);
    drop(server);
}

#[test]
fn sends_queued_at_shutdown_are_dropped() {
    let (mut server, addr, rx) = common::start_server();

    let mut tcp = common::connect(addr);
    tcp.write_all(b"GET /late HTTP/1.1\r\n\r\n").unwrap();
    let req = common::recv_one(&rx);

    server.close();
    // accepted-for-send, then discarded by teardown; must not wedge join
    server.send(req.client_id, b"never delivered").unwrap();
    server.join().unwrap();

    assert!(common::read_until_eof(&mut tcp).is_empty());
}
