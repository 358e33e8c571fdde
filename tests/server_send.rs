use std::collections::HashMap;
use std::io::Write;
use std::thread;

mod common;

#[test]
fn concurrent_sends_reach_the_right_clients() {
    const CLIENTS: usize = 8;

    let (server, addr, rx) = common::start_server();

    // one connection per payload, each tagged by its request url
    let mut tcps = Vec::new();
    for i in 0..CLIENTS {
        let mut tcp = common::connect(addr);
        tcp.write_all(format!("GET /c{} HTTP/1.1\r\n\r\n", i).as_bytes())
            .unwrap();
        tcps.push(tcp);
    }

    let mut id_by_url = HashMap::new();
    for _ in 0..CLIENTS {
        let req = common::recv_one(&rx);
        id_by_url.insert(req.url.clone(), req.client_id);
    }

    // distinct payloads, large enough to hit partial writes
    let payloads: Vec<Vec<u8>> = (0..CLIENTS)
        .map(|i| {
            let mut p = format!("client-{}:", i).into_bytes();
            p.extend(std::iter::repeat(b'a' + i as u8).take(50_000));
            p
        })
        .collect();

    let mut senders = Vec::new();
    for i in 0..CLIENTS {
        let sender = server.sender();
        let id = id_by_url[&format!("/c{}", i)];
        let payload = payloads[i].clone();
        senders.push(thread::spawn(move || {
            sender.send(id, &payload).unwrap();
        }));
    }
    for handle in senders {
        handle.join().unwrap();
    }

    // every client sees exactly its own payload, uncorrupted, then EOF
    for (i, mut tcp) in tcps.into_iter().enumerate() {
        let bytes = common::read_until_eof(&mut tcp);
        assert_eq!(bytes, payloads[i], "payload mismatch for client {}", i);
    }

    drop(server);
}

#[test]
fn send_to_unknown_id_is_a_noop() {
    let (server, addr, rx) = common::start_server();

    server.send(9999, b"nobody home").unwrap();

    // the server is still fully alive afterwards
    let mut tcp = common::connect(addr);
    tcp.write_all(b"GET /alive HTTP/1.1\r\n\r\n").unwrap();
    let req = common::recv_one(&rx);
    assert_eq!(req.url, "/alive");

    server.send(req.client_id, b"ok").unwrap();
    assert_eq!(common::read_until_eof(&mut tcp), b"ok");

    drop(server);
}

#[test]
fn send_after_connection_closed_is_a_noop() {
    let (server, addr, rx) = common::start_server();

    let mut tcp = common::connect(addr);
    tcp.write_all(b"GET /once HTTP/1.1\r\n\r\n").unwrap();
    let req = common::recv_one(&rx);

    server.send(req.client_id, b"done").unwrap();
    assert_eq!(common::read_until_eof(&mut tcp), b"done");

    // the write completed, so the connection is gone; this is dropped
    server.send(req.client_id, b"too late").unwrap();

    // and other connections are unaffected
    let mut tcp2 = common::connect(addr);
    tcp2.write_all(b"GET /again HTTP/1.1\r\n\r\n").unwrap();
    let req2 = common::recv_one(&rx);
    server.send(req2.client_id, b"fresh").unwrap();
    assert_eq!(common::read_until_eof(&mut tcp2), b"fresh");

    drop(server);
}

#[test]
fn zero_length_send_just_closes() {
    let (server, addr, rx) = common::start_server();

    let mut tcp = common::connect(addr);
    tcp.write_all(b"GET /empty HTTP/1.1\r\n\r\n").unwrap();
    let req = common::recv_one(&rx);

    server.send(req.client_id, b"").unwrap();

    assert!(common::read_until_eof(&mut tcp).is_empty());

    drop(server);
}

#[test]
fn large_response_flushes_completely() {
    let (server, addr, rx) = common::start_server();

    let mut tcp = common::connect(addr);
    tcp.write_all(b"GET /big HTTP/1.1\r\n\r\n").unwrap();
    let req = common::recv_one(&rx);

    let payload = vec![7_u8; 1024 * 1024];
    server.send(req.client_id, &payload).unwrap();

    let bytes = common::read_until_eof(&mut tcp);
    assert_eq!(bytes.len(), payload.len());
    assert_eq!(bytes, payload);

    drop(server);
}

#[test]
fn respond_from_inside_the_callback() {
    common::setup_logger();

    let mut server = h1serv::HttpServer::initialize().unwrap();
    let sender = server.sender();
    server.set_receive_callback(move |client_id, req| {
        let body = format!("you asked for {}", req.uri());
        let _ = sender.send(client_id, body.as_bytes());
    });
    server.start("127.0.0.1", 0).unwrap();
    let addr = server.local_addr().unwrap();

    let mut tcp = common::connect(addr);
    tcp.write_all(b"GET /echoed HTTP/1.1\r\n\r\n").unwrap();

    assert_eq!(common::read_until_eof(&mut tcp), b"you asked for /echoed");

    drop(server);
}
