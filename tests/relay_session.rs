//! End-to-end sessions through the listener against a fake disguise server
//! on loopback.

use std::time::Duration;

use quietwire::{
    Client, Config, Endpoint, SessionState,
    codec::{add_record_layer, peel_record_layer, read_record},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\r\n";
const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Starts the plugin against `remote_port` and returns its local address.
async fn start_client(remote_port: u16, options: &str) -> std::net::SocketAddr {
    let remote_port = remote_port.to_string();
    let config = Config::from_lookup(|name| match name {
        "SS_LOCAL_HOST" => Some("127.0.0.1".to_owned()),
        "SS_LOCAL_PORT" => Some("0".to_owned()),
        "SS_REMOTE_HOST" => Some("127.0.0.1".to_owned()),
        "SS_REMOTE_PORT" => Some(remote_port.clone()),
        "SS_PLUGIN_OPTIONS" => Some(options.to_owned()),
        _ => None,
    })
    .expect("config");
    let client = Client::bind(SessionState::new(config))
        .await
        .expect("bind local endpoint");
    let addr = client.local_addr().unwrap();
    tokio::spawn(client.run());
    addr
}

/// Plays the server side of the handshake: takes the ClientHello, answers
/// with a fake response and consumes the client's reply.
async fn accept_handshake(server: &mut TcpStream) -> Vec<u8> {
    let hello = read_record(server).await.unwrap();
    let mut fake_response = add_record_layer(&[0x02; 86], 0x16, [0x03, 0x03]);
    fake_response.extend_from_slice(&add_record_layer(&[0x01], 0x14, [0x03, 0x03]));
    server.write_all(&fake_response).await.unwrap();

    let mut reply = [0u8; 6 + 5 + 40];
    server.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..6], &[0x14, 0x03, 0x03, 0x00, 0x01, 0x01]);
    assert_eq!(&reply[6..11], &[0x16, 0x03, 0x03, 0x00, 0x28]);
    hello
}

#[tokio::test]
async fn request_and_response_cross_the_disguise() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = start_client(
        server.local_addr().unwrap().port(),
        "ServerName=www.example.com;Key=integration",
    )
    .await;

    let mut local = TcpStream::connect(addr).await.unwrap();
    let (mut remote, _) = timeout(TEST_TIMEOUT, server.accept()).await.unwrap().unwrap();

    let hello = accept_handshake(&mut remote).await;
    assert_eq!(&hello[..3], &[0x16, 0x03, 0x01]);
    assert_eq!(hello[5], 0x01);
    assert!(
        hello.windows(15).any(|w| w == b"www.example.com"),
        "server name missing from ClientHello"
    );

    local.write_all(REQUEST).await.unwrap();
    let record = timeout(TEST_TIMEOUT, read_record(&mut remote))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&record[..5], &[0x17, 0x03, 0x03, 0x00, REQUEST.len() as u8]);
    assert_eq!(peel_record_layer(&record).unwrap(), REQUEST);

    remote
        .write_all(&add_record_layer(RESPONSE, 0x17, [0x03, 0x03]))
        .await
        .unwrap();
    let mut received = vec![0u8; RESPONSE.len()];
    timeout(TEST_TIMEOUT, local.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, RESPONSE);

    // Closing the remote side closes the local one, with nothing extra
    // delivered after the response.
    drop(remote);
    let mut rest = Vec::new();
    timeout(TEST_TIMEOUT, local.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap_or_default();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn local_close_reaches_remote() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = start_client(
        server.local_addr().unwrap().port(),
        "ServerName=www.example.com;Key=integration",
    )
    .await;

    let local = TcpStream::connect(addr).await.unwrap();
    let (mut remote, _) = timeout(TEST_TIMEOUT, server.accept()).await.unwrap().unwrap();
    accept_handshake(&mut remote).await;

    drop(local);
    let mut buf = [0u8; 16];
    let n = timeout(TEST_TIMEOUT, remote.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn server_hanging_up_mid_handshake_closes_local() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = start_client(
        server.local_addr().unwrap().port(),
        "ServerName=www.example.com;Key=integration",
    )
    .await;

    let mut local = TcpStream::connect(addr).await.unwrap();
    let (mut remote, _) = timeout(TEST_TIMEOUT, server.accept()).await.unwrap().unwrap();
    read_record(&mut remote).await.unwrap();
    drop(remote);

    let mut buf = [0u8; 16];
    let n = timeout(TEST_TIMEOUT, local.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn sessions_share_ticket_but_not_random() {
    let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = start_client(
        server.local_addr().unwrap().port(),
        "ServerName=www.example.com;Key=integration;Browser=firefox",
    )
    .await;

    let mut hellos = Vec::new();
    let mut locals = Vec::new();
    for _ in 0..2 {
        locals.push(TcpStream::connect(addr).await.unwrap());
        let (mut remote, _) = timeout(TEST_TIMEOUT, server.accept()).await.unwrap().unwrap();
        hellos.push(accept_handshake(&mut remote).await);
    }

    // The random field sits right after the record header, the handshake
    // header and the version.
    assert_ne!(hellos[0][11..43], hellos[1][11..43]);
    // Same session state, same window: the ClientHellos differ only in the
    // random field and the session id.
    assert_eq!(hellos[0].len(), hellos[1].len());
    assert_eq!(hellos[0][76..], hellos[1][76..]);
}

#[tokio::test]
async fn independent_states_coexist() {
    let server_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = start_client(
        server_a.local_addr().unwrap().port(),
        "ServerName=a.example.com;Key=first",
    )
    .await;
    let addr_b = start_client(
        server_b.local_addr().unwrap().port(),
        "ServerName=b.example.com;Key=second",
    )
    .await;

    let _local_a = TcpStream::connect(addr_a).await.unwrap();
    let _local_b = TcpStream::connect(addr_b).await.unwrap();
    let (mut remote_a, _) = timeout(TEST_TIMEOUT, server_a.accept()).await.unwrap().unwrap();
    let (mut remote_b, _) = timeout(TEST_TIMEOUT, server_b.accept()).await.unwrap().unwrap();

    let hello_a = accept_handshake(&mut remote_a).await;
    let hello_b = accept_handshake(&mut remote_b).await;
    assert!(hello_a.windows(13).any(|w| w == b"a.example.com"));
    assert!(hello_b.windows(13).any(|w| w == b"b.example.com"));
    assert!(!hello_b.windows(13).any(|w| w == b"a.example.com"));
}
