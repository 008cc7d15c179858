// End-to-end sessions against a real server on the loopback interface.
// The client side speaks the iperf3 wire protocol by hand.

use edgeperf3::protocol::{Command, COOKIE_SIZE, UDP_HANDSHAKE_REPLY};
use edgeperf3::{Config, Error, Server};
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const COOKIE: &[u8; COOKIE_SIZE] = b"loopbacktestcookie0123456789abcdefghi";

async fn loopback_server() -> Server {
    let config = Config::server(0).with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST));
    Server::bind(config).await.unwrap()
}

async fn expect_command(stream: &mut TcpStream, expected: Command) {
    let byte = stream.read_u8().await.unwrap();
    assert_eq!(byte, expected.as_byte(), "expected {}", expected);
}

async fn send_framed(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

/// Connects, sends the cookie and parameters, and waits for CREATE_STREAMS.
async fn open_control(addr: SocketAddr, params: &[u8]) -> TcpStream {
    let mut control = TcpStream::connect(addr).await.unwrap();
    control.write_all(COOKIE).await.unwrap();
    expect_command(&mut control, Command::ParamExchange).await;
    send_framed(&mut control, params).await;
    expect_command(&mut control, Command::CreateStreams).await;
    control
}

/// Ends the test and runs the result exchange; returns the server result.
async fn finish_test(control: &mut TcpStream) -> Value {
    control
        .write_all(&[Command::TestEnd.as_byte()])
        .await
        .unwrap();
    expect_command(control, Command::ExchangeResults).await;
    send_framed(control, br#"{"streams":[{"id":1,"bytes":0}]}"#).await;

    let len = control.read_u32().await.unwrap();
    let mut body = vec![0u8; len as usize];
    control.read_exact(&mut body).await.unwrap();

    expect_command(control, Command::DisplayResults).await;
    control
        .write_all(&[Command::IperfDone.as_byte()])
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_tcp_forward_session() {
    let server = loopback_server().await;
    let addr = server.local_addr().unwrap();

    let client = async {
        let mut control = open_control(addr, br#"{"tcp":true,"time":1,"reverse":false}"#).await;
        let mut data = TcpStream::connect(addr).await.unwrap();
        data.write_all(COOKIE).await.unwrap();
        expect_command(&mut control, Command::TestStart).await;
        expect_command(&mut control, Command::TestRunning).await;

        data.write_all(&[0x5A; 100_000]).await.unwrap();
        data.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        finish_test(&mut control).await
    };

    let (report, server_result) = timeout(Duration::from_secs(10), async {
        tokio::join!(server.serve_one(), client)
    })
    .await
    .unwrap();

    let report = report.unwrap();
    assert!(report.acknowledged);
    assert_eq!(report.cookie.as_bytes(), COOKIE);
    assert_eq!(report.snapshot.total_bytes, 100_000);
    assert_eq!(server_result["streams"][0]["bytes"], 100_000);
    assert_eq!(server_result["congestion_used"], "cubic");
}

#[tokio::test]
async fn test_tcp_data_half_close_still_exchanges_results() {
    let server = loopback_server().await;
    let addr = server.local_addr().unwrap();

    let client = async {
        let mut control = open_control(addr, b"{}").await;
        let mut data = TcpStream::connect(addr).await.unwrap();
        data.write_all(COOKIE).await.unwrap();
        expect_command(&mut control, Command::TestStart).await;
        expect_command(&mut control, Command::TestRunning).await;

        data.write_all(&[0x5A; 10_000]).await.unwrap();
        data.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = finish_test(&mut control).await;
        drop(data);
        result
    };

    let (report, server_result) = timeout(Duration::from_secs(10), async {
        tokio::join!(server.serve_one(), client)
    })
    .await
    .unwrap();

    let report = report.unwrap();
    assert!(report.acknowledged);
    assert_eq!(report.snapshot.total_bytes, 10_000);
    assert_eq!(server_result["streams"][0]["bytes"], 10_000);
}

#[tokio::test]
async fn test_tcp_reverse_session() {
    let server = loopback_server().await;
    let addr = server.local_addr().unwrap();

    let client = async {
        let mut control = open_control(addr, br#"{"reverse":true}"#).await;
        let mut data = TcpStream::connect(addr).await.unwrap();
        data.write_all(COOKIE).await.unwrap();
        expect_command(&mut control, Command::TestStart).await;
        expect_command(&mut control, Command::TestRunning).await;

        let mut received = 0u64;
        let mut buf = vec![0u8; 16 * 1024];
        let _ = timeout(Duration::from_millis(100), async {
            loop {
                let n = data.read(&mut buf).await.unwrap();
                assert!(buf[..n].iter().all(|&b| b == 0xAA));
                received += n as u64;
            }
        })
        .await;

        let result = finish_test(&mut control).await;
        (received, result)
    };

    let (report, (received, server_result)) = timeout(Duration::from_secs(10), async {
        tokio::join!(server.serve_one(), client)
    })
    .await
    .unwrap();

    let report = report.unwrap();
    assert!(received > 0);
    assert!(report.snapshot.total_bytes >= received);
    assert_eq!(
        server_result["streams"][0]["bytes"],
        report.snapshot.total_bytes
    );
}

#[tokio::test]
async fn test_udp_forward_session() {
    let server = loopback_server().await;
    let addr = server.local_addr().unwrap();

    let client = async {
        let mut control = open_control(addr, br#"{"udp":true}"#).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&[0x39, 0x38, 0x37, 0x36], addr).await.unwrap();
        let mut reply = [0u8; 4];
        let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 4);
        assert_eq!(reply, UDP_HANDSHAKE_REPLY);

        expect_command(&mut control, Command::TestStart).await;
        expect_command(&mut control, Command::TestRunning).await;

        for _ in 0..10 {
            socket.send_to(&[0x11; 1000], addr).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        finish_test(&mut control).await
    };

    let (report, server_result) = timeout(Duration::from_secs(10), async {
        tokio::join!(server.serve_one(), client)
    })
    .await
    .unwrap();

    let report = report.unwrap();
    assert!(report.params.udp);
    assert_eq!(report.snapshot.total_packets, 10);
    assert_eq!(report.snapshot.total_bytes, 10_000);
    assert!(server_result.get("congestion_used").is_none());
}

#[tokio::test]
async fn test_aborted_session_does_not_stop_server() {
    let server = loopback_server().await;
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let clients = async {
        // Short cookie: the first session aborts.
        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"short").await.unwrap();
        bad.shutdown().await.unwrap();
        let mut rest = Vec::new();
        bad.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        // The next client is served normally.
        let mut control = open_control(addr, b"{}").await;
        let mut data = TcpStream::connect(addr).await.unwrap();
        data.write_all(COOKIE).await.unwrap();
        expect_command(&mut control, Command::TestStart).await;
        expect_command(&mut control, Command::TestRunning).await;
        data.write_all(&[1u8; 4096]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = finish_test(&mut control).await;

        shutdown.cancel();
        result
    };

    let (served, server_result) = timeout(Duration::from_secs(10), async {
        tokio::join!(server.run_until(shutdown.clone()), clients)
    })
    .await
    .unwrap();

    served.unwrap();
    assert_eq!(server_result["streams"][0]["bytes"], 4096);
}

#[tokio::test]
async fn test_run_until_returns_when_cancelled() {
    let server = loopback_server().await;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    timeout(Duration::from_secs(1), server.run_until(shutdown))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_rejects_invalid_config() {
    let config = Config::server(0)
        .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_result_buffer_size(0);

    assert!(matches!(Server::bind(config).await, Err(Error::Config(_))));
}
