use loadgate::{AdmissionEngine, BucketParams, ListConfig, StaticListSource, SweepConfig};
use loadgate_server::gate::Gate;
use loadgate_server::identity::IdentitySource;
use loadgate_server::metrics::Metrics;
use loadgate_server::transport::tcp::{TcpTransport, guard_connection};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn gate_with(builder: loadgate::EngineBuilder) -> Gate {
    let engine = builder.sweep(SweepConfig::disabled()).start().await.unwrap();
    Gate::new(
        Arc::new(engine),
        IdentitySource::PeerIp,
        Arc::new(Metrics::new()),
    )
}

async fn gate(burst: u32) -> Gate {
    gate_with(
        AdmissionEngine::builder().default_limit(BucketParams::per_second(1.0, burst).unwrap()),
    )
    .await
}

async fn spawn_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn spawn_gate(gate: Gate, upstream: SocketAddr) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let transport = TcpTransport::new("127.0.0.1", addr.port(), &upstream.to_string());
    tokio::spawn(transport.serve(listener, gate));
    addr
}

async fn read_to_eof(stream: &mut TcpStream) -> usize {
    let mut buf = [0u8; 16];
    tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("connection was not closed")
        .unwrap()
}

#[tokio::test]
async fn test_admitted_connection_is_piped() {
    let upstream = spawn_echo_upstream().await;
    let gate = gate(5).await;
    let addr = spawn_gate(gate.clone(), upstream).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"ping").await.unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    let metrics = gate.export_prometheus();
    assert!(metrics.contains("loadgate_verdicts_total{verdict=\"admit\"} 1"));
    assert!(metrics.contains("loadgate_requests_by_transport{transport=\"tcp\"} 1"));
}

#[tokio::test]
async fn test_rate_limited_connection_is_closed() {
    let upstream = spawn_echo_upstream().await;
    let gate = gate(1).await;
    let addr = spawn_gate(gate.clone(), upstream).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    first.read_exact(&mut buf).await.unwrap();

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_to_eof(&mut second).await, 0);
    assert!(
        gate.export_prometheus()
            .contains("loadgate_verdicts_total{verdict=\"reject_rate\"} 1")
    );
}

#[tokio::test]
async fn test_denied_peer_is_closed() {
    let upstream = spawn_echo_upstream().await;
    let gate = gate_with(
        AdmissionEngine::builder()
            .deny_list(ListConfig::from_source(StaticListSource::new(["127.0.0.1"]))),
    )
    .await;
    let addr = spawn_gate(gate.clone(), upstream).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_to_eof(&mut client).await, 0);
    assert!(
        gate.export_prometheus()
            .contains("loadgate_verdicts_total{verdict=\"reject_policy\"} 1")
    );
}

#[tokio::test]
async fn test_unreachable_upstream_counts_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let gate = gate(5).await;
    let addr = spawn_gate(gate.clone(), dead).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert_eq!(read_to_eof(&mut client).await, 0);

    // The error is recorded just before the connection task finishes
    for _ in 0..50 {
        if gate.export_prometheus().contains("loadgate_upstream_errors_total 1") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upstream error was not recorded");
}

#[tokio::test]
async fn test_guard_connection_on_any_stream() {
    let gate = gate(1).await;
    let peer: SocketAddr = "192.0.2.44:40000".parse().unwrap();

    let (stream, _remote) = tokio::io::duplex(64);
    assert!(guard_connection(&gate, stream, peer).await.is_some());

    let (stream, mut remote) = tokio::io::duplex(64);
    assert!(guard_connection(&gate, stream, peer).await.is_none());

    let mut buf = [0u8; 8];
    assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
}
