//! End-to-end flows against a scripted in-process server over real TCP.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
};

use gnat::{ConnectOpts, FetchError, Headers, Kind, Subscriber};

const TIMEOUT: Duration = Duration::from_secs(5);
const INFO: &str = "INFO {\"server_id\":\"itest\",\"version\":\"2.10.0\",\"headers\":true,\"max_payload\":1048576}\r\n";

struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    /// Accepts one client, greets it with INFO and swallows its CONNECT.
    async fn accept(listener: TcpListener) -> Peer {
        let (stream, _addr) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        write.write_all(INFO.as_bytes()).await.unwrap();

        let mut peer = Peer {
            reader: BufReader::new(read),
            writer: write,
        };
        let connect = peer.read_line().await;
        assert!(connect.starts_with("CONNECT {"));
        peer
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line
    }

    async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut body = vec![0u8; len];
        self.reader.read_exact(&mut body).await.unwrap();
        body
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }
}

async fn listen() -> (TcpListener, ConnectOpts) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ConnectOpts::new("127.0.0.1", port))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn publish_subscribe_round_trip() {
    let (listener, opts) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(listener).await;

        assert_eq!(peer.read_line().await, "SUB echo 1\r\n");

        // Echo the publication back to the lone subscriber.
        let publish = peer.read_line().await;
        assert_eq!(publish, "PUB echo 11\r\n");
        let payload = peer.read_exact(11 + 2).await;
        assert_eq!(&payload[..11], b"Hello NATS!");

        peer.send(b"MSG echo 1 11\r\nHello NATS!\r\n").await;
    });

    let mut sub = Subscriber::connect(opts).await.unwrap();
    assert_eq!(sub.server_info().server_id, "itest");

    sub.subscribe("echo", None, "1").await.unwrap();
    sub.publish("echo", None, b"Hello NATS!").await.unwrap();

    let msg = sub.fetch(TIMEOUT).await.unwrap();
    assert_eq!(msg.kind(), Kind::Msg);
    assert_eq!(msg.subject(), Some(&b"echo"[..]));
    assert_eq!(msg.sid(), Some(&b"1"[..]));
    assert_eq!(msg.payload(), Some(&b"Hello NATS!"[..]));
    sub.reuse(msg);

    server.await.unwrap();
    sub.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn headers_travel_both_ways() {
    let (listener, opts) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(listener).await;

        // HPUB echoed back verbatim as HMSG.
        let control = peer.read_line().await;
        let mut parts = control.split_ascii_whitespace();
        assert_eq!(parts.next(), Some("HPUB"));
        let subject = parts.next().unwrap().to_owned();
        let hdr_len: usize = parts.next().unwrap().parse().unwrap();
        let tot_len: usize = parts.next().unwrap().parse().unwrap();
        let body = peer.read_exact(tot_len + 2).await;

        let mut echo = format!("HMSG {subject} 1 {hdr_len} {tot_len}\r\n").into_bytes();
        echo.extend_from_slice(&body);
        peer.send(&echo).await;
    });

    let mut sub = Subscriber::connect(opts).await.unwrap();

    let mut headers = Headers::new();
    headers.append("Trace-Id", "7f2a").unwrap();
    headers.append("Trace-Id", "11b0").unwrap();
    sub.publish_with_headers("traced", None, &headers, b"carried")
        .await
        .unwrap();

    let msg = sub.fetch(TIMEOUT).await.unwrap();
    assert_eq!(msg.kind(), Kind::HMsg);
    assert_eq!(msg.payload(), Some(&b"carried"[..]));
    let fields: Vec<_> = msg.headers().iter().unwrap().collect();
    assert_eq!(
        fields,
        vec![(&b"Trace-Id"[..], &b"7f2a"[..]), (&b"Trace-Id"[..], &b"11b0"[..])]
    );
    sub.reuse(msg);

    server.await.unwrap();
    sub.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_errors_are_delivered_inline() {
    let (listener, opts) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(listener).await;
        assert_eq!(peer.read_line().await, "SUB $SYS.secret 2\r\n");
        peer.send(b"-ERR 'Permissions Violation for Subscription to \"$SYS.secret\"'\r\n")
            .await;
    });

    let mut sub = Subscriber::connect(opts).await.unwrap();
    sub.subscribe("$SYS.secret", None, "2").await.unwrap();

    let msg = sub.fetch(TIMEOUT).await.unwrap();
    assert_eq!(msg.kind(), Kind::Err);
    assert!(msg.args().unwrap().starts_with(b"Permissions Violation"));
    sub.reuse(msg);

    server.await.unwrap();
    sub.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keepalive_is_answered_without_consumer_help() {
    let (listener, opts) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(listener).await;
        peer.send(b"PING\r\n").await;
        assert_eq!(peer.read_line().await, "PONG\r\n");
    });

    let mut sub = Subscriber::connect(opts).await.unwrap();
    // The consumer never fetches; the reader answers on its own.
    server.await.unwrap();
    sub.disconnect().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnect_races_a_blocked_reader() {
    let (listener, opts) = listen().await;
    let server = tokio::spawn(async move {
        let peer = Peer::accept(listener).await;
        // Hold the connection open without sending anything, so the
        // client's reader stays parked on the transport.
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(peer);
    });

    let mut sub = Subscriber::connect(opts).await.unwrap();

    // The reader is blocked on a read; disconnect must still finish fast.
    tokio::time::timeout(TIMEOUT, sub.disconnect()).await.unwrap();

    assert!(sub.is_closed());
    assert_eq!(sub.fetch(TIMEOUT).await.unwrap_err(), FetchError::Closed);
    assert!(matches!(
        sub.subscribe("late", None, "9").await,
        Err(gnat::WriteError::Closed)
    ));

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_connection_surfaces_after_drain() {
    let (listener, opts) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(listener).await;
        peer.send(b"MSG feed 1 7\r\ngoodbye\r\n").await;
        // Closing the socket ends the stream after one delivery.
    });

    let mut sub = Subscriber::connect(opts).await.unwrap();
    server.await.unwrap();

    let msg = sub.fetch(TIMEOUT).await.unwrap();
    assert_eq!(msg.payload(), Some(&b"goodbye"[..]));
    sub.reuse(msg);

    assert_eq!(sub.fetch(TIMEOUT).await.unwrap_err(), FetchError::Disconnected);
    sub.disconnect().await;
}
