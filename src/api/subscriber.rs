//! The caller-facing subscriber runtime.
//!
//! A [`Subscriber`] owns one protocol connection and splits the work across
//! two parties: the consumer (whoever calls [`fetch`](Subscriber::fetch),
//! [`subscribe`](Subscriber::subscribe) and friends) and a background
//! reader task that decodes inbound frames off the transport.
//!
//! Decoded messages travel through two mailboxes. The *delivery* mailbox
//! carries them from the reader to the consumer; the *free pool* carries
//! spent messages back after [`reuse`](Subscriber::reuse), so the reader
//! fills recycled buffers instead of allocating. A message is always in
//! exactly one mailbox, or held by exactly one party.

use std::{io, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    select,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::options::{ConnectOpts, ServerInfo};
use crate::{
    codec::{DecodeError, FrameDecoder},
    connection::{Connection, WriteError, WriteHalf},
    protocol::{Headers, Kind, Message},
    sync::{Mailbox, RecvError, SendError},
};

/// Error returned when establishing a subscriber fails.
///
/// On failure no background task has been spawned and nothing needs to be
/// torn down.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The transport could not be dialed.
    #[error("failed to reach the server")]
    ConnectFailed(#[source] io::Error),

    /// The server spoke first, but not with an INFO frame.
    #[error("the server did not open with an INFO frame")]
    NoInfo,

    /// Reading the server's greeting failed.
    #[error("handshake failed")]
    Handshake(#[from] DecodeError),

    /// The INFO document could not be deserialized.
    #[error("malformed server INFO payload")]
    BadInfo(#[source] serde_json::Error),

    /// The options could not be rendered into the CONNECT payload.
    #[error("could not serialize the CONNECT options")]
    BadOpts(#[source] serde_json::Error),

    /// Sending CONNECT failed.
    #[error("failed to send CONNECT")]
    Rejected(#[from] WriteError),
}

/// Error returned when [`Subscriber::fetch`] yields no message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// No message arrived before the deadline. Not terminal.
    #[error("no message arrived before the deadline")]
    Timeout,

    /// The connection failed underneath the subscriber: the reader task hit
    /// a transport or protocol error and stopped.
    #[error("the connection was lost")]
    Disconnected,

    /// This subscriber has been shut down with
    /// [`disconnect`](Subscriber::disconnect).
    #[error("the subscriber has been closed")]
    Closed,
}

/// Lifecycle of a subscriber. `Fresh` is the time before
/// [`Subscriber::connect`] returns; a constructed value starts `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Stopping,
    Stopped,
}

/// A subscribing client over one protocol connection.
///
/// Created by [`connect`](Subscriber::connect) (TCP) or
/// [`connect_over`](Subscriber::connect_over) (any byte stream). The
/// generic parameters are the transport's read and write halves and default
/// to the TCP ones.
///
/// # Message recycling
///
/// [`fetch`](Self::fetch) hands out owned [`Message`]s. Returning them with
/// [`reuse`](Self::reuse) keeps the free pool warm so that steady-state
/// traffic runs allocation-free; dropping them instead is safe but forfeits
/// the recycling.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use gnat::{ConnectOpts, Subscriber};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut sub = Subscriber::connect(ConnectOpts::new("127.0.0.1", 4222)).await?;
/// sub.subscribe("orders.>", None, "1").await?;
///
/// loop {
///     let msg = sub.fetch(Duration::from_secs(5)).await?;
///     println!("{:?}", msg);
///     sub.reuse(msg);
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct Subscriber<R = OwnedReadHalf, W = OwnedWriteHalf> {
    state: State,
    writer: WriteHalf<W>,
    free_pool: Mailbox<Message>,
    delivery: Mailbox<Message>,
    token: CancellationToken,
    handle: Option<JoinHandle<FrameDecoder<R>>>,
    info: ServerInfo,
}

impl Subscriber {
    /// Dials the server over TCP, performs the INFO/CONNECT handshake and
    /// spawns the reader task.
    pub async fn connect(opts: ConnectOpts) -> Result<Self, ConnectError> {
        let conn = Connection::dial(opts.host(), opts.port())
            .await
            .map_err(ConnectError::ConnectFailed)?;
        Self::start(conn, opts).await
    }
}

impl<R, W> Subscriber<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Runs the subscriber over an already-established byte stream.
    ///
    /// Used by tests to drive the full protocol over in-memory transports;
    /// works just as well over any reliable stream such as a TLS session.
    pub async fn connect_over(read: R, write: W, opts: ConnectOpts) -> Result<Self, ConnectError> {
        Self::start(Connection::over(read, write), opts).await
    }

    async fn start(mut conn: Connection<R, W>, opts: ConnectOpts) -> Result<Self, ConnectError> {
        // The server speaks first.
        let mut first = Message::new();
        conn.decoder.read_message(&mut first).await?;
        if first.kind() != Kind::Info {
            return Err(ConnectError::NoInfo);
        }
        let info: ServerInfo =
            serde_json::from_slice(first.args().unwrap_or(b"{}")).map_err(ConnectError::BadInfo)?;

        let json = opts.connect_json().map_err(ConnectError::BadOpts)?;
        conn.writer
            .write_frame(|f, buf| f.connect(buf, json.as_bytes()))
            .await?;

        let free_pool = Mailbox::unbounded();
        // The handshake message seeds the pool with its warmed-up buffers.
        first.reset(Kind::Unknown);
        let _ = free_pool.try_send(first);
        let delivery = Mailbox::new(opts.delivery_capacity());

        let token = CancellationToken::new();
        let handle = tokio::spawn(read_task(
            conn.decoder,
            conn.writer.clone(),
            free_pool.clone(),
            delivery.clone(),
            token.clone(),
        ));

        Ok(Self {
            state: State::Running,
            writer: conn.writer,
            free_pool,
            delivery,
            token,
            handle: Some(handle),
            info,
        })
    }

    /// The document the server announced itself with.
    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// Returns `true` once the subscriber or its connection has stopped.
    pub fn is_closed(&self) -> bool {
        self.state != State::Running || self.token.is_cancelled()
    }

    /// Registers interest in `subject` under the subscription id `sid`,
    /// optionally joining a queue group.
    ///
    /// Purely client-to-server; the server acknowledges nothing unless
    /// verbose mode is on. A rejected subscription surfaces later as an
    /// inbound message of kind [`Kind::Err`].
    pub async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        sid: &str,
    ) -> Result<(), WriteError> {
        self.ensure_running()?;
        self.writer
            .write_frame(|f, buf| {
                f.sub(buf, subject.as_bytes(), queue.map(str::as_bytes), sid.as_bytes())
            })
            .await
    }

    /// Removes the subscription `sid`, immediately or after `max_msgs`
    /// further deliveries.
    pub async fn unsubscribe(&self, sid: &str, max_msgs: Option<u64>) -> Result<(), WriteError> {
        self.ensure_running()?;
        self.writer
            .write_frame(|f, buf| f.unsub(buf, sid.as_bytes(), max_msgs))
            .await
    }

    /// Publishes `payload` on `subject`, optionally soliciting responses on
    /// `reply`.
    pub async fn publish(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: &[u8],
    ) -> Result<(), WriteError> {
        self.ensure_running()?;
        self.writer
            .write_frame(|f, buf| {
                f.publish(buf, subject.as_bytes(), reply.map(str::as_bytes), payload)
            })
            .await
    }

    /// Publishes with a header block.
    pub async fn publish_with_headers(
        &self,
        subject: &str,
        reply: Option<&str>,
        headers: &Headers,
        payload: &[u8],
    ) -> Result<(), WriteError> {
        self.ensure_running()?;
        self.writer
            .write_frame(|f, buf| {
                f.hpublish(buf, subject.as_bytes(), reply.map(str::as_bytes), headers, payload)
            })
            .await
    }

    /// Waits up to `timeout` for the next inbound message.
    ///
    /// Messages come out in the order the server produced them. Server-side
    /// errors are messages too: a `-ERR` arrives as kind [`Kind::Err`], not
    /// as a `Result` failure.
    ///
    /// # Errors
    ///
    /// [`FetchError::Timeout`] if nothing arrived in time (recoverable),
    /// [`FetchError::Disconnected`] if the connection failed underneath,
    /// [`FetchError::Closed`] after [`disconnect`](Self::disconnect).
    pub async fn fetch(&self, timeout: Duration) -> Result<Message, FetchError> {
        if self.state != State::Running {
            return Err(FetchError::Closed);
        }
        match self.delivery.receive(timeout).await {
            Ok(msg) => Ok(msg),
            Err(RecvError::Timeout) => Err(FetchError::Timeout),
            Err(RecvError::Closed) => Err(FetchError::Disconnected),
        }
    }

    /// Returns a fetched message to the free pool.
    ///
    /// The message's buffers stay allocated and will back a future inbound
    /// frame. After the subscriber has been disconnected the message is
    /// simply dropped.
    pub fn reuse(&self, msg: Message) {
        let _ = self.free_pool.try_send(msg);
    }

    /// Shuts the subscriber down. Idempotent.
    ///
    /// Signals the reader task, joins it, drains both mailboxes and closes
    /// the transport. Completes in bounded time even while the reader is
    /// parked on a transport read or a full delivery mailbox.
    pub async fn disconnect(&mut self) {
        if self.state != State::Running {
            return;
        }
        self.state = State::Stopping;

        self.token.cancel();
        // Wakes a reader parked on a full delivery mailbox.
        self.delivery.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }

        self.free_pool.close();
        while let Some(mut msg) = self.delivery.try_receive() {
            msg.free();
        }
        while let Some(mut msg) = self.free_pool.try_receive() {
            msg.free();
        }
        self.writer.close().await;

        self.state = State::Stopped;
    }

    fn ensure_running(&self) -> Result<(), WriteError> {
        match self.state {
            State::Running => Ok(()),
            State::Stopping | State::Stopped => Err(WriteError::Closed),
        }
    }
}

/// The background receive loop.
///
/// Draws a message from the free pool (allocating a fresh one when the pool
/// is dry), lets the decoder fill it, and pushes it into the delivery
/// mailbox. Inbound PINGs are answered on the spot and recycled without
/// being delivered. Any decode or write failure raises the attention token
/// and ends the loop; the delivery mailbox is closed on the way out so
/// consumers observe the end of the stream once they have drained it.
async fn read_task<R, W>(
    mut decoder: FrameDecoder<R>,
    writer: WriteHalf<W>,
    free_pool: Mailbox<Message>,
    delivery: Mailbox<Message>,
    token: CancellationToken,
) -> FrameDecoder<R>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let mut msg = free_pool.try_receive().unwrap_or_default();

        let decoded = select! {
            res = decoder.read_message(&mut msg) => Some(res),
            () = token.cancelled() => None,
        };
        match decoded {
            // Stop requested while parked on the transport.
            None => {
                let _ = free_pool.try_send(msg);
                break;
            }
            Some(Err(_)) => {
                let _ = free_pool.try_send(msg);
                token.cancel();
                break;
            }
            Some(Ok(())) => {}
        }

        if msg.kind() == Kind::Ping {
            let ponged = writer.write_frame(|f, buf| f.pong(buf)).await;
            let _ = free_pool.try_send(msg);
            if ponged.is_err() {
                token.cancel();
                break;
            }
            continue;
        }

        // A full mailbox parks us here, which is the backpressure path;
        // disconnect unblocks it by closing the mailbox.
        if let Err(SendError(rejected)) = delivery.send(msg).await {
            let _ = free_pool.try_send(rejected);
            break;
        }
    }

    delivery.close();
    decoder
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf as IoWriteHalf};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);
    const INFO: &[u8] = b"INFO {\"server_id\":\"t1\",\"max_payload\":1048576,\"headers\":true}\r\n";

    async fn connected(
        opts: ConnectOpts,
    ) -> (Subscriber<ReadHalf<DuplexStream>, IoWriteHalf<DuplexStream>>, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);

        server.write_all(INFO).await.unwrap();

        let (read, write) = split(client);
        let sub = tokio::spawn(Subscriber::connect_over(read, write, opts));

        // Swallow the CONNECT line the client answers with.
        read_line(&mut server).await;

        (sub.await.unwrap().unwrap(), server)
    }

    async fn read_line(server: &mut DuplexStream) -> Vec<u8> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            server.read_exact(&mut byte).await.unwrap();
            line.push(byte[0]);
            if line.ends_with(b"\r\n") {
                return line;
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn handshake_exposes_server_info() {
        let (mut sub, _server) = connected(ConnectOpts::default()).await;
        assert_eq!(sub.server_info().server_id, "t1");
        assert_eq!(sub.server_info().max_payload, 1_048_576);
        assert!(!sub.is_closed());
        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscribe_emits_sub_frame() {
        let (mut sub, mut server) = connected(ConnectOpts::default()).await;

        sub.subscribe("FOO.*", None, "11").await.unwrap();
        assert_eq!(read_line(&mut server).await, b"SUB FOO.* 11\r\n");

        sub.subscribe("JOBS", Some("workers"), "12").await.unwrap();
        assert_eq!(read_line(&mut server).await, b"SUB JOBS workers 12\r\n");

        sub.unsubscribe("11", Some(3)).await.unwrap();
        assert_eq!(read_line(&mut server).await, b"UNSUB 11 3\r\n");

        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fetch_delivers_in_server_order() {
        let (mut sub, mut server) = connected(ConnectOpts::default()).await;

        server
            .write_all(b"MSG A 1 5\r\nfirst\r\nMSG A 1 6\r\nsecond\r\nHMSG A 1 19 24\r\nNATS/1.0\r\nSeq:3\r\n\r\nthird\r\n")
            .await
            .unwrap();

        let msg = sub.fetch(TIMEOUT).await.unwrap();
        assert_eq!(msg.kind(), Kind::Msg);
        assert_eq!(msg.payload(), Some(&b"first"[..]));
        sub.reuse(msg);

        let msg = sub.fetch(TIMEOUT).await.unwrap();
        assert_eq!(msg.payload(), Some(&b"second"[..]));
        sub.reuse(msg);

        let msg = sub.fetch(TIMEOUT).await.unwrap();
        assert_eq!(msg.kind(), Kind::HMsg);
        assert_eq!(msg.payload(), Some(&b"third"[..]));
        let fields: Vec<_> = msg.headers().iter().unwrap().collect();
        assert_eq!(fields, vec![(&b"Seq"[..], &b"3"[..])]);
        sub.reuse(msg);

        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fetch_times_out_on_silence() {
        let (mut sub, _server) = connected(ConnectOpts::default()).await;
        assert_eq!(
            sub.fetch(Duration::from_millis(50)).await.unwrap_err(),
            FetchError::Timeout
        );
        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn server_err_is_a_message_not_an_error() {
        let (mut sub, mut server) = connected(ConnectOpts::default()).await;

        server.write_all(b"-ERR 'Unknown Subject'\r\n").await.unwrap();
        let msg = sub.fetch(TIMEOUT).await.unwrap();
        assert_eq!(msg.kind(), Kind::Err);
        assert_eq!(msg.args(), Some(&b"Unknown Subject"[..]));
        sub.reuse(msg);

        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ping_is_answered_and_not_delivered() {
        let (mut sub, mut server) = connected(ConnectOpts::default()).await;

        server.write_all(b"PING\r\nMSG A 1 2\r\nhi\r\n").await.unwrap();
        assert_eq!(read_line(&mut server).await, b"PONG\r\n");

        // The PING itself never reaches the consumer.
        let msg = sub.fetch(TIMEOUT).await.unwrap();
        assert_eq!(msg.kind(), Kind::Msg);
        sub.reuse(msg);

        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn messages_are_recycled_through_the_pool() {
        let (mut sub, mut server) = connected(ConnectOpts::default()).await;

        // One message at a time, reused after every fetch: the pool should
        // keep the population at one (the handshake message) plus one.
        for i in 0..16 {
            let frame = format!("MSG LOOP 1 {}\r\n{}\r\n", i.to_string().len(), i);
            server.write_all(frame.as_bytes()).await.unwrap();
            let msg = sub.fetch(TIMEOUT).await.unwrap();
            assert_eq!(msg.payload(), Some(i.to_string().as_bytes()));
            sub.reuse(msg);
        }
        assert!(sub.free_pool.len() <= 2);

        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn disconnect_is_bounded_and_idempotent() {
        let (mut sub, server) = connected(ConnectOpts::default()).await;

        // The reader is parked on the transport; disconnect must still
        // return promptly.
        tokio::time::timeout(TIMEOUT, sub.disconnect()).await.unwrap();
        assert!(sub.is_closed());
        assert_eq!(sub.fetch(TIMEOUT).await.unwrap_err(), FetchError::Closed);

        // No message lingers anywhere.
        assert!(sub.delivery.is_empty());
        assert!(sub.free_pool.is_empty());

        // Idempotent.
        tokio::time::timeout(TIMEOUT, sub.disconnect()).await.unwrap();

        // Sends after shutdown fail cleanly.
        assert!(matches!(
            sub.publish("X", None, b"y").await,
            Err(WriteError::Closed)
        ));
        drop(server);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn disconnect_unblocks_backpressured_reader() {
        let opts = ConnectOpts::default().with_delivery_capacity(1);
        let (mut sub, mut server) = connected(opts).await;

        // Two undelivered messages: one fills the mailbox, the second parks
        // the reader in the send path.
        server.write_all(b"MSG A 1 1\r\nx\r\nMSG A 1 1\r\ny\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(TIMEOUT, sub.disconnect()).await.unwrap();
        assert_eq!(sub.fetch(TIMEOUT).await.unwrap_err(), FetchError::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn server_eof_surfaces_as_disconnected() {
        let (mut sub, server) = connected(ConnectOpts::default()).await;

        drop(server);
        assert_eq!(sub.fetch(TIMEOUT).await.unwrap_err(), FetchError::Disconnected);
        assert!(sub.is_closed());

        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn buffered_messages_survive_connection_loss() {
        let (mut sub, mut server) = connected(ConnectOpts::default()).await;

        server.write_all(b"MSG A 1 4\r\nlast\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(server);

        // The message decoded before the EOF is still deliverable.
        let msg = sub.fetch(TIMEOUT).await.unwrap();
        assert_eq!(msg.payload(), Some(&b"last"[..]));
        sub.reuse(msg);

        assert_eq!(sub.fetch(TIMEOUT).await.unwrap_err(), FetchError::Disconnected);
        sub.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejects_non_info_greeting() {
        let (client, mut server) = duplex(1024);
        server.write_all(b"PONG\r\n").await.unwrap();

        let (read, write) = split(client);
        let err = Subscriber::connect_over(read, write, ConnectOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::NoInfo));
    }
}
