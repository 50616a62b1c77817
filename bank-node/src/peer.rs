use std::fmt;

use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use bank_commons::codec::{read_frame, write_frame};
use bank_commons::Message;
use futures::stream::BoxStream;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration, Instant};

/// Total time `dial` will keep retrying a refused connection before giving
/// up. The original's ZeroMQ PAIR sockets connect lazily and reconnect in
/// the background regardless of peer readiness at startup; a bare
/// `TcpStream::connect` has no such behavior, so `dial` retries for a bit to
/// avoid making node startup order-sensitive.
const DIAL_RETRY_BUDGET: Duration = Duration::from_secs(10);
const DIAL_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A small, `Copy` identifier for a peer link, stable across the life of the
/// connection. Snapshot state references links by handle rather than by
/// socket address so it never has to borrow the link itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(u64);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Allocates `PeerHandle`s in increasing order for the lifetime of a node.
#[derive(Default)]
pub struct PeerHandleAllocator {
    next: u64,
}

impl PeerHandleAllocator {
    pub fn next(&mut self) -> PeerHandle {
        let handle = PeerHandle(self.next);
        self.next += 1;
        handle
    }
}

/// How a link came to exist: dialed out to a configured peer, or accepted
/// from a listen socket. Only listen links start out not-ready (spec.md
/// §4.1: "a listen-side link is not ready until it receives CONNECT").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    DialOut,
    Listen,
}

/// One event produced by a peer link's read half: either a decoded message,
/// or the link closing (EOF or I/O error), carrying its handle either way.
pub enum LinkEvent {
    Message(PeerHandle, Message),
    Closed(PeerHandle, anyhow::Error),
}

/// The write half and handshake state of one peer link. The read half is
/// consumed into a [`LinkEvent`] stream fed into the node's merged poll set;
/// this struct is everything the node needs to *send* to the peer, plus
/// enough bookkeeping to know whether it's eligible for CH-L recording.
pub struct LinkWriter {
    pub origin: Origin,
    pub ready: bool,
    writer: OwnedWriteHalf,
}

impl LinkWriter {
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        write_frame(&mut self.writer, message)
            .await
            .context("writing to peer link")
    }
}

/// Connects out to a configured peer and runs the CONNECT/OK handshake
/// inline, per spec.md §4.1. Returns the established link split into its
/// write half and a read-event stream.
pub async fn dial(
    handle: PeerHandle,
    addr: &str,
) -> Result<(LinkWriter, BoxStream<'static, LinkEvent>)> {
    let stream = connect_with_retry(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_frame(&mut write_half, &Message::Connect)
        .await
        .context("sending CONNECT handshake")?;
    match read_frame::<Message, _>(&mut reader).await? {
        Some(Message::Ok) => {}
        Some(other) => {
            return Err(anyhow!(
                "peer at {addr} refused handshake with unexpected reply {other:?}"
            ))
        }
        None => return Err(anyhow!("peer at {addr} closed the link during handshake")),
    }

    let writer = LinkWriter {
        origin: Origin::DialOut,
        ready: true,
        writer: write_half,
    };
    Ok((writer, read_stream(handle, reader)))
}

async fn connect_with_retry(addr: &str) -> Result<TcpStream> {
    let deadline = Instant::now() + DIAL_RETRY_BUDGET;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) if Instant::now() < deadline => {
                tracing::debug!(addr, %err, "dial failed, retrying");
                sleep(DIAL_RETRY_INTERVAL).await;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("dialing peer at {addr}"));
            }
        }
    }
}

/// Wraps a freshly accepted inbound connection. The link starts not-ready:
/// the node must see a CONNECT message on it before it joins the ready set.
pub fn accept(handle: PeerHandle, stream: TcpStream) -> (LinkWriter, BoxStream<'static, LinkEvent>) {
    let (read_half, write_half) = stream.into_split();
    let reader = BufReader::new(read_half);
    let writer = LinkWriter {
        origin: Origin::Listen,
        ready: false,
        writer: write_half,
    };
    (writer, read_stream(handle, reader))
}

fn read_stream(
    handle: PeerHandle,
    mut reader: BufReader<OwnedReadHalf>,
) -> BoxStream<'static, LinkEvent> {
    Box::pin(stream! {
        loop {
            match read_frame::<Message, _>(&mut reader).await {
                Ok(Some(message)) => yield LinkEvent::Message(handle, message),
                Ok(None) => {
                    yield LinkEvent::Closed(handle, anyhow!("peer link closed"));
                    return;
                }
                Err(err) => {
                    yield LinkEvent::Closed(handle, err.into());
                    return;
                }
            }
        }
    })
}
