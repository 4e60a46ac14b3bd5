//! Client session
//!
//! `ClientSession` models one accepted TCP connection as seen by the broker:
//! the write half of the socket behind an exclusive async lock, the client's
//! exact-topic subscriptions, the client id assigned at CONNECT, and a closed
//! flag. The read half is not stored here; the connection task owns it
//! (wrapped in a `BufReader`) because reads are only ever issued from that
//! task.
//!
//! `close` is how other tasks (broker shutdown, the connection task's own
//! cleanup) end a session: it sets the flag so later writes fail fast and
//! wakes the connection task blocked in its read.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::io::{self, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::broker::topic::SubscriptionSet;

/// Broker-local identifier of a connection; unrelated to the MQTT client id.
pub type SessionId = u64;

#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    peer: SocketAddr,
    client_id: RwLock<String>,
    subscriptions: Mutex<SubscriptionSet>,
    writer: AsyncMutex<OwnedWriteHalf>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl ClientSession {
    /// Split `stream` into a session (write side) and the buffered read side
    /// for the connection task.
    pub fn new(id: SessionId, stream: TcpStream, peer: SocketAddr) -> (Self, BufReader<OwnedReadHalf>) {
        let (read_half, write_half) = stream.into_split();
        let session = Self {
            id,
            peer,
            client_id: RwLock::new(String::new()),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            writer: AsyncMutex::new(write_half),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        };
        (session, BufReader::new(read_half))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Client id from CONNECT; empty until the session is connected.
    pub fn client_id(&self) -> String {
        self.client_id.read().clone()
    }

    pub fn set_client_id(&self, client_id: impl Into<String>) {
        *self.client_id.write() = client_id.into();
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.lock().matches(topic)
    }

    pub fn subscribe<I, T>(&self, topics: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut subscriptions = self.subscriptions.lock();
        for topic in topics {
            subscriptions.subscribe(topic);
        }
    }

    pub fn clear_subscriptions(&self) {
        self.subscriptions.lock().clear();
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Write one complete packet. Writes are serialized so concurrent
    /// fan-out never interleaves bytes of two packets.
    pub async fn write_packet(&self, packet: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(packet).await?;
        writer.flush().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the session closed and wake its connection task.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // notify_one stores a permit, so a close issued before the task
        // starts waiting is not lost.
        self.close_signal.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }
}
