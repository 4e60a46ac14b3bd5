//! Broker engine
//!
//! This module contains the minimal MQTT 3.1.1 broker responsible for:
//! - accepting TCP connections and running one task per connection
//! - the per-connection state machine (`AwaitingConnect` -> `Connected`)
//! - handing every inbound publish to the installed `PublishHandler`
//! - forwarding publishes to other sessions subscribed to the exact topic
//! - orderly shutdown
//!
//! Concurrency and usage notes:
//! - The session registry sits behind a read/write lock. Connect and
//!   disconnect take the write lock; fan-out takes the read lock only long
//!   enough to snapshot matching sessions, so no lock is held across socket
//!   writes.
//! - The handler is an `Arc<dyn PublishHandler>` behind its own read/write
//!   lock. Every inbound publish takes the read lock just long enough to clone
//!   the `Arc` and calls the handler with no lock held. A swap takes the write
//!   lock and only affects messages read after it.
//! - A connection's packets are handled strictly in arrival order: the handler
//!   and fan-out for one publish finish before the next packet is read.
//! - There is no keepalive enforcement. A silently dead peer is noticed on the
//!   next failed read or write.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::message::{NoopHandler, PublishHandler, PublishMessage, invoke_handler};
use crate::client::{ClientSession, SessionId};
use crate::config::MqttSettings;
use crate::transport::codec::{self, MAX_REMAINING_LENGTH};
use crate::transport::packet::{
    CONNACK_ACCEPTED, Connect, PINGRESP, Packet, Publish, Subscribe, encode_publish, encode_suback,
    encode_unsuback,
};
use crate::utils::error::{BrokerError, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    AwaitingConnect,
    Connected,
}

/// State shared by the accept loop, every connection task and the `Broker`
/// handle.
struct BrokerState {
    sessions: RwLock<HashMap<SessionId, Arc<ClientSession>>>,
    handler: RwLock<Arc<dyn PublishHandler>>,
    next_session_id: AtomicU64,
    shutting_down: AtomicBool,
    max_packet_size: usize,
}

pub struct Broker {
    state: Arc<BrokerState>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::with_max_packet_size(MAX_REMAINING_LENGTH)
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("local_addr", &*self.local_addr.lock())
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl Broker {
    /// Delay before retrying after a transient accept failure.
    const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

    pub fn new(settings: &MqttSettings) -> Self {
        Self::with_max_packet_size(settings.max_packet_size)
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(BrokerState {
                sessions: RwLock::new(HashMap::new()),
                handler: RwLock::new(Arc::new(NoopHandler)),
                next_session_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
                max_packet_size: max_packet_size.min(MAX_REMAINING_LENGTH),
            }),
            shutdown_tx,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Install the handler invoked for every received publish. Safe to call
    /// while clients are connected.
    pub fn set_publish_handler(&self, handler: Arc<dyn PublishHandler>) {
        *self.state.handler.write() = handler;
    }

    /// Bind `bind` and start accepting clients.
    ///
    /// Returns the bound address and a receiver that yields the error if the
    /// accept loop dies on a non-transient failure. The receiver resolves
    /// with `Err(RecvError)` when the loop ends because of `shutdown`.
    pub async fn start(
        &self,
        bind: &str,
    ) -> Result<(SocketAddr, oneshot::Receiver<BrokerError>), BrokerError> {
        if self.accept_task.lock().is_some() {
            return Err(BrokerError::AlreadyStarted);
        }

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: bind.to_string(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| BrokerError::Bind {
            addr: bind.to_string(),
            source,
        })?;

        info!(addr = %addr, "mqtt broker listening");

        let (fatal_tx, fatal_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            self.state.clone(),
            listener,
            self.shutdown_tx.subscribe(),
            fatal_tx,
        ));

        *self.accept_task.lock() = Some(task);
        *self.local_addr.lock() = Some(addr);
        Ok((addr, fatal_rx))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn session_count(&self) -> usize {
        self.state.sessions.read().len()
    }

    /// Send a server-originated QoS 0 publish to every subscribed session.
    /// Returns the number of sessions the packet was written to.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BrokerError> {
        let packet = encode_publish(topic, payload)?;
        Ok(self.state.forward(topic, &packet, None).await)
    }

    /// Stop accepting, close every live session and wait for all connection
    /// tasks to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        if self.state.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_tx.send_replace(true);

        let sessions: Vec<Arc<ClientSession>> = {
            let mut registry = self.state.sessions.write();
            registry.drain().map(|(_, session)| session).collect()
        };
        for session in &sessions {
            session.close();
        }
        debug!(sessions = sessions.len(), "closed live sessions");

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            task.await?;
        }
        info!("mqtt broker stopped");
        Ok(())
    }
}

async fn accept_loop(
    state: Arc<BrokerState>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    fatal: oneshot::Sender<BrokerError>,
) {
    let mut connections = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "connection task failed");
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (session, reader) = state.register(stream, peer);
                    connections.spawn(handle_connection(state.clone(), session, reader));
                }
                Err(e) => {
                    if state.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                    if is_transient_accept_error(&e) {
                        warn!(error = %e, "temporary accept error");
                        tokio::time::sleep(Broker::ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                    error!(error = %e, "mqtt accept failed");
                    let _ = fatal.send(BrokerError::Accept(e));
                    break;
                }
            }
        }
    }

    drop(listener);
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "connection task failed");
        }
    }
}

/// Accept errors that concern one half-open connection or momentary resource
/// exhaustion rather than the listener itself.
fn is_transient_accept_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock | TimedOut
    ) || e.raw_os_error().is_some_and(|code| code == 23 || code == 24)
}

async fn handle_connection(
    state: Arc<BrokerState>,
    session: Arc<ClientSession>,
    mut reader: BufReader<OwnedReadHalf>,
) {
    let result = tokio::select! {
        result = state.serve(&session, &mut reader) => result,
        _ = session.closed() => Ok(()),
    };

    if let Err(e) = result {
        debug!(client = %session.client_id(), peer = %session.peer(), error = %e, "closing connection");
    }

    session.close();
    state.unregister(session.id());
    debug!(client = %session.client_id(), peer = %session.peer(), "client disconnected");
}

impl BrokerState {
    fn register(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> (Arc<ClientSession>, BufReader<OwnedReadHalf>) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (session, reader) = ClientSession::new(id, stream, peer);
        let session = Arc::new(session);

        let mut registry = self.sessions.write();
        // A connection accepted while shutdown drains the registry must not
        // outlive it.
        if self.shutting_down.load(Ordering::SeqCst) {
            session.close();
        } else {
            registry.insert(id, session.clone());
        }
        debug!(peer = %peer, session = id, "tcp connection accepted");
        (session, reader)
    }

    fn unregister(&self, id: SessionId) {
        self.sessions.write().remove(&id);
    }

    async fn serve(
        &self,
        session: &ClientSession,
        reader: &mut BufReader<OwnedReadHalf>,
    ) -> Result<(), ProtocolError> {
        let mut state = ConnectionState::AwaitingConnect;

        loop {
            let Some(raw) = codec::read_packet(reader, self.max_packet_size).await? else {
                return Ok(());
            };

            let packet = Packet::decode(&raw)?;
            match (state, packet) {
                (ConnectionState::AwaitingConnect, Packet::Connect(connect)) => {
                    self.accept_connect(session, connect).await?;
                    state = ConnectionState::Connected;
                }
                (ConnectionState::AwaitingConnect, _) => {
                    return Err(ProtocolError::ExpectedConnect(raw.packet_type()));
                }
                (ConnectionState::Connected, Packet::Connect(_)) => {
                    return Err(ProtocolError::DuplicateConnect);
                }
                (ConnectionState::Connected, Packet::Publish(publish)) => {
                    self.route_publish(session, publish).await?;
                }
                (ConnectionState::Connected, Packet::Subscribe(subscribe)) => {
                    self.accept_subscribe(session, subscribe).await?;
                }
                (ConnectionState::Connected, Packet::Unsubscribe(unsubscribe)) => {
                    session.clear_subscriptions();
                    session
                        .write_packet(&encode_unsuback(unsubscribe.packet_id))
                        .await?;
                }
                (ConnectionState::Connected, Packet::PingReq) => {
                    session.write_packet(&PINGRESP).await?;
                }
                (ConnectionState::Connected, Packet::Disconnect) => {
                    debug!(client = %session.client_id(), "client sent DISCONNECT");
                    return Ok(());
                }
            }
        }
    }

    async fn accept_connect(&self, session: &ClientSession, connect: Connect) -> Result<(), ProtocolError> {
        let client_id = if connect.client_id.is_empty() {
            format!("anon-{}", Uuid::new_v4())
        } else {
            connect.client_id
        };
        session.set_client_id(client_id.as_str());
        session.write_packet(&CONNACK_ACCEPTED).await?;
        info!(client = %client_id, peer = %session.peer(), keep_alive = connect.keep_alive, "client connected");
        Ok(())
    }

    async fn accept_subscribe(&self, session: &ClientSession, subscribe: Subscribe) -> Result<(), ProtocolError> {
        let suback = encode_suback(subscribe.packet_id, subscribe.topics.len())?;
        debug!(client = %session.client_id(), topics = ?subscribe.topics, "client subscribed");
        session.subscribe(subscribe.topics);
        session.write_packet(&suback).await?;
        Ok(())
    }

    async fn route_publish(&self, session: &ClientSession, publish: Publish) -> Result<(), ProtocolError> {
        let packet = encode_publish(&publish.topic, &publish.payload)?;
        let topic = publish.topic.clone();

        let handler = self.handler.read().clone();
        invoke_handler(
            handler,
            PublishMessage {
                client_id: session.client_id(),
                topic: publish.topic,
                payload: publish.payload,
            },
        )
        .await;

        self.forward(&topic, &packet, Some(session.id())).await;
        Ok(())
    }

    /// Write `packet` to every registered session subscribed to `topic`,
    /// skipping `exclude`. Returns how many writes succeeded.
    async fn forward(&self, topic: &str, packet: &[u8], exclude: Option<SessionId>) -> usize {
        let targets: Vec<Arc<ClientSession>> = {
            let registry = self.sessions.read();
            registry
                .values()
                .filter(|s| Some(s.id()) != exclude && s.is_subscribed(topic))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for target in targets {
            match target.write_packet(packet).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(client = %target.client_id(), topic = %topic, error = %e, "forward publish failed")
                }
            }
        }
        delivered
    }
}
