//! Peer transport: one TCP connection carrying newline-delimited messages.
//!
//! A transport owns at most one live connection. The host variant binds a
//! listener and services exactly the first inbound connection; the client
//! variant dials out with indefinite retry. Either way the established
//! stream runs the same receive loop, all outbound lines funnel through a
//! single writer task so they never interleave, and every close path clears
//! the remote snapshots and tells the coordinator exactly once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tandem_core::{normalize, Coordinator, SeedBroadcaster};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::Message;
use crate::session::SessionEvent;

/// Outbound queue depth; lines past this are dropped rather than blocking
/// the caller.
const SEND_QUEUE: usize = 64;

/// Animation update received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimUpdate {
    pub name: String,
    pub queue: Option<i64>,
    pub flag: Option<bool>,
}

/// Last received remote state. Freshness is consumed by the `take_*`
/// accessors; receivers apply last-write-wins.
#[derive(Default)]
struct RemoteState {
    position: Option<(f32, f32)>,
    position_fresh: bool,
    level: Option<String>,
    level_fresh: bool,
    anim: Option<AnimUpdate>,
    name: Option<String>,
}

pub(crate) struct Shared {
    pub(crate) coordinator: Arc<Coordinator>,
    pub(crate) local_name: String,
    pub(crate) events: mpsc::Sender<SessionEvent>,
    remote: Mutex<RemoteState>,
    /// Sender into the writer task while a connection is live.
    conn: Mutex<Option<mpsc::Sender<Message>>>,
    /// Last transmitted position, for send-on-change coalescing.
    last_sent_pos: Mutex<Option<(f32, f32)>>,
    disconnect_notified: AtomicBool,
}

impl Shared {
    fn new(
        coordinator: Arc<Coordinator>,
        events: mpsc::Sender<SessionEvent>,
        local_name: String,
    ) -> Self {
        Self {
            coordinator,
            local_name,
            events,
            remote: Mutex::new(RemoteState::default()),
            conn: Mutex::new(None),
            last_sent_pos: Mutex::new(None),
            disconnect_notified: AtomicBool::new(false),
        }
    }

    fn remote(&self) -> MutexGuard<'_, RemoteState> {
        self.remote.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn conn(&self) -> MutexGuard<'_, Option<mpsc::Sender<Message>>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.try_send(event);
    }

    /// Tear down connection state. Safe to call from any close path; the
    /// coordinator is notified exactly once per connection.
    fn disconnect(&self) {
        let was_connected = self.conn().take().is_some();
        *self.remote() = RemoteState::default();
        *self
            .last_sent_pos
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if was_connected && !self.disconnect_notified.swap(true, Ordering::SeqCst) {
            info!("connection closed");
            self.coordinator.peer_disconnected();
            self.emit(SessionEvent::PeerDisconnected);
        }
    }
}

/// Handle to one peer connection's background tasks.
pub struct Transport {
    shared: Arc<Shared>,
    shutdown: broadcast::Sender<()>,
    local_addr: Option<SocketAddr>,
}

impl Transport {
    /// Bind `addr` and service the first inbound connection.
    ///
    /// A bind failure propagates so the caller can surface "failed to
    /// host"; everything after the bind runs in the background.
    pub async fn host(
        addr: SocketAddr,
        coordinator: Arc<Coordinator>,
        events: mpsc::Sender<SessionEvent>,
        local_name: String,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        info!(addr = %bound, "hosting session");

        let (shutdown, _) = broadcast::channel(1);
        let shared = Arc::new(Shared::new(coordinator, events, local_name));
        tokio::spawn(crate::host::accept_task(
            listener,
            shared.clone(),
            shutdown.subscribe(),
        ));

        Ok(Self {
            shared,
            shutdown,
            local_addr: Some(bound),
        })
    }

    /// Dial `addr` in the background, retrying until the transport is shut
    /// down. Never fails; connect errors are absorbed by the retry loop.
    pub fn client(
        addr: SocketAddr,
        coordinator: Arc<Coordinator>,
        events: mpsc::Sender<SessionEvent>,
        local_name: String,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let shared = Arc::new(Shared::new(coordinator, events, local_name));
        tokio::spawn(crate::client::connect_task(
            addr,
            shared.clone(),
            shutdown.subscribe(),
        ));

        Self {
            shared,
            shutdown,
            local_addr: None,
        }
    }

    /// Bound listener address (host transports only).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.shared.conn().is_some()
    }

    /// Stop background tasks and close the connection. Idempotent; safe
    /// concurrently with an in-flight connect or accept.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        self.shared.disconnect();
    }

    // --- outbound; every send is a silent no-op without a connection ---

    /// Queue a line for the writer task. Reports whether the line was
    /// actually accepted.
    fn try_send(&self, msg: Message) -> bool {
        let tx = self.shared.conn().clone();
        match tx {
            Some(tx) => {
                if tx.try_send(msg).is_ok() {
                    true
                } else {
                    debug!("send queue full, dropping line");
                    false
                }
            }
            None => false,
        }
    }

    pub fn send_seed(&self, seed: u32) {
        if self.try_send(Message::Seed(seed as i64)) {
            self.shared.emit(SessionEvent::SeedSent(seed));
        }
    }

    /// Transmit only when the position changed since the last transmitted
    /// value; receivers always reflect the most recent update.
    pub fn send_position(&self, x: f32, y: f32) {
        {
            let mut last = self
                .shared
                .last_sent_pos
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *last == Some((x, y)) {
                return;
            }
            *last = Some((x, y));
        }
        self.try_send(Message::Position { x, y });
    }

    pub fn send_level(&self, level: &str) {
        self.try_send(Message::Level(level.to_string()));
    }

    pub fn send_animation(&self, name: &str, queue: Option<i64>, flag: Option<bool>) {
        self.try_send(Message::Anim {
            name: name.to_string(),
            queue,
            flag,
        });
    }

    pub fn send_user(&self, name: &str) {
        self.try_send(Message::User(name.to_string()));
    }

    /// Ask the peer to disconnect.
    pub fn send_kick(&self) {
        self.try_send(Message::Kick);
    }

    // --- remote snapshots; reading consumes freshness ---

    pub fn take_remote_position(&self) -> Option<(f32, f32)> {
        let mut remote = self.shared.remote();
        if remote.position_fresh {
            remote.position_fresh = false;
            remote.position
        } else {
            None
        }
    }

    pub fn take_remote_level(&self) -> Option<String> {
        let mut remote = self.shared.remote();
        if remote.level_fresh {
            remote.level_fresh = false;
            remote.level.clone()
        } else {
            None
        }
    }

    /// Each animation update is consumed at most once.
    pub fn take_remote_anim(&self) -> Option<AnimUpdate> {
        self.shared.remote().anim.take()
    }

    pub fn remote_name(&self) -> Option<String> {
        self.shared.remote().name.clone()
    }
}

impl SeedBroadcaster for Transport {
    fn broadcast_seed(&self, seed: u32) {
        self.send_seed(seed);
    }
}

/// Drive one established connection until it closes.
///
/// `keep_listener` holds the host's listener for the connection's lifetime:
/// the first connection wins and later attempts are simply never serviced.
pub(crate) async fn run_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
    greeting: Vec<Message>,
    keep_listener: Option<TcpListener>,
) {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(SEND_QUEUE);
    *shared.conn() = Some(tx.clone());
    let writer_handle = tokio::spawn(writer_task(writer, rx));

    for msg in greeting {
        if tx.send(msg).await.is_err() {
            break;
        }
    }

    read_loop(reader, &shared, &mut shutdown).await;

    writer_handle.abort();
    drop(keep_listener);
    shared.disconnect();
}

/// Read `\n`-terminated lines until end-of-stream, an I/O fault, a KICK, or
/// shutdown. A fault in one line never ends the loop.
async fn read_loop(
    reader: OwnedReadHalf,
    shared: &Arc<Shared>,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if handle_line(&line, shared) == LineOutcome::Stop {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "read error");
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!("connection shutting down");
                break;
            }
        }
    }
}

#[derive(PartialEq)]
enum LineOutcome {
    Continue,
    Stop,
}

fn handle_line(line: &str, shared: &Arc<Shared>) -> LineOutcome {
    let msg = match Message::parse(line) {
        Ok(Some(msg)) => msg,
        // Blank line or unknown tag.
        Ok(None) => return LineOutcome::Continue,
        Err(e) => {
            warn!(error = %e, "dropping malformed line");
            return LineOutcome::Continue;
        }
    };

    match msg {
        Message::Welcome | Message::Hello => {
            debug!("peer handshake");
            shared.emit(SessionEvent::PeerConnected);
        }
        Message::Seed(raw) => {
            shared.coordinator.deliver_remote_seed(raw);
            shared.emit(SessionEvent::SeedReceived(normalize(raw)));
        }
        Message::User(name) => {
            shared.remote().name = Some(name.clone());
            shared.emit(SessionEvent::PeerName(name));
        }
        Message::Level(level) => {
            let mut remote = shared.remote();
            if remote.level.as_deref() != Some(level.as_str()) {
                remote.level = Some(level);
                remote.level_fresh = true;
            }
        }
        Message::Anim { name, queue, flag } => {
            shared.remote().anim = Some(AnimUpdate { name, queue, flag });
        }
        Message::Position { x, y } => {
            let mut remote = shared.remote();
            remote.position = Some((x, y));
            remote.position_fresh = true;
        }
        Message::Kick => {
            info!("peer requested disconnect");
            return LineOutcome::Stop;
        }
    }
    LineOutcome::Continue
}

/// Single-writer exclusion: all outbound lines pass through this task, so
/// they are never interleaved on the wire.
async fn writer_task(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = writer.write_all(msg.encode().as_bytes()).await {
            debug!(error = %e, "write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tandem_core::{GenContext, Role};
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn test_parts() -> (Arc<Coordinator>, mpsc::Sender<SessionEvent>) {
        let (events, _rx) = mpsc::channel(8);
        (Arc::new(Coordinator::new()), events)
    }

    #[tokio::test]
    async fn test_sends_without_connection_are_noops() {
        let (coordinator, events) = test_parts();
        // Nothing listens on the discard port, so the dial keeps failing.
        let transport = Transport::client(
            "127.0.0.1:9".parse().unwrap(),
            coordinator,
            events,
            "p1".into(),
        );

        assert!(!transport.is_connected());
        transport.send_seed(42);
        transport.send_position(1.0, 2.0);
        transport.send_level("cave");
        transport.send_animation("Idle", None, None);
        transport.send_user("p1");
        transport.send_kick();
        assert!(transport.take_remote_position().is_none());

        transport.shutdown();
        transport.shutdown();
    }

    #[tokio::test]
    async fn test_no_seed_sent_event_without_a_wire_delivery() {
        let (mut events_rx, transport) = {
            let (events, rx) = mpsc::channel(8);
            let transport = Transport::client(
                "127.0.0.1:9".parse().unwrap(),
                Arc::new(Coordinator::new()),
                events,
                "p1".into(),
            );
            (rx, transport)
        };

        transport.send_seed(42);
        // The line was dropped for lack of a connection, so the event
        // stream must not claim a broadcast happened.
        assert!(events_rx.try_recv().is_err());

        transport.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_tag_does_not_poison_the_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (coordinator, events) = test_parts();
        coordinator.set_role(Role::Client);
        let transport = Transport::client(addr, coordinator.clone(), events, "p1".into());

        let (mut sock, _) = listener.accept().await.unwrap();
        // An unknown tag and a valid seed arrive in the same read buffer;
        // the seed must still be processed.
        sock.write_all(b"FOO|bar\nSEED|42\n").await.unwrap();

        let decided =
            tokio::task::spawn_blocking(move || coordinator.decide_seed(GenContext::LevelGen, 7))
                .await
                .unwrap();
        assert_eq!(decided, 42);

        transport.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_malformed_line_does_not_end_the_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (coordinator, events) = test_parts();
        coordinator.set_role(Role::Client);
        let transport = Transport::client(addr, coordinator.clone(), events, "p1".into());

        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"SEED|not-a-number\nSEED|17\n")
            .await
            .unwrap();

        let decided =
            tokio::task::spawn_blocking(move || coordinator.decide_seed(GenContext::RunStart, 3))
                .await
                .unwrap();
        assert_eq!(decided, 17);

        transport.shutdown();
    }

    #[tokio::test]
    async fn test_position_updates_are_coalesced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (coordinator, events) = test_parts();
        let transport = Transport::client(addr, coordinator, events, "p1".into());

        let (sock, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(sock).lines();

        // Greeting first.
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("HELLO"));
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("USER|p1")
        );

        // Wait for the transport to register the established connection.
        for _ in 0..500 {
            if transport.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        transport.send_position(1.0, 2.0);
        transport.send_position(1.0, 2.0);
        transport.send_position(3.0, 4.0);

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("1|2"));
        // The duplicate was coalesced away; the next line is the new value.
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("3|4"));

        transport.shutdown();
    }
}
