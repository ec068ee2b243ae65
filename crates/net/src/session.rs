//! Session management: the entry points the host application's hook layer
//! calls to start, stop and observe a peer session.
//!
//! The coordinator outlives transport instances; starting and stopping a
//! session swaps the transport underneath it, and only an explicit
//! [`Session::reset`] (a run boundary) clears cached seeds.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tandem_core::{Config, Coordinator, GenContext, Role};
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Error, Result};
use crate::transport::Transport;

const EVENT_QUEUE: usize = 64;

/// Events surfaced to the application. Connectivity and seed traffic are
/// observable only through these and the logs; none of it is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Peer handshake received.
    PeerConnected,
    /// Connection closed, whichever side initiated it.
    PeerDisconnected,
    /// We broadcast a seed to the peer.
    SeedSent(u32),
    /// The host's seed arrived.
    SeedReceived(u32),
    /// The peer announced its display name.
    PeerName(String),
}

/// One co-op session: coordinator plus at most one live transport.
pub struct Session {
    config: Config,
    coordinator: Arc<Coordinator>,
    transport: Mutex<Option<Arc<Transport>>>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Self {
            config,
            coordinator: Arc::new(Coordinator::new()),
            transport: Mutex::new(None),
            events_tx,
            events_rx,
        }
    }

    fn transport_slot(&self) -> MutexGuard<'_, Option<Arc<Transport>>> {
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start hosting on the configured endpoint and take the host role.
    ///
    /// A bind failure propagates and leaves the role untouched so the
    /// caller can show a "failed to host" message.
    pub async fn start_host(&self) -> Result<()> {
        if self.transport_slot().is_some() {
            return Err(Error::AlreadyStarted);
        }
        let transport = Arc::new(
            Transport::host(
                self.config.host_endpoint(),
                self.coordinator.clone(),
                self.events_tx.clone(),
                self.config.player_name.clone(),
            )
            .await?,
        );
        self.coordinator.set_broadcaster(transport.clone());
        self.coordinator.set_role(Role::Host);
        *self.transport_slot() = Some(transport);
        Ok(())
    }

    /// Start connecting to the configured endpoint and take the client
    /// role. Connect failures are retried in the background and never
    /// surface here.
    pub fn start_client(&self) -> Result<()> {
        if self.transport_slot().is_some() {
            return Err(Error::AlreadyStarted);
        }
        let transport = Arc::new(Transport::client(
            self.config.connect_endpoint(),
            self.coordinator.clone(),
            self.events_tx.clone(),
            self.config.player_name.clone(),
        ));
        self.coordinator.set_broadcaster(transport.clone());
        self.coordinator.set_role(Role::Client);
        *self.transport_slot() = Some(transport);
        Ok(())
    }

    /// Dispose the transport and return to solo play. Idempotent.
    ///
    /// Disconnect notification is left to the transport's close path, so a
    /// session that never saw a peer connect is not reported as one.
    pub fn stop(&self) {
        if let Some(transport) = self.transport_slot().take() {
            transport.shutdown();
            info!("session stopped");
        }
        self.coordinator.clear_broadcaster();
        self.coordinator.set_role(Role::None);
    }

    /// Seed decision for a generation call site. See
    /// [`Coordinator::decide_seed`]; the caller must run generation exactly
    /// once with the returned value.
    pub fn decide_seed(&self, ctx: GenContext, incoming: i64) -> u32 {
        self.coordinator.decide_seed(ctx, incoming)
    }

    /// Discard the cached host seed and broadcast a fresh one. Used at run
    /// boundaries while hosting.
    pub fn force_regenerate(&self) -> Option<u32> {
        self.coordinator.force_regenerate()
    }

    pub fn set_role(&self, role: Role) {
        self.coordinator.set_role(role);
    }

    pub fn role(&self) -> Role {
        self.coordinator.role()
    }

    /// Run-boundary reset of cached seeds.
    pub fn reset(&self) {
        self.coordinator.reset();
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    /// Live transport, if a session is started. Used by the entity layer
    /// for position/level/animation exchange.
    pub fn transport(&self) -> Option<Arc<Transport>> {
        self.transport_slot().clone()
    }

    /// Next pending event, if any (non-blocking poll).
    pub fn try_recv_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 5s");
    }

    fn host_config() -> Config {
        Config {
            host_bind: "127.0.0.1".into(),
            host_port: "0".into(),
            player_name: "host".into(),
            ..Config::default()
        }
    }

    fn client_config(addr: std::net::SocketAddr) -> Config {
        Config {
            connect_addr: addr.ip().to_string(),
            connect_port: addr.port().to_string(),
            player_name: "client".into(),
            ..Config::default()
        }
    }

    async fn connected_pair() -> (Session, Session) {
        let host = Session::new(host_config());
        host.start_host().await.unwrap();
        let addr = host.transport().unwrap().local_addr().unwrap();

        let client = Session::new(client_config(addr));
        client.start_client().unwrap();

        let host_transport = host.transport().unwrap();
        let client_transport = client.transport().unwrap();
        wait_until(move || host_transport.is_connected() && client_transport.is_connected()).await;
        (host, client)
    }

    #[tokio::test]
    async fn test_bind_failure_surfaces_and_role_stays_none() {
        init_tracing();
        let first = Session::new(host_config());
        first.start_host().await.unwrap();
        let addr = first.transport().unwrap().local_addr().unwrap();

        let mut config = host_config();
        config.host_port = addr.port().to_string();
        let second = Session::new(config);
        assert!(second.start_host().await.is_err());
        assert_eq!(second.role(), Role::None);

        first.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_host_regenerate_reaches_client_decision() {
        init_tracing();
        let (host, client) = connected_pair().await;

        let seed = host.force_regenerate().unwrap();

        let coordinator = client.coordinator();
        let decided =
            tokio::task::spawn_blocking(move || coordinator.decide_seed(GenContext::RunStart, 123))
                .await
                .unwrap();
        assert_eq!(decided, seed);

        host.stop();
        client.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cached_seed_sent_on_accept() {
        init_tracing();
        // Host decides a seed before anyone connects; the greeting must
        // carry it so a late-joining client never has to wait.
        let host = Session::new(host_config());
        host.start_host().await.unwrap();
        let seed = host.decide_seed(GenContext::RunStart, 5);
        let addr = host.transport().unwrap().local_addr().unwrap();

        let client = Session::new(client_config(addr));
        client.start_client().unwrap();

        let coordinator = client.coordinator();
        let decided =
            tokio::task::spawn_blocking(move || coordinator.decide_seed(GenContext::RunStart, 9))
                .await
                .unwrap();
        assert_eq!(decided, seed);

        host.stop();
        client.stop();
    }

    #[tokio::test]
    async fn test_kick_disconnects_peer() {
        init_tracing();
        let (host, client) = connected_pair().await;

        host.transport().unwrap().send_kick();
        let client_transport = client.transport().unwrap();
        wait_until(move || !client_transport.is_connected()).await;

        host.stop();
        client.stop();
    }

    #[tokio::test]
    async fn test_position_and_level_snapshots_flow() {
        init_tracing();
        let (host, client) = connected_pair().await;
        let host_transport = host.transport().unwrap();
        let client_transport = client.transport().unwrap();

        host_transport.send_position(1.5, -2.0);
        host_transport.send_level("mines-3");
        host_transport.send_animation("Jump", Some(2), None);

        let t = client_transport.clone();
        wait_until(move || t.remote_name().is_some()).await;
        assert_eq!(client_transport.remote_name().as_deref(), Some("host"));

        let t = client_transport.clone();
        wait_until(move || t.take_remote_position() == Some((1.5, -2.0))).await;
        // Freshness was consumed by the successful take.
        assert_eq!(client_transport.take_remote_position(), None);

        let t = client_transport.clone();
        wait_until(move || t.take_remote_level().as_deref() == Some("mines-3")).await;

        let t = client_transport.clone();
        wait_until(move || {
            t.take_remote_anim().is_some_and(|anim| anim.name == "Jump" && anim.queue == Some(2))
        })
        .await;

        host.stop();
        client.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        init_tracing();
        let host = Session::new(host_config());
        host.start_host().await.unwrap();
        host.stop();
        host.stop();
        assert_eq!(host.role(), Role::None);
        assert!(host.transport().is_none());
    }

    #[tokio::test]
    async fn test_stop_without_peer_reports_no_disconnect() {
        init_tracing();
        let mut host = Session::new(host_config());
        host.start_host().await.unwrap();
        // No peer ever connected, so disposing the session must not look
        // like a peer disconnect.
        host.stop();
        assert_eq!(host.try_recv_event(), None);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        init_tracing();
        let host = Session::new(host_config());
        host.start_host().await.unwrap();
        assert!(matches!(host.start_host().await, Err(Error::AlreadyStarted)));
        host.stop();
    }
}
