//! Seed arbitration between the two peers.
//!
//! The coordinator decides, at each generation call site, which seed the
//! local simulation must use. The host generates and broadcasts; the client
//! waits briefly for the host's value and falls back to its own when nothing
//! arrives. The decision is total: it never fails and never blocks for more
//! than [`SEED_WAIT`].
//!
//! Coordinator state outlives transport instances; it is cleared only at
//! explicit run boundaries via [`Coordinator::reset`].

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::hook::{GenerationHook, SeedBroadcaster};
use crate::seed::{normalize, random_seed, GenContext};

/// How long a client-role decision waits for the host's seed.
const SEED_WAIT: Duration = Duration::from_secs(2);

/// Session role. Exactly one active value per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Solo play; decisions pass the caller's seed through.
    #[default]
    None,
    /// Owns the listener; authoritative for seed generation.
    Host,
    /// Connects outward; must obtain its seed from the host.
    Client,
}

#[derive(Default)]
struct State {
    role: Role,
    /// Seed generated by us while hosting.
    host_seed: Option<u32>,
    /// Seed received from the host while in client role.
    remote_seed: Option<u32>,
}

/// Shared seed-arbitration state machine.
#[derive(Default)]
pub struct Coordinator {
    state: Mutex<State>,
    seed_arrived: Condvar,
    /// Installed by the session while a transport is live. Never invoked
    /// while `state` is locked, so transport and coordinator locks cannot
    /// invert.
    broadcaster: Mutex<Option<Arc<dyn SeedBroadcaster>>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide which seed generation at `ctx` must use.
    ///
    /// - `None`: the caller's own seed, normalized.
    /// - `Host`: the cached seed, generated on first call and re-broadcast
    ///   on every call. Stable until [`Coordinator::force_regenerate`].
    /// - `Client`: the seed received from the host, waiting up to 2 s for
    ///   it to arrive; on timeout the caller's seed, normalized. The
    ///   desynchronized fallback is degraded but never an error.
    pub fn decide_seed(&self, ctx: GenContext, incoming: i64) -> u32 {
        let mut state = self.state();
        match state.role {
            Role::None => normalize(incoming),
            Role::Host => {
                let seed = *state.host_seed.get_or_insert_with(random_seed);
                drop(state);
                debug!(%ctx, seed, "host seed decision");
                self.broadcast(seed);
                seed
            }
            Role::Client => {
                if let Some(seed) = state.remote_seed {
                    return seed;
                }
                debug!(%ctx, "waiting for host seed");
                let (state, _) = self
                    .seed_arrived
                    .wait_timeout_while(state, SEED_WAIT, |s| {
                        s.role == Role::Client && s.remote_seed.is_none()
                    })
                    .unwrap_or_else(PoisonError::into_inner);
                match state.remote_seed {
                    Some(seed) if state.role == Role::Client => seed,
                    _ => {
                        let fallback = normalize(incoming);
                        warn!(
                            %ctx,
                            fallback,
                            "no seed from host within {:?}, continuing desynchronized",
                            SEED_WAIT
                        );
                        fallback
                    }
                }
            }
        }
    }

    /// Discard the cached host seed, generate a fresh one and re-broadcast
    /// it. Used at run boundaries. No-op outside host role.
    pub fn force_regenerate(&self) -> Option<u32> {
        let mut state = self.state();
        if state.role != Role::Host {
            debug!(role = ?state.role, "force regenerate ignored outside host role");
            return None;
        }
        let seed = random_seed();
        state.host_seed = Some(seed);
        drop(state);
        info!(seed, "regenerated host seed");
        self.broadcast(seed);
        Some(seed)
    }

    /// Switch the session role. Switching away from client discards any
    /// cached remote seed so a stale value can never leak into a later
    /// client session; an in-flight wait is woken to re-evaluate.
    pub fn set_role(&self, role: Role) {
        {
            let mut state = self.state();
            if state.role == role {
                return;
            }
            if state.role == Role::Client {
                state.remote_seed = None;
            }
            state.role = role;
        }
        info!(?role, "session role changed");
        self.seed_arrived.notify_all();
    }

    pub fn role(&self) -> Role {
        self.state().role
    }

    /// Deliver a seed received from the peer. Called by the transport's
    /// receive loop; ignored outside client role since the host's own seed
    /// is authoritative.
    pub fn deliver_remote_seed(&self, raw: i64) {
        let seed = normalize(raw);
        {
            let mut state = self.state();
            if state.role != Role::Client {
                warn!(seed, role = ?state.role, "ignoring remote seed outside client role");
                return;
            }
            state.remote_seed = Some(seed);
        }
        info!(seed, "received host seed");
        self.seed_arrived.notify_all();
    }

    /// Seed already cached while hosting, if any. Lets a freshly accepted
    /// connection be greeted with the current value.
    pub fn cached_host_seed(&self) -> Option<u32> {
        let state = self.state();
        match state.role {
            Role::Host => state.host_seed,
            _ => None,
        }
    }

    /// Install the outbound side used by host-role decisions.
    pub fn set_broadcaster(&self, broadcaster: Arc<dyn SeedBroadcaster>) {
        *self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(broadcaster);
    }

    /// Drop the installed broadcaster without treating it as a disconnect.
    /// Used when a session is disposed before any peer ever connected.
    pub fn clear_broadcaster(&self) {
        self.broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// The transport lost its connection. Idempotent; every close path
    /// funnels here exactly once per connection.
    pub fn peer_disconnected(&self) {
        let had = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had {
            info!("peer disconnected");
        }
    }

    /// Run-boundary reset: clear both cached seeds, keep the role.
    pub fn reset(&self) {
        let mut state = self.state();
        state.host_seed = None;
        state.remote_seed = None;
        debug!("seed cache cleared");
    }

    fn broadcast(&self, seed: u32) {
        let broadcaster = self
            .broadcaster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(b) = broadcaster {
            b.broadcast_seed(seed);
        }
    }
}

impl GenerationHook for Coordinator {
    fn decide_seed(&self, ctx: GenContext, incoming: i64) -> u32 {
        Coordinator::decide_seed(self, ctx, incoming)
    }
}
