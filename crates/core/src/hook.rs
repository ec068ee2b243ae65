//! Extension-point traits at the boundary to the host application.

use crate::seed::GenContext;

/// Seed decision consulted by the host application's generation call sites.
///
/// The caller owns the hook attachment mechanism and must run generation
/// exactly once with the returned seed, on every path including timeout
/// fallback.
pub trait GenerationHook: Send + Sync {
    /// Decide which seed generation must use at `ctx`, given the seed the
    /// caller would have used on its own. Total: always returns a usable
    /// normalized seed.
    fn decide_seed(&self, ctx: GenContext, incoming: i64) -> u32;
}

/// Outbound side of seed arbitration, implemented by the transport.
///
/// Must be a silent no-op when no connection is live.
pub trait SeedBroadcaster: Send + Sync {
    fn broadcast_seed(&self, seed: u32);
}
