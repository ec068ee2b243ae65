//! Tandem Core Library
//!
//! Seed arbitration and configuration for co-driving a procedurally
//! generated simulation across two peers. The coordinator decides which
//! seed each generation call site must use; the transport lives in
//! `tandem-net`.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hook;
pub mod seed;

pub use config::{Config, DEFAULT_PORT};
pub use coordinator::{Coordinator, Role};
pub use error::{Error, Result};
pub use hook::{GenerationHook, SeedBroadcaster};
pub use seed::{normalize, random_seed, GenContext, SEED_MAX};
