//! Tandem Network Library
//!
//! TCP transport and session management for co-driving a procedurally
//! generated simulation across two peers.
//!
//! # Architecture
//!
//! - **Host**: binds a listener and services exactly the first inbound
//!   connection; authoritative for seed generation
//! - **Client**: dials the host with indefinite retry
//! - **Protocol**: newline-delimited `TAG|payload` text lines
//!
//! # Usage
//!
//! ```ignore
//! // Host side
//! let session = Session::new(config);
//! session.start_host().await?;
//! let seed = session.decide_seed(GenContext::RunStart, incoming);
//!
//! // Client side
//! let session = Session::new(config);
//! session.start_client()?;
//! let seed = session.decide_seed(GenContext::RunStart, incoming);
//! ```

mod client;
pub mod error;
mod host;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use protocol::Message;
pub use session::{Session, SessionEvent};
pub use transport::{AnimUpdate, Transport};
