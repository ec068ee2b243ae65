//! Host side: listen and service the first inbound connection.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::protocol::Message;
use crate::transport::{run_connection, Shared};

/// Accept exactly one connection, greet it, then run it until it closes.
/// The listener stays open for the connection's lifetime, so later connect
/// attempts are never serviced by this transport.
pub(crate) async fn accept_task(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let stream = tokio::select! {
        result = listener.accept() => match result {
            Ok((stream, addr)) => {
                info!(addr = %addr, "peer connected");
                stream
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                return;
            }
        },
        _ = shutdown.recv() => {
            debug!("accept cancelled");
            return;
        }
    };

    let mut greeting = vec![Message::Welcome];
    if let Some(seed) = shared.coordinator.cached_host_seed() {
        greeting.push(Message::Seed(seed as i64));
    }
    greeting.push(Message::User(shared.local_name.clone()));

    run_connection(stream, shared, shutdown, greeting, Some(listener)).await;
}
