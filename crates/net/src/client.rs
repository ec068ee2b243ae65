//! Client side: dial the host with indefinite retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::protocol::Message;
use crate::transport::{run_connection, Shared};

/// Per-attempt connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Delay between failed attempts.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Keep dialing until a connection is established or the transport shuts
/// down. Connect failures never surface to the caller.
pub(crate) async fn connect_task(
    addr: std::net::SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let stream = loop {
        tokio::select! {
            attempt = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)) => {
                match attempt {
                    Ok(Ok(stream)) => {
                        info!(addr = %addr, "connected to host");
                        break stream;
                    }
                    Ok(Err(e)) => debug!(addr = %addr, error = %e, "connect failed, retrying"),
                    Err(_) => debug!(addr = %addr, "connect timed out, retrying"),
                }
            }
            _ = shutdown.recv() => {
                debug!("connect cancelled");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RETRY_DELAY) => {}
            _ = shutdown.recv() => {
                debug!("connect cancelled");
                return;
            }
        }
    };

    let greeting = vec![Message::Hello, Message::User(shared.local_name.clone())];
    run_connection(stream, shared, shutdown, greeting, None).await;
}
