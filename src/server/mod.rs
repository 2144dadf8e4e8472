//! WebSocket server
//!
//! Accepts raw WebSocket connections and spawns one session per client.
//! HTTP-path routing is out of scope; any upgrade request on the listener
//! is served.

mod hub;
mod session;

pub use hub::Hub;
pub use session::Session;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Accept connections until hub shutdown
pub async fn serve(listener: TcpListener, hub: Arc<Hub>) -> anyhow::Result<()> {
    let mut shutdown_rx = hub.shutdown_rx();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws) => {
                                let (session, outbound_rx) = Session::new(hub);
                                session.run(ws, outbound_rx).await;
                            }
                            Err(e) => {
                                debug!(%peer, error = %e, "websocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    Ok(())
}
