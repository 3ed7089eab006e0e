use crate::{factory::SessionFactory, net::framed};
use std::{io, sync::Arc};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info};

/// Accepts TCP connections and serves a new session on each.
pub struct Server {
    factory: Arc<SessionFactory>,
}

impl Server {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub async fn serve_tcp(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener. Only returns when
    /// accepting fails.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "listening");
        loop {
            let (sock, peer) = listener.accept().await?;
            info!(%peer, "accepted connection");

            let (_handle, session) = self.factory.spawn(framed(sock));
            tokio::spawn(async move {
                match session.await {
                    Ok(reason) => info!(%peer, %reason, "connection finished"),
                    Err(e) => debug!(%peer, error = %e, "session task failed"),
                }
            });
        }
    }
}
