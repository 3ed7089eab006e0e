use crate::{
    factory::SessionFactory,
    net::framed,
    session::{CloseReason, PeerHandle},
};
use std::io;
use tokio::{
    net::{TcpStream, ToSocketAddrs},
    task::JoinHandle,
};
use tracing::debug;

/// The dialing side of a TCP session.
pub struct Client {
    handle: PeerHandle,
    session: JoinHandle<CloseReason>,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs, factory: &SessionFactory) -> io::Result<Self> {
        let sock = TcpStream::connect(addr).await?;
        debug!(peer = %sock.peer_addr()?, "connected");
        let (handle, session) = factory.spawn(framed(sock));
        Ok(Self { handle, session })
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Wait for the session to end and report why it did.
    pub async fn closed(self) -> CloseReason {
        self.session
            .await
            .unwrap_or_else(|e| CloseReason::Transport(format!("session task failed: {e}")))
    }
}
