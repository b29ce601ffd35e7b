//! Single-connection loopback listener

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// A listener on `127.0.0.1` that accepts exactly one connection
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Listen on an OS-assigned loopback port
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).await?;
        let port = listener.local_addr()?.port();
        debug!("Listening for the R language server on 127.0.0.1:{}", port);
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the first connection and stop listening
    ///
    /// Never completes if nobody connects.
    pub async fn accept_one(self) -> io::Result<TcpStream> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("R language server connected from {} on port {}", peer, self.port);
        Ok(stream)
    }
}
