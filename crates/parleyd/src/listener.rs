//! UDP login listener.
//!
//! One socket, one datagram at a time. Each datagram is decoded into a
//! `Request`, handed to the `LoginServer`, and the reply sent back to the
//! address it came from. Abandoned handshakes are swept on a timer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use parley_core::wire::{Reply, Request, MAX_DATAGRAM};
use parley_services::LoginServer;

pub struct LoginListener {
    socket: Arc<UdpSocket>,
    server: LoginServer,
    sweep_interval: Duration,
    reply_on_failure: bool,
    shutdown: broadcast::Receiver<()>,
}

impl LoginListener {
    pub fn new(
        socket: Arc<UdpSocket>,
        server: LoginServer,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            server,
            sweep_interval: Duration::from_secs(5),
            reply_on_failure: true,
            shutdown,
        }
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        // tokio's interval panics on zero.
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Send a bare ERROR when a request fails. When off, failures are
    /// silent drops.
    pub fn reply_on_failure(mut self, enabled: bool) -> Self {
        self.reply_on_failure = enabled;
        self
    }

    pub async fn run(mut self) -> Result<()> {
        // One spare byte so an oversized datagram is seen as oversized
        // rather than silently truncated to the limit.
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        let mut sweep_interval = tokio::time::interval(self.sweep_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("login listener shutting down");
                    return Ok(());
                }

                _ = sweep_interval.tick() => {
                    self.server.sweep_expired();
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer_addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], peer_addr).await;
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], peer_addr: SocketAddr) {
        let request = match Request::decode(data) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(%peer_addr, len = data.len(), error = %e, "dropping undecodable datagram");
                return;
            }
        };

        let label = request.label();
        let cookie = request
            .cookie()
            .map(|c| c.short().to_owned())
            .unwrap_or_default();
        tracing::trace!(%peer_addr, request = label, cookie = %cookie, "received");

        let reply = match self.server.handle(peer_addr, request) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    %peer_addr,
                    request = label,
                    cookie = %cookie,
                    code = e.code(),
                    error = %e,
                    "request failed"
                );
                if !self.reply_on_failure {
                    return;
                }
                Reply::Error
            }
        };

        if let Err(e) = self.socket.send_to(&reply.encode(), peer_addr).await {
            tracing::warn!(%peer_addr, error = %e, reply = reply.label(), "send_to failed");
        }
    }
}
