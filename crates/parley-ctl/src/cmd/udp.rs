//! Shared UDP helpers for CLI commands.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::net::UdpSocket;

use parley_core::wire::{Reply, Request, MAX_DATAGRAM};
use parley_services::{ClientSession, LoginClient};

/// A socket connected to one server. Each request waits for one reply.
pub struct Transport {
    socket: UdpSocket,
    server: SocketAddr,
    timeout: Duration,
}

impl Transport {
    pub async fn connect(server: SocketAddr, timeout: Duration) -> Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.context("failed to bind client socket")?;
        socket
            .connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        Ok(Self {
            socket,
            server,
            timeout,
        })
    }

    pub async fn exchange(&self, request: &Request) -> Result<Reply> {
        self.socket
            .send(&request.encode())
            .await
            .with_context(|| format!("failed to send {} to {}", request.label(), self.server))?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| {
                anyhow!(
                    "no reply to {} from {} within {:?} (is parleyd running?)",
                    request.label(),
                    self.server,
                    self.timeout
                )
            })?
            .context("receive failed")?;
        Reply::decode(&buf[..len]).context("malformed reply")
    }
}

/// Run INIT → SUBMIT → RESPONSE to completion.
pub async fn login(transport: &Transport, mut client: LoginClient) -> Result<ClientSession> {
    let reply = transport.exchange(&client.init()).await?;
    let submit = client.on_cookie(&reply).context("INIT was not answered with a cookie")?;

    let reply = transport.exchange(&submit).await?;
    let response = client.on_challenge(&reply).context("login rejected")?;

    let reply = transport.exchange(&response).await?;
    client.on_accepted(&reply).context("challenge answer rejected")
}
