//! Parley integration test harness.
//!
//! Every test starts its own `LoginListener` on an ephemeral loopback port
//! and talks to it over real UDP, using the same `LoginClient` the CLI uses.
//! Nothing here needs root or a running daemon.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use parley_core::crypto::Keypair;
use parley_core::wire::{Reply, Request, MAX_DATAGRAM};
use parley_services::{ClientSession, Limits, LoginClient, LoginServer, MemoryCredentials};
use parleyd::LoginListener;

mod isolation;
mod login;
mod requests;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long a test waits for a reply before treating the request as dropped.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

// Debug-build RSA key generation is slow; share keys across tests.
pub fn server_key() -> Arc<Keypair> {
    static KP: OnceLock<Arc<Keypair>> = OnceLock::new();
    KP.get_or_init(|| Arc::new(Keypair::generate_with_bits(1024).unwrap()))
        .clone()
}

pub fn client_key() -> Arc<Keypair> {
    static KP: OnceLock<Arc<Keypair>> = OnceLock::new();
    KP.get_or_init(|| Arc::new(Keypair::generate_with_bits(1024).unwrap()))
        .clone()
}

/// A listener running in the background. Stops when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub server: LoginServer,
    shutdown: broadcast::Sender<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(Limits::default(), true).await
}

pub async fn start_server_with(limits: Limits, reply_on_failure: bool) -> TestServer {
    let mut creds = MemoryCredentials::new();
    creds.insert_password("alice", "salt-a", "wonderland");
    creds.insert_password("bob", "salt-b", "builder");
    let server = LoginServer::new(server_key(), Arc::new(creds), limits);

    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();
    let (shutdown, rx) = broadcast::channel(1);
    tokio::spawn(
        LoginListener::new(socket, server.clone(), rx)
            .sweep_interval(Duration::from_millis(50))
            .reply_on_failure(reply_on_failure)
            .run(),
    );

    TestServer {
        addr,
        server,
        shutdown,
    }
}

/// One client endpoint. Each peer has its own source port.
#[derive(Debug)]
pub struct Peer {
    socket: UdpSocket,
}

impl Peer {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        socket.connect(server).await?;
        Ok(Self { socket })
    }

    pub async fn send_raw(&self, datagram: &[u8]) -> Result<Option<Reply>> {
        self.socket.send(datagram).await?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(REPLY_TIMEOUT, self.socket.recv(&mut buf)).await {
            Ok(received) => {
                let len = received?;
                Ok(Some(Reply::decode(&buf[..len]).context("malformed reply")?))
            }
            Err(_) => Ok(None),
        }
    }

    /// Send a request; `None` means no reply arrived.
    pub async fn send(&self, request: &Request) -> Result<Option<Reply>> {
        self.send_raw(&request.encode()).await
    }

    /// Send a request that must be answered.
    pub async fn exchange(&self, request: &Request) -> Result<Reply> {
        match self.send(request).await? {
            Some(reply) => Ok(reply),
            None => bail!("no reply to {}", request.label()),
        }
    }
}

pub fn new_client(user: &str, password: &str) -> LoginClient {
    LoginClient::new(server_key().public.clone(), client_key(), user, password)
}

/// Full INIT → SUBMIT → RESPONSE over UDP.
pub async fn login(server: &TestServer, user: &str, password: &str) -> Result<(Peer, ClientSession)> {
    let peer = Peer::connect(server.addr).await?;
    let mut client = new_client(user, password);

    let reply = peer.exchange(&client.init()).await?;
    let submit = client.on_cookie(&reply)?;
    let reply = peer.exchange(&submit).await?;
    let response = client.on_challenge(&reply)?;
    let reply = peer.exchange(&response).await?;
    let session = client.on_accepted(&reply)?;
    Ok((peer, session))
}
