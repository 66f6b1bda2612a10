//! parleyd — Parley login daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use parley_core::config::ParleyConfig;
use parley_core::crypto::{sha256_hex, RSA_BITS};
use parley_services::{make_verifier, password_hash, Limits, LoginServer, MemoryCredentials};

use parleyd::{keys, LoginListener};

fn print_usage() {
    println!("Usage: parleyd [command]");
    println!();
    println!("Commands:");
    println!("  (none)                          Run the login server");
    println!("  hash-password <salt> <password> Print the verifier for a [[users]] entry");
    println!();
    println!("Config: $PARLEY_CONFIG or ~/.config/parley/config.toml");
    println!("Logging: RUST_LOG=parleyd=debug,parley_services=debug");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => serve().await,
        ["hash-password", salt, password] => {
            println!("{}", make_verifier(salt, &password_hash(password)));
            Ok(())
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            anyhow::bail!("unrecognised arguments: {}", args.join(" "))
        }
    }
}

async fn serve() -> Result<()> {
    // Load config
    if let Err(e) = ParleyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = ParleyConfig::load().context("failed to load config")?;
    tracing::info!(path = %ParleyConfig::file_path().display(), "config loaded");

    // Keypair
    let keypair = Arc::new(
        keys::load_or_generate(&config.server.private_key_path, RSA_BITS)
            .context("failed to load server key")?,
    );
    let der = keypair.public_der()?;
    let fingerprint = sha256_hex(&[der.as_slice()]);
    tracing::info!(
        fingerprint = &fingerprint[..16],
        public_key = %keys::public_key_path(&config.server.private_key_path).display(),
        "server key ready"
    );

    // Credentials
    let credentials = MemoryCredentials::from_entries(&config.users);
    if credentials.is_empty() {
        tracing::warn!("no [[users]] configured, every login will be rejected");
    }
    tracing::info!(users = credentials.len(), "credential store loaded");

    let server = LoginServer::new(
        keypair,
        Arc::new(credentials),
        Limits::from(&config.limits),
    );

    let socket = Arc::new(
        UdpSocket::bind(&config.server.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.server.bind))?,
    );
    tracing::info!(addr = %socket.local_addr()?, "parleyd listening");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = tokio::spawn(
        LoginListener::new(socket, server.clone(), shutdown_tx.subscribe())
            .sweep_interval(Duration::from_secs(config.limits.sweep_interval_secs))
            .reply_on_failure(config.server.reply_on_failure)
            .run(),
    );

    let table_printer = {
        let server = server.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                tracing::debug!(
                    pending = server.pending().len(),
                    authenticated = server.users().len(),
                    "session table snapshot"
                );
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("login listener exited: {:?}", r),
        r = table_printer      => tracing::error!("table printer exited: {:?}", r),
    }

    Ok(())
}
