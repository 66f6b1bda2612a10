//! parley-ctl — command-line client for the Parley login server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use parley_core::config::config_dir;
use parley_core::crypto::{parse_public_key_pem, Keypair};
use parley_services::{ClientSession, LoginClient};

mod cmd;

use cmd::udp::{login, Transport};

const DEFAULT_SERVER: &str = "127.0.0.1:9090";
const DEFAULT_TIMEOUT_MS: u64 = 3000;

struct Options {
    server: SocketAddr,
    server_key: PathBuf,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl Options {
    fn credentials(&self) -> Result<(&str, &str)> {
        let user = self
            .user
            .as_deref()
            .context("--user (or $PARLEY_USER) is required")?;
        let password = self
            .password
            .as_deref()
            .context("--password (or $PARLEY_PASSWORD) is required")?;
        Ok((user, password))
    }
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn open_session(opts: &Options) -> Result<(Transport, ClientSession)> {
    let (user, password) = opts.credentials()?;
    let pem = std::fs::read_to_string(&opts.server_key)
        .with_context(|| format!("failed to read server key {}", opts.server_key.display()))?;
    let server_public = parse_public_key_pem(&pem).context("invalid server public key")?;

    // A fresh client key per run; the server only trusts it for this session.
    let keypair = Arc::new(Keypair::generate().context("client key generation failed")?);

    let transport = Transport::connect(opts.server, opts.timeout).await?;
    let session = login(&transport, LoginClient::new(server_public, keypair, user, password)).await?;
    Ok((transport, session))
}

async fn logout(transport: &Transport, session: &mut ClientSession) -> Result<()> {
    let reply = transport.exchange(&session.logout_request()).await?;
    session.open_logout_ack(&reply).context("logout failed")
}

async fn cmd_list(opts: &Options) -> Result<()> {
    let (transport, mut session) = open_session(opts).await?;

    let reply = transport.exchange(&session.list_request()).await?;
    let users = session.open_list(&reply).context("LIST failed")?;

    println!("═══════════════════════════════════════");
    println!("  Online users ({})", users.len());
    println!("═══════════════════════════════════════");
    for u in &users {
        let marker = if u == session.username() { " (you)" } else { "" };
        println!("  {u}{marker}");
    }

    logout(&transport, &mut session).await
}

async fn cmd_login(opts: &Options) -> Result<()> {
    let (transport, mut session) = open_session(opts).await?;
    println!(
        "Logged in as {} (session {}).",
        session.username(),
        session.cookie()
    );
    logout(&transport, &mut session).await?;
    println!("Logged out.");
    Ok(())
}

fn print_usage() {
    println!("Usage: parley-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  login   Log in, then log straight out (checks credentials)");
    println!("  list    Log in, list online users, log out");
    println!();
    println!("Options:");
    println!("  --server <addr>       Server address (default: {DEFAULT_SERVER})");
    println!("  --server-key <path>   Server public key PEM");
    println!("                        (default: ~/.config/parley/server.private.pem.pub)");
    println!("  --user <name>         Username (or $PARLEY_USER)");
    println!("  --password <pw>       Password (or $PARLEY_PASSWORD)");
    println!("  --timeout <ms>        Per-reply timeout (default: {DEFAULT_TIMEOUT_MS})");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut opts = Options {
        server: DEFAULT_SERVER.parse().context("bad default server")?,
        server_key: config_dir().join("server.private.pem.pub"),
        user: std::env::var("PARLEY_USER").ok(),
        password: std::env::var("PARLEY_PASSWORD").ok(),
        timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
    };

    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .map(String::as_str)
                .with_context(|| format!("{flag} requires a value"))
        };
        match flag {
            "--server" => {
                opts.server = value()?
                    .parse()
                    .context("--server must be an ip:port address")?
            }
            "--server-key" => opts.server_key = PathBuf::from(value()?),
            "--user" => opts.user = Some(value()?.to_owned()),
            "--password" => opts.password = Some(value()?.to_owned()),
            "--timeout" => {
                let ms: u64 = value()?.parse().context("--timeout must be a number")?;
                opts.timeout = Duration::from_millis(ms);
            }
            _ => remaining.push(flag),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["list"] | [] => cmd_list(&opts).await,
        ["login"] => cmd_login(&opts).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
