//! Server key storage.
//!
//! The private key lives in one PKCS#8 PEM file, readable only by its
//! owner. Next to it sits the public key (`<name>.pub`) that clients need.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use parley_core::crypto::Keypair;

/// Where the public half of `private_path` is published.
pub fn public_key_path(private_path: &Path) -> PathBuf {
    let mut name = private_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "server".into());
    name.push(".pub");
    private_path.with_file_name(name)
}

/// Load the server key, generating and storing a new one if missing.
pub fn load_or_generate(private_path: &Path, bits: usize) -> Result<Keypair> {
    let keypair = if private_path.exists() {
        let pem = fs::read_to_string(private_path)
            .with_context(|| format!("failed to read {}", private_path.display()))?;
        Keypair::from_pkcs8_pem(&pem)
            .with_context(|| format!("failed to parse {}", private_path.display()))?
    } else {
        tracing::info!(path = %private_path.display(), bits, "generating server key");
        let keypair = Keypair::generate_with_bits(bits).context("key generation failed")?;
        write_private(private_path, &keypair)?;
        keypair
    };

    let public_path = public_key_path(private_path);
    if !public_path.exists() {
        fs::write(&public_path, keypair.public_pem()?)
            .with_context(|| format!("failed to write {}", public_path.display()))?;
        tracing::info!(path = %public_path.display(), "wrote server public key");
    }
    Ok(keypair)
}

fn write_private(path: &Path, keypair: &Keypair) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let pem = keypair.to_pkcs8_pem()?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(pem.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
