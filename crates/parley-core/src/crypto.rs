//! Cryptographic primitives for Parley.
//!
//! Provides the stateless building blocks of the login handshake:
//!   1. RSA-OAEP (SHA-256) encryption under the server or client public key
//!   2. AES-256-CBC with PKCS#7 padding under the negotiated session key
//!   3. RSA-PSS (SHA-256) signatures, randomized per signature
//!   4. Random bytes, session keys, IVs and wall-clock timestamps
//!
//! Nothing in this module keeps state between calls. Session keys are held
//! in `Zeroizing` buffers and wiped when dropped; private keys never leave
//! `Keypair` except through `to_pkcs8_pem`.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric session key length in bytes (AES-256).
pub const SESSION_KEY_LEN: usize = 32;

/// CBC initialization vector length in bytes (one AES block).
pub const IV_LEN: usize = 16;

/// Default RSA modulus size for generated keys.
pub const RSA_BITS: usize = 2048;

/// OAEP overhead for SHA-256: two digests plus two framing bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

/// A negotiated AES-256 session key. Wiped from memory on drop.
pub type SessionKey = Zeroizing<[u8; SESSION_KEY_LEN]>;

/// A CBC initialization vector.
pub type Iv = [u8; IV_LEN];

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A long-lived RSA keypair.
///
/// The server loads one at startup; each client generates its own and
/// declares the public half during SUBMIT.
pub struct Keypair {
    private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl Keypair {
    /// Generate a fresh keypair with the default modulus size.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::generate_with_bits(RSA_BITS)
    }

    pub fn generate_with_bits(bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load an unencrypted PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Serialize the private key for persistent storage.
    ///
    /// Store these bytes with mode 0600.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))
    }

    pub fn public_pem(&self) -> Result<String, CryptoError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyFormat(e.to_string()))
    }

    pub fn public_der(&self) -> Result<Vec<u8>, CryptoError> {
        public_key_to_der(&self.public)
    }

    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("bits", &(self.public.size() * 8))
            .field("private", &"<redacted>")
            .finish()
    }
}

/// Encode a public key as SubjectPublicKeyInfo DER.
pub fn public_key_to_der(public: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    public
        .to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::KeyFormat(e.to_string()))
}

/// Parse a SubjectPublicKeyInfo DER public key.
pub fn parse_public_key_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(der).map_err(|e| CryptoError::KeyFormat(e.to_string()))
}

/// Parse a PEM-wrapped SubjectPublicKeyInfo public key.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::KeyFormat(e.to_string()))
}

// ── RSA-OAEP ──────────────────────────────────────────────────────────────────

/// Encrypt `plaintext` under `public` with RSA-OAEP/SHA-256.
///
/// Plaintexts longer than one OAEP block are split; each block is encrypted
/// independently and the output is the concatenation of modulus-sized
/// ciphertext blocks. An empty plaintext still produces one block.
pub fn asymmetric_encrypt(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let modulus = public.size();
    let block = modulus
        .checked_sub(OAEP_OVERHEAD)
        .filter(|b| *b > 0)
        .ok_or(CryptoError::KeyTooSmall(modulus))?;

    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(plaintext.len().div_ceil(block).max(1) * modulus);

    if plaintext.is_empty() {
        out.extend(public.encrypt(&mut rng, Oaep::new::<Sha256>(), &[])?);
        return Ok(out);
    }

    for piece in plaintext.chunks(block) {
        out.extend(public.encrypt(&mut rng, Oaep::new::<Sha256>(), piece)?);
    }
    Ok(out)
}

/// Decrypt a ciphertext produced by [`asymmetric_encrypt`].
///
/// Fails if the length is not a positive multiple of the modulus size or
/// if any block does not decrypt under `private`.
pub fn asymmetric_decrypt(private: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let modulus = private.size();
    if ciphertext.is_empty() || ciphertext.len() % modulus != 0 {
        return Err(CryptoError::CiphertextLength(ciphertext.len(), modulus));
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for block in ciphertext.chunks(modulus) {
        out.extend(private.decrypt(Oaep::new::<Sha256>(), block)?);
    }
    Ok(out)
}

// ── AES-256-CBC ───────────────────────────────────────────────────────────────

/// Encrypt under the session key. PKCS#7 padding is applied first, so the
/// output is always a non-empty multiple of 16 bytes.
pub fn symmetric_encrypt(key: &[u8; SESSION_KEY_LEN], iv: &Iv, plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(&(*key).into(), &(*iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt under the session key and strip PKCS#7 padding.
///
/// Structurally invalid input (wrong length or bad padding) yields
/// `CryptoError::Padding`. The unpadding itself is not constant-time.
pub fn symmetric_decrypt(
    key: &[u8; SESSION_KEY_LEN],
    iv: &Iv,
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
        return Err(CryptoError::Padding);
    }
    Aes256CbcDec::new(&(*key).into(), &(*iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Padding)
}

// ── RSA-PSS ───────────────────────────────────────────────────────────────────

/// Sign `message` with RSA-PSS/SHA-256. Two signatures over the same
/// message differ because the salt is fresh each time.
pub fn sign(private: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
    let signer = BlindedSigningKey::<Sha256>::new(private.clone());
    signer
        .sign_with_rng(&mut rand::thread_rng(), message)
        .to_vec()
}

/// Verify an RSA-PSS/SHA-256 signature. Never fails loudly: any structural
/// or cryptographic problem returns `false` and is logged at debug level.
pub fn verify(public: &RsaPublicKey, signature: &[u8], message: &[u8]) -> bool {
    let signature = match Signature::try_from(signature) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "malformed signature");
            return false;
        }
    };
    match VerifyingKey::<Sha256>::new(public.clone()).verify(message, &signature) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "signature verification failed");
            false
        }
    }
}

// ── Randomness and time ───────────────────────────────────────────────────────

/// `n` bytes from the thread-local CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// A fresh 256-bit session key.
pub fn random_key() -> SessionKey {
    let mut key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    rand::thread_rng().fill_bytes(&mut key[..]);
    key
}

/// A fresh CBC initialization vector.
pub fn random_iv() -> Iv {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Hashing and comparison ────────────────────────────────────────────────────

/// Lowercase hex SHA-256 over the concatenation of `parts`.
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p);
    }
    hex::encode(h.finalize())
}

/// Constant-time equality for secrets. Length mismatch returns false.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("malformed key material: {0}")]
    KeyFormat(String),

    #[error("RSA modulus of {0} bytes is too small for OAEP/SHA-256")]
    KeyTooSmall(usize),

    #[error("ciphertext length {0} is not a positive multiple of the {1}-byte modulus")]
    CiphertextLength(usize, usize),

    #[error("invalid block padding")]
    Padding,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
