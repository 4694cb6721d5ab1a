//! Request envelope: compress, sign, encrypt
//!
//! Outbound records pass through the stages in this order:
//!
//! 1. JSON serialization (`{id, type, delta?, value?}`)
//! 2. gzip compression, declared with `Content-Encoding: gzip`
//! 3. HMAC-SHA256 over the *compressed* bytes, base64 in [`HASH_HEADER`]
//! 4. RSA PKCS#1 v1.5 encryption, marked with [`ENCRYPTED_HEADER`]
//!
//! [`EnvelopeOpener::open`] inverts them: decrypt, verify, decompress.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::Sha256;
use tracing::trace;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the base64 HMAC-SHA256 of the compressed body
pub const HASH_HEADER: &str = "HashSHA256";

/// Header marking an encrypted body
pub const ENCRYPTED_HEADER: &str = "Encrypted";

/// Value of [`ENCRYPTED_HEADER`] for RSA-encrypted bodies
pub const ENCRYPTION_SCHEME: &str = "crypto/rsa";

pub const GZIP_ENCODING: &str = "gzip";

/// Largest accepted payload, compressed or decompressed
pub const MAX_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug)]
pub enum EnvelopeError {
    /// Payload could not be serialized
    Serialization(String),

    /// gzip stream could not be written or read
    Compression(std::io::Error),

    /// Signature missing, malformed, or not matching the body
    IntegrityCheckFailed,

    /// Body could not be encrypted with the configured public key
    EncryptionFailed(String),

    /// Body could not be decrypted, or no private key is configured
    DecryptionFailed(String),

    /// Key material could not be loaded
    InvalidKey(String),
}

impl EnvelopeError {
    /// Whether the error is caused by the received request itself
    ///
    /// These are never retried and map to client errors.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            EnvelopeError::IntegrityCheckFailed
                | EnvelopeError::DecryptionFailed(_)
                | EnvelopeError::Compression(_)
        )
    }
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Serialization(msg) => write!(f, "failed to serialize payload: {msg}"),
            EnvelopeError::Compression(err) => write!(f, "gzip stream error: {err}"),
            EnvelopeError::IntegrityCheckFailed => write!(f, "integrity check failed"),
            EnvelopeError::EncryptionFailed(msg) => write!(f, "failed to encrypt body: {msg}"),
            EnvelopeError::DecryptionFailed(msg) => write!(f, "failed to decrypt body: {msg}"),
            EnvelopeError::InvalidKey(msg) => write!(f, "invalid key material: {msg}"),
        }
    }
}

impl std::error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvelopeError::Compression(err) => Some(err),
            _ => None,
        }
    }
}

/// A body ready to be written to the wire, plus the headers describing it
#[derive(Debug, Clone)]
pub struct Sealed {
    pub body: Vec<u8>,
    pub signature: Option<String>,
    pub encrypted: bool,
}

/// Transport headers relevant to opening a body
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeHeaders<'a> {
    pub content_encoding: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub encrypted: Option<&'a str>,
}

/// Base64 HMAC-SHA256 of `data` under `secret`
pub fn sign(data: &[u8], secret: &[u8]) -> Result<String, EnvelopeError> {
    let mut mac = new_mac(secret)?;
    mac.update(data);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn new_mac(secret: &[u8]) -> Result<HmacSha256, EnvelopeError> {
    HmacSha256::new_from_slice(secret).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))
}

fn verify(data: &[u8], secret: &[u8], signature: &str) -> Result<(), EnvelopeError> {
    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| EnvelopeError::IntegrityCheckFailed)?;
    let mut mac = new_mac(secret)?;
    mac.update(data);
    mac.verify_slice(&expected)
        .map_err(|_| EnvelopeError::IntegrityCheckFailed)
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(EnvelopeError::Compression)?;
    encoder.finish().map_err(EnvelopeError::Compression)
}

/// Decompress a gzip body of at most [`MAX_PAYLOAD_BYTES`] decoded bytes
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .take(MAX_PAYLOAD_BYTES as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(EnvelopeError::Compression)?;
    if decoded.len() > MAX_PAYLOAD_BYTES {
        return Err(EnvelopeError::Compression(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("decompressed body exceeds {MAX_PAYLOAD_BYTES} bytes"),
        )));
    }
    Ok(decoded)
}

/// Load an RSA public key from a PKCS#1 PEM file
pub fn load_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey, EnvelopeError> {
    let pem = std::fs::read_to_string(path.as_ref())
        .map_err(|e| EnvelopeError::InvalidKey(format!("{}: {e}", path.as_ref().display())))?;
    RsaPublicKey::from_pkcs1_pem(&pem).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))
}

/// Load an RSA private key from a PKCS#1 PEM file
pub fn load_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey, EnvelopeError> {
    let pem = std::fs::read_to_string(path.as_ref())
        .map_err(|e| EnvelopeError::InvalidKey(format!("{}: {e}", path.as_ref().display())))?;
    RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| EnvelopeError::InvalidKey(e.to_string()))
}

/// Sending side of the envelope
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    secret: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
}

impl Envelope {
    pub fn new(secret: Option<String>, public_key: Option<RsaPublicKey>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(String::into_bytes),
            public_key,
        }
    }

    pub fn seal<T: Serialize>(&self, payload: &T) -> Result<Sealed, EnvelopeError> {
        let json =
            serde_json::to_vec(payload).map_err(|e| EnvelopeError::Serialization(e.to_string()))?;
        let mut body = gzip(&json)?;

        let signature = self
            .secret
            .as_deref()
            .map(|secret| sign(&body, secret))
            .transpose()?;

        let encrypted = match &self.public_key {
            Some(key) => {
                body = key
                    .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, &body)
                    .map_err(|e| EnvelopeError::EncryptionFailed(e.to_string()))?;
                true
            }
            None => false,
        };

        trace!(
            "sealed {} bytes (signed: {}, encrypted: {encrypted})",
            body.len(),
            signature.is_some()
        );
        Ok(Sealed {
            body,
            signature,
            encrypted,
        })
    }
}

/// Receiving side of the envelope
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOpener {
    secret: Option<Vec<u8>>,
    private_key: Option<RsaPrivateKey>,
}

impl EnvelopeOpener {
    pub fn new(secret: Option<String>, private_key: Option<RsaPrivateKey>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(String::into_bytes),
            private_key,
        }
    }

    /// Signature for a response body, when a secret is configured
    pub fn sign_response(&self, body: &[u8]) -> Result<Option<String>, EnvelopeError> {
        self.secret
            .as_deref()
            .map(|secret| sign(body, secret))
            .transpose()
    }

    /// Recover the plain payload from a received body
    ///
    /// With a secret configured, a missing signature is treated like a
    /// wrong one. A body that is not declared as gzip is passed through.
    pub fn open(&self, body: &[u8], headers: &EnvelopeHeaders) -> Result<Vec<u8>, EnvelopeError> {
        let decrypted;
        let body = match headers.encrypted {
            Some(scheme) if scheme == ENCRYPTION_SCHEME => {
                let key = self.private_key.as_ref().ok_or_else(|| {
                    EnvelopeError::DecryptionFailed("no private key configured".to_string())
                })?;
                decrypted = key
                    .decrypt(Pkcs1v15Encrypt, body)
                    .map_err(|e| EnvelopeError::DecryptionFailed(e.to_string()))?;
                decrypted.as_slice()
            }
            Some(other) => {
                return Err(EnvelopeError::DecryptionFailed(format!(
                    "unsupported scheme {other:?}"
                )));
            }
            None => body,
        };

        if let Some(secret) = &self.secret {
            let signature = headers
                .signature
                .ok_or(EnvelopeError::IntegrityCheckFailed)?;
            verify(body, secret, signature)?;
        }

        match headers.content_encoding {
            Some(encoding) if encoding.contains(GZIP_ENCODING) => gunzip(body),
            _ => Ok(body.to_vec()),
        }
    }
}
