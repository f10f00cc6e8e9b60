//! Ed25519 signing keys
//!
//! A single maintainer signer. Seeds are stored as 64 hex characters.

use crate::error::LedgerError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::Path;

const SIGNATURE_PREFIX: &str = "ed25519:";

/// Source of the log signing key
pub trait KeyProvider: Send + Sync {
    /// Sign `message`
    fn sign(&self, message: &[u8]) -> Signature;

    /// Public half used by verifiers
    fn verifying_key(&self) -> VerifyingKey;
}

/// Key held in process memory
pub struct LocalKeyProvider {
    key: SigningKey,
}

impl LocalKeyProvider {
    /// Key from a 32-byte seed
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Fresh random key
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load a hex seed file
    ///
    /// # Errors
    /// Returns [`LedgerError::Key`] if the file is unreadable or not a 32-byte hex seed
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| LedgerError::Key(format!("cannot read {}: {e}", path.display())))?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| LedgerError::Key(format!("{}: {e}", path.display())))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            LedgerError::Key(format!("{}: seed must be 32 bytes, got {}", path.display(), bytes.len()))
        })?;
        Ok(Self::from_seed(&seed))
    }

    /// Write the seed as hex
    ///
    /// # Errors
    /// Propagates filesystem errors
    pub fn write_seed_file(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        fs::write(path, format!("{}\n", hex::encode(self.key.to_bytes())))?;
        Ok(())
    }
}

impl std::fmt::Debug for LocalKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyProvider")
            .field("public_key", &public_key_hex(&self.key.verifying_key()))
            .finish_non_exhaustive()
    }
}

impl KeyProvider for LocalKeyProvider {
    fn sign(&self, message: &[u8]) -> Signature {
        self.key.sign(message)
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

/// Render a signature as `ed25519:<base64>`
#[must_use]
pub fn encode_signature(signature: &Signature) -> String {
    format!("{SIGNATURE_PREFIX}{}", STANDARD.encode(signature.to_bytes()))
}

/// Parse an `ed25519:<base64>` signature
///
/// # Errors
/// Returns [`LedgerError::MalformedSignature`] on a wrong prefix, bad base64 or length
pub fn decode_signature(text: &str) -> Result<Signature, LedgerError> {
    let encoded = text
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| LedgerError::MalformedSignature(format!("missing `{SIGNATURE_PREFIX}` prefix")))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| LedgerError::MalformedSignature(e.to_string()))?;
    let bytes: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| LedgerError::MalformedSignature(format!("expected 64 bytes, got {}", bytes.len())))?;
    Ok(Signature::from_bytes(&bytes))
}

/// Check `text` is a valid signature of `message`
#[must_use]
pub fn signature_matches(key: &VerifyingKey, message: &[u8], text: &str) -> bool {
    decode_signature(text).is_ok_and(|sig| key.verify(message, &sig).is_ok())
}

/// Hex form of a public key
#[must_use]
pub fn public_key_hex(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}

/// Parse a hex public key
///
/// # Errors
/// Returns [`LedgerError::Key`] if the text is not a valid 32-byte Ed25519 point
pub fn parse_public_key(text: &str) -> Result<VerifyingKey, LedgerError> {
    let bytes = hex::decode(text.trim()).map_err(|e| LedgerError::Key(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| LedgerError::Key(format!("public key must be 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| LedgerError::Key(e.to_string()))
}
