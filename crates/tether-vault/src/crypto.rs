//! AES-256-GCM sealing and PBKDF2 key derivation using `ring`.
//!
//! Each call to [`encrypt`] draws a fresh random 96-bit nonce, which the
//! caller stores next to the ciphertext. Keys derived from a passphrase use
//! PBKDF2-HMAC-SHA256 with a per-vault random salt.

use std::num::NonZeroU32;

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LEN: usize = 32;

/// PBKDF2 iteration count for new vaults (OWASP 2023, HMAC-SHA256).
pub const DEFAULT_PBKDF2_ITERATIONS: NonZeroU32 = NonZeroU32::MIN.saturating_add(599_999);

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

fn sealing_key(key: &[u8], on_error: fn(String) -> VaultError) -> Result<LessSafeKey> {
    if key.len() != KEY_LEN {
        return Err(on_error(format!(
            "key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| on_error("failed to create AES-256-GCM key".into()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` under `key`, binding it to `aad`.
///
/// Returns `(nonce, ciphertext)`; the ciphertext carries the 128-bit tag.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] on a bad key length or if the
/// system RNG fails.
pub fn encrypt(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    let fail = |reason| VaultError::EncryptionFailed { reason };
    let key = sealing_key(key, fail)?;

    let mut nonce = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| fail("failed to generate random nonce".into()))?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce),
        Aad::from(aad),
        &mut in_out,
    )
    .map_err(|_| fail("seal_in_place failed".into()))?;

    Ok((nonce, in_out))
}

/// Decrypt `ciphertext` produced by [`encrypt`] with the same `key` and `aad`.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] if the key, nonce or `aad` do not
/// match or the ciphertext was modified.
pub fn decrypt(nonce: &[u8], ciphertext: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let fail = |reason| VaultError::DecryptionFailed { reason };
    let key = sealing_key(key, fail)?;

    let nonce = Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| fail(format!("nonce must be {NONCE_LEN_BYTES} bytes")))?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| fail("authentication failed, wrong key or corrupted data".into()))?;
    Ok(plaintext.to_vec())
}

/// Derive a 256-bit key from `passphrase` and `salt`.
pub fn derive_key(passphrase: &[u8], salt: &[u8], iterations: NonZeroU32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, passphrase, &mut key);
    key
}

/// Generate a random PBKDF2 salt.
///
/// # Errors
///
/// Returns [`VaultError::KeyDerivationFailed`] if the system RNG fails.
pub fn random_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| VaultError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;
    Ok(salt)
}

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`VaultError::Internal`] if the system RNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| VaultError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
