/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Crypto envelope (C4): per-column AEAD with stable JSON canonicalization.
//!
//! The plaintext for a column change is always the canonical JSON `{"value": <raw>}`
//! (`canonical_json::wrap_plaintext_value`). The associated data binds the ciphertext to the
//! table and column it came from, so a ciphertext cannot be replayed into a different column.
//! Output is base64 ciphertext + base64 nonce; the concrete algorithm is swappable behind a
//! small marker-trait split, following the shape of this crate family's `Aead<A: AeadAlgorithm>`
//! abstraction, but the shipped algorithm is always XChaCha20-Poly1305.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead as _, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::canonical_json::wrap_plaintext_value;

/// A concrete AEAD algorithm's fixed parameters. Implemented once per supported cipher; lets
/// call sites assert key/nonce sizes at compile time without hardcoding a specific cipher type.
pub trait AeadAlgorithm {
    const KEY_LEN: usize;
    const NONCE_LEN: usize;
    const TAG_LEN: usize;
}

pub struct XChaCha20Poly1305Algorithm;

impl AeadAlgorithm for XChaCha20Poly1305Algorithm {
    const KEY_LEN: usize = 32;
    const NONCE_LEN: usize = 24;
    const TAG_LEN: usize = 16;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("wrong key length: expected {expected}, got {actual}")]
    WrongKeyLength { expected: usize, actual: usize },
    #[error("AEAD seal failed")]
    SealFailed,
    #[error("AEAD open failed (wrong key or corrupt ciphertext)")]
    OpenFailed,
    #[error("malformed base64 in envelope")]
    MalformedBase64,
    #[error("malformed envelope plaintext")]
    MalformedPlaintext,
}

/// The 256-bit symmetric vault key, held in memory only while the vault is unlocked.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; XChaCha20Poly1305Algorithm::KEY_LEN]);

impl VaultKey {
    pub fn from_bytes(bytes: [u8; XChaCha20Poly1305Algorithm::KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != XChaCha20Poly1305Algorithm::KEY_LEN {
            return Err(CryptoError::WrongKeyLength {
                expected: XChaCha20Poly1305Algorithm::KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut buf = [0u8; XChaCha20Poly1305Algorithm::KEY_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

/// A sealed column value as it travels over the wire: base64 ciphertext + base64 nonce.
///
/// The wire record (§3, §6.1) names the ciphertext field `encryptedValue`; everything on this side
/// of the boundary keeps calling it `ciphertext`, which is what it is.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnEnvelope {
    #[serde(rename = "encryptedValue")]
    pub ciphertext: String,
    pub nonce: String,
}

fn associated_data(table_name: &str, column_name: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(table_name.len() + column_name.len() + 1);
    aad.extend_from_slice(table_name.as_bytes());
    aad.push(0x1F);
    aad.extend_from_slice(column_name.as_bytes());
    aad
}

/// Seal one column's raw JSON value for a given `(table, column)`.
pub fn seal_column(
    key: &VaultKey,
    table_name: &str,
    column_name: &str,
    raw: &Value,
) -> Result<ColumnEnvelope, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(&key.0).expect("key is always correctly sized");
    let mut nonce_bytes = [0u8; XChaCha20Poly1305Algorithm::NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let plaintext = wrap_plaintext_value(raw);
    let aad = associated_data(table_name, column_name);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::SealFailed)?;
    Ok(ColumnEnvelope {
        ciphertext: STANDARD.encode(ciphertext),
        nonce: STANDARD.encode(nonce_bytes),
    })
}

/// Open one column's envelope, returning the raw JSON value that was originally sealed.
///
/// Per the apply engine's contract (§4.4/§4.7 of the design), a failure here must never be
/// silently swallowed: callers are expected to propagate it as `CryptoFailed` and abort the
/// whole apply transaction rather than write a null over a healthy value.
pub fn open_column(
    key: &VaultKey,
    table_name: &str,
    column_name: &str,
    envelope: &ColumnEnvelope,
) -> Result<Value, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(&key.0).expect("key is always correctly sized");
    let nonce_bytes = STANDARD
        .decode(&envelope.nonce)
        .map_err(|_| CryptoError::MalformedBase64)?;
    if nonce_bytes.len() != XChaCha20Poly1305Algorithm::NONCE_LEN {
        return Err(CryptoError::OpenFailed);
    }
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = STANDARD
        .decode(&envelope.ciphertext)
        .map_err(|_| CryptoError::MalformedBase64)?;
    let aad = associated_data(table_name, column_name);
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::OpenFailed)?;
    let wrapper: Value =
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::MalformedPlaintext)?;
    wrapper
        .get("value")
        .cloned()
        .ok_or(CryptoError::MalformedPlaintext)
}
