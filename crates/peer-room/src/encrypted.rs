//! Password-encrypted transport.
//!
//! Payloads are sealed with AES-256-GCM under a key derived from a shared
//! password (Argon2). Wire format: 12-byte nonce followed by the ciphertext.
//! Peers that don't know the password see only noise, and whatever they
//! publish is dropped on receipt.

use crate::transport::{InboundMessage, MessageHandler, PubSub, Result, TransportError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Wraps a transport so every payload is encrypted with a shared password.
pub struct EncryptedPubSub<T> {
    inner: T,
    cipher: Arc<Aes256Gcm>,
}

impl<T: PubSub> EncryptedPubSub<T> {
    /// Derive the room key from `password` and an optional `salt`.
    ///
    /// Every member must use the same password and salt.
    pub fn new(
        inner: T,
        password: &str,
        salt: Option<&str>,
    ) -> std::result::Result<Self, EncryptionError> {
        let key = derive_key(password, salt.unwrap_or_default())?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
        Ok(Self {
            inner,
            cipher: Arc::new(cipher),
        })
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

fn derive_key(password: &str, salt: &str) -> std::result::Result<[u8; 32], EncryptionError> {
    // Argon2 wants at least 8 bytes of salt; hashing also lets the salt be empty
    let salt = blake3::hash(salt.as_bytes());
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| EncryptionError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| TransportError::PublishFailed(format!("Encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open(cipher: &Aes256Gcm, sealed: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
}

#[async_trait]
impl<T: PubSub> PubSub for EncryptedPubSub<T> {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sealed = seal(&self.cipher, &payload)?;
        self.inner.publish(topic, sealed, cancel).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> Result<()> {
        let cipher = Arc::clone(&self.cipher);
        let decrypting: MessageHandler = Arc::new(move |msg: InboundMessage| {
            match open(&cipher, &msg.payload) {
                Some(payload) => handler(InboundMessage {
                    size: payload.len() as u64,
                    payload,
                    ..msg
                }),
                None => trace!(
                    "Dropped undecryptable message from {}",
                    msg.sender.id.short()
                ),
            }
        });
        self.inner.subscribe(topic, decrypting, cancel).await
    }
}
