//! Decoding of encrypted payment notifications (AES-256-GCM).

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::NotifyError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Outer body of a gateway notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    pub resource: NotifyResource,
}

/// The encrypted part of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResource {
    /// Base64 of ciphertext followed by the 16-byte tag.
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default)]
    pub associated_data: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

/// AEAD cipher keyed with the merchant API v3 key.
#[derive(Clone)]
pub struct NotifyCipher {
    key: [u8; KEY_LEN],
}

impl NotifyCipher {
    pub fn new(api_v3_key: &str) -> Result<Self, NotifyError> {
        let bytes = api_v3_key.as_bytes();
        if bytes.len() != KEY_LEN {
            return Err(NotifyError::InvalidKey(bytes.len()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Authenticates and decrypts a resource into its UTF-8 plaintext.
    pub fn decrypt(&self, resource: &NotifyResource) -> Result<String, NotifyError> {
        let nonce = nonce_bytes(&resource.nonce)?;
        let ciphertext = STANDARD.decode(resource.ciphertext.trim())?;
        let aad = resource.associated_data.as_deref().unwrap_or_default();

        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| NotifyError::Authentication)?;

        Ok(String::from_utf8(plaintext)?)
    }

    /// Encrypts a plaintext the way the gateway does; used to simulate callbacks.
    pub fn encrypt(
        &self,
        nonce: &str,
        associated_data: &str,
        plaintext: &str,
    ) -> Result<NotifyResource, NotifyError> {
        let nonce_raw = nonce_bytes(nonce)?;
        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(nonce_raw),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: associated_data.as_bytes(),
                },
            )
            .map_err(|_| NotifyError::Authentication)?;

        Ok(NotifyResource {
            ciphertext: STANDARD.encode(ciphertext),
            nonce: nonce.to_string(),
            associated_data: Some(associated_data.to_string()),
            algorithm: Some("AEAD_AES_256_GCM".to_string()),
        })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

impl std::fmt::Debug for NotifyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NotifyCipher(..)")
    }
}

fn nonce_bytes(nonce: &str) -> Result<&[u8], NotifyError> {
    let bytes = nonce.as_bytes();
    if bytes.len() != NONCE_LEN {
        return Err(NotifyError::InvalidNonce(bytes.len()));
    }
    Ok(bytes)
}
