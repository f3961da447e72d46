//! KMS client backends.
//!
//! Both backends are bound to a single immutable KEK resource name at
//! construction. `HttpKmsClient` speaks the Cloud KMS REST contract;
//! `LocalKmsClient` wraps with an in-process AES-256-GCM KEK and exists for
//! development and tests.

use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use keymint_core::{KeyError, KeyResult, KmsClient};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn kms_err(context: &str, detail: impl std::fmt::Display) -> KeyError {
    KeyError::Kms(format!("{context}: {detail}"))
}

/// Cloud KMS REST client. Requests go to
/// `{endpoint}/v1/{key_name}:encrypt` / `:decrypt` with base64 payload
/// fields, optionally authenticated with a bearer token.
pub struct HttpKmsClient {
    http: reqwest::Client,
    endpoint: String,
    key_name: String,
    access_token: Option<String>,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    plaintext: &'a str,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

impl HttpKmsClient {
    pub fn new(
        key_name: impl Into<String>,
        endpoint: impl Into<String>,
        access_token: Option<String>,
    ) -> KeyResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| kms_err("building http client", e))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            key_name: key_name.into(),
            access_token,
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!("{}/v1/{}:{action}", self.endpoint, self.key_name)
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: &Req,
    ) -> KeyResult<Resp> {
        let mut request = self.http.post(self.action_url(action)).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| kms_err(&format!("kms {action} request"), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(kms_err(
                &format!("kms {action}"),
                format!("unexpected status {status}"),
            ));
        }
        response
            .json::<Resp>()
            .await
            .map_err(|e| kms_err(&format!("decoding kms {action} response"), e))
    }
}

#[async_trait]
impl KmsClient for HttpKmsClient {
    async fn encrypt(&self, plaintext: &[u8]) -> KeyResult<Vec<u8>> {
        let encoded = BASE64.encode(plaintext);
        let response: EncryptResponse = self
            .post("encrypt", &EncryptRequest { plaintext: &encoded })
            .await?;
        BASE64
            .decode(response.ciphertext)
            .map_err(|e| kms_err("decoding wrapped key", e))
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> KeyResult<Zeroizing<Vec<u8>>> {
        let encoded = BASE64.encode(ciphertext);
        let response: DecryptResponse = self
            .post("decrypt", &DecryptRequest { ciphertext: &encoded })
            .await?;
        BASE64
            .decode(response.plaintext)
            .map(Zeroizing::new)
            .map_err(|e| kms_err("decoding unwrapped key", e))
    }
}

/// AES-256-GCM wrap with an in-process KEK. Ciphertext layout is
/// `nonce || ct`; the KEK resource name is bound as AAD so ciphertext from
/// one key name never unwraps under another.
pub struct LocalKmsClient {
    cipher: Aes256Gcm,
    key_name: String,
}

impl std::fmt::Debug for LocalKmsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKmsClient")
            .field("key_name", &self.key_name)
            .finish()
    }
}

impl LocalKmsClient {
    pub fn new(key_name: impl Into<String>, kek: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek)),
            key_name: key_name.into(),
        }
    }

    /// Build from a base64-encoded 32-byte KEK, as carried in `KMS_LOCAL_KEK`.
    pub fn from_base64_kek(key_name: impl Into<String>, kek_b64: &str) -> KeyResult<Self> {
        let decoded = Zeroizing::new(
            BASE64
                .decode(kek_b64.trim())
                .map_err(|e| KeyError::Config(format!("decoding local KEK: {e}")))?,
        );
        let kek: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            KeyError::Config(format!(
                "local KEK must be 32 bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::new(key_name, &kek))
    }
}

#[async_trait]
impl KmsClient for LocalKmsClient {
    async fn encrypt(&self, plaintext: &[u8]) -> KeyResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: self.key_name.as_bytes(),
                },
            )
            .map_err(|_| KeyError::Kms("wrapping key: cipher failure".into()))?;
        let mut wrapped = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        wrapped.extend_from_slice(&nonce_bytes);
        wrapped.extend_from_slice(&ciphertext);
        Ok(wrapped)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> KeyResult<Zeroizing<Vec<u8>>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(KeyError::Kms("unwrapping key: ciphertext too short".into()));
        }
        let (nonce, ct) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ct,
                    aad: self.key_name.as_bytes(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| KeyError::Kms("unwrapping key: authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEK: [u8; 32] = [7u8; 32];

    #[tokio::test]
    async fn local_wrap_unwrap_round_trips() {
        let kms = LocalKmsClient::new("projects/p/keys/kek", &KEK);
        let plaintext = [0x42u8; 32];
        let wrapped = kms.encrypt(&plaintext).await.unwrap();
        assert_ne!(wrapped.as_slice(), plaintext.as_slice());
        let unwrapped = kms.decrypt(&wrapped).await.unwrap();
        assert_eq!(unwrapped.as_slice(), plaintext.as_slice());
    }

    #[tokio::test]
    async fn wrap_is_randomized_per_call() {
        let kms = LocalKmsClient::new("projects/p/keys/kek", &KEK);
        let a = kms.encrypt(&[1u8; 32]).await.unwrap();
        let b = kms.encrypt(&[1u8; 32]).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unwrap_under_other_key_name_fails() {
        let kms_a = LocalKmsClient::new("projects/p/keys/kek-a", &KEK);
        let kms_b = LocalKmsClient::new("projects/p/keys/kek-b", &KEK);
        let wrapped = kms_a.encrypt(&[9u8; 32]).await.unwrap();
        let err = kms_b.decrypt(&wrapped).await.unwrap_err();
        assert!(matches!(err, KeyError::Kms(_)));
    }

    #[tokio::test]
    async fn truncated_ciphertext_is_rejected() {
        let kms = LocalKmsClient::new("projects/p/keys/kek", &KEK);
        let err = kms.decrypt(&[0u8; 8]).await.unwrap_err();
        assert!(matches!(err, KeyError::Kms(_)));
    }

    #[test]
    fn base64_kek_must_be_32_bytes() {
        let short = BASE64.encode([1u8; 16]);
        let err = LocalKmsClient::from_base64_kek("kek", &short).unwrap_err();
        assert!(matches!(err, KeyError::Config(_)));

        let ok = BASE64.encode(KEK);
        assert!(LocalKmsClient::from_base64_kek("kek", &ok).is_ok());
    }
}
