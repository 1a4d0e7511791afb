// crates/mctech-udf/src/crypto.rs
// ============================================================================
// Module: Crypto Client
// Description: AES-CBC cell encryption with a service-provided key.
// Purpose: Back `MCTECH_ENCRYPT()` and `MCTECH_DECRYPT()`.
// Dependencies: aes, base64, cbc, mctech-config, mctech-core, serde
// ============================================================================

//! ## Overview
//! Ciphertext is `{crypto}` followed by the base64 of the PKCS#7-padded
//! AES-CBC output. Text without the prefix is returned unchanged by
//! [`CryptoClient::decrypt`].
//!
//! [`AesCryptoClient::from_service`] fetches the key and IV from
//! `GET {api-prefix}db/aes` (header `x-access-id`). When the first fetch
//! fails the failure is logged and a background thread retries every ten
//! seconds until it succeeds or the client is stopped; until then calls fail
//! with [`UdfError::CryptoNotReady`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use aes::Aes128;
use aes::Aes192;
use aes::Aes256;
use aes::cipher::BlockDecryptMut;
use aes::cipher::BlockEncryptMut;
use aes::cipher::KeyIvInit;
use aes::cipher::block_padding::Pkcs7;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mctech_config::EncryptionConfig;
use mctech_core::LogLevel;
use mctech_core::LogRecord;
use mctech_core::LogSink;
use mctech_core::RpcClient;
use mctech_core::rpc::api_url;
use serde::Deserialize;
use url::Url;

use crate::error::UdfError;
use crate::error::UdfResult;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Ciphertext marker.
pub const CRYPTO_PREFIX: &str = "{crypto}";

/// Delay between background key fetches.
pub const KEY_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Granularity of the stop check while waiting between retries.
const STOP_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// SECTION: Client Trait
// ============================================================================

/// Encrypts and decrypts cell values.
pub trait CryptoClient: Send + Sync {
    /// Encrypts `plain`.
    ///
    /// # Errors
    ///
    /// Returns an error when no key is loaded.
    fn encrypt(&self, plain: &str) -> UdfResult<String>;

    /// Decrypts `content`; text without [`CRYPTO_PREFIX`] is returned as is.
    ///
    /// # Errors
    ///
    /// Returns an error for undecryptable ciphertext or when no key is loaded.
    fn decrypt(&self, content: &str) -> UdfResult<String>;

    /// Stops background work owned by the client.
    fn stop(&self) {}
}

/// Identity client used when encryption is mocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCryptoClient;

impl CryptoClient for MockCryptoClient {
    fn encrypt(&self, plain: &str) -> UdfResult<String> {
        Ok(plain.to_string())
    }

    fn decrypt(&self, content: &str) -> UdfResult<String> {
        Ok(content.to_string())
    }
}

// ============================================================================
// SECTION: AES Client
// ============================================================================

/// Key material.
#[derive(Clone, PartialEq, Eq)]
struct AesParams {
    /// 16, 24 or 32 byte key.
    key: Vec<u8>,
    /// 16 byte IV.
    iv: Vec<u8>,
}

/// Service response of `db/aes`.
#[derive(Deserialize)]
struct AesParamsResponse {
    /// Base64 key.
    #[serde(default)]
    key: String,
    /// Base64 IV.
    #[serde(default)]
    iv: String,
}

/// AES-CBC client.
pub struct AesCryptoClient {
    /// Loaded key material.
    params: RwLock<Option<AesParams>>,
    /// Stops the background fetch.
    stopped: AtomicBool,
    /// Background fetch thread.
    loader: Mutex<Option<JoinHandle<()>>>,
}

impl AesCryptoClient {
    /// Creates a client with known key material.
    ///
    /// # Errors
    ///
    /// Returns [`UdfError::CryptoParams`] for unsupported key or IV sizes.
    pub fn with_params(key: Vec<u8>, iv: Vec<u8>) -> UdfResult<Self> {
        let params = validate_params(key, iv)?;
        Ok(Self {
            params: RwLock::new(Some(params)),
            stopped: AtomicBool::new(false),
            loader: Mutex::new(None),
        })
    }

    /// Creates a client that loads its key from the encryption service.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built or the service
    /// URL is invalid; fetch failures only start background retries.
    pub fn from_service(config: &EncryptionConfig, log: Arc<dyn LogSink>) -> UdfResult<Arc<Self>> {
        let fetcher = KeyFetcher {
            client: RpcClient::new()?,
            url: api_url(&config.api_prefix, "db/aes", &[])?,
            access_id: config.access_id.clone(),
        };
        let client = Arc::new(Self {
            params: RwLock::new(None),
            stopped: AtomicBool::new(false),
            loader: Mutex::new(None),
        });
        match fetcher.fetch() {
            Ok(params) => {
                client.set_params(params);
                log.record(&LogRecord::new(LogLevel::Info, "mctech.crypto", "aes crypto key/iv loaded"));
            }
            Err(err) => {
                log.record(
                    &LogRecord::new(LogLevel::Warn, "mctech.crypto", "aes crypto key/iv load failed, retrying")
                        .with_field("error", err.to_string()),
                );
                client.spawn_loader(fetcher, log)?;
            }
        }
        Ok(client)
    }

    /// True once key material is loaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.params.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Stores key material.
    fn set_params(&self, params: AesParams) {
        *self.params.write().unwrap_or_else(PoisonError::into_inner) = Some(params);
    }

    /// Current key material.
    fn params(&self) -> UdfResult<AesParams> {
        self.params.read().unwrap_or_else(PoisonError::into_inner).clone().ok_or(UdfError::CryptoNotReady)
    }

    /// Starts the background retry loop.
    fn spawn_loader(self: &Arc<Self>, fetcher: KeyFetcher, log: Arc<dyn LogSink>) -> UdfResult<()> {
        let client = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("mctech-crypto-key-loader".to_string())
            .spawn(move || {
                loop {
                    let mut waited = Duration::ZERO;
                    while waited < KEY_RETRY_INTERVAL {
                        match client.upgrade() {
                            Some(client) if !client.stopped.load(Ordering::Relaxed) => {}
                            _ => return,
                        }
                        thread::sleep(STOP_POLL);
                        waited += STOP_POLL;
                    }
                    let Some(client) = client.upgrade() else {
                        return;
                    };
                    match fetcher.fetch() {
                        Ok(params) => {
                            client.set_params(params);
                            log.record(&LogRecord::new(LogLevel::Info, "mctech.crypto", "aes crypto key/iv loaded"));
                            return;
                        }
                        Err(err) => log.record(
                            &LogRecord::new(LogLevel::Warn, "mctech.crypto", "aes crypto key/iv load failed, retrying")
                                .with_field("error", err.to_string()),
                        ),
                    }
                }
            })
            .map_err(|err| UdfError::CryptoParams(format!("failed to spawn key loader: {err}")))?;
        *self.loader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }
}

impl CryptoClient for AesCryptoClient {
    fn encrypt(&self, plain: &str) -> UdfResult<String> {
        let params = self.params()?;
        let cipher = match params.key.len() {
            16 => encrypt_with::<cbc::Encryptor<Aes128>>(&params, plain.as_bytes())?,
            24 => encrypt_with::<cbc::Encryptor<Aes192>>(&params, plain.as_bytes())?,
            _ => encrypt_with::<cbc::Encryptor<Aes256>>(&params, plain.as_bytes())?,
        };
        Ok(format!("{CRYPTO_PREFIX}{}", STANDARD.encode(cipher)))
    }

    fn decrypt(&self, content: &str) -> UdfResult<String> {
        let Some(payload) = content.strip_prefix(CRYPTO_PREFIX) else {
            return Ok(content.to_string());
        };
        let params = self.params()?;
        let failure = || UdfError::Decrypt(content.to_string());
        let cipher = STANDARD.decode(payload).map_err(|_| failure())?;
        let plain = match params.key.len() {
            16 => decrypt_with::<cbc::Decryptor<Aes128>>(&params, &cipher),
            24 => decrypt_with::<cbc::Decryptor<Aes192>>(&params, &cipher),
            _ => decrypt_with::<cbc::Decryptor<Aes256>>(&params, &cipher),
        }
        .ok_or_else(failure)?;
        String::from_utf8(plain).map_err(|_| failure())
    }

    /// Stops background retries and waits for the loader thread.
    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        let loader = self.loader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(loader) = loader {
            let _ = loader.join();
        }
    }
}

/// Encrypts with PKCS#7 padding.
fn encrypt_with<C: KeyIvInit + BlockEncryptMut>(params: &AesParams, plain: &[u8]) -> UdfResult<Vec<u8>> {
    let cipher = C::new_from_slices(&params.key, &params.iv)
        .map_err(|_| UdfError::CryptoParams("invalid key or iv length".to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plain))
}

/// Decrypts and strips PKCS#7 padding; `None` when either step fails.
fn decrypt_with<C: KeyIvInit + BlockDecryptMut>(params: &AesParams, cipher: &[u8]) -> Option<Vec<u8>> {
    C::new_from_slices(&params.key, &params.iv).ok()?.decrypt_padded_vec_mut::<Pkcs7>(cipher).ok()
}

/// Checks key and IV sizes.
fn validate_params(key: Vec<u8>, iv: Vec<u8>) -> UdfResult<AesParams> {
    if key.is_empty() || iv.is_empty() {
        return Err(UdfError::CryptoParams("key or iv must not be empty".to_string()));
    }
    if !matches!(key.len(), 16 | 24 | 32) || iv.len() != 16 {
        return Err(UdfError::CryptoParams(format!(
            "unsupported key/iv size {}/{}",
            key.len(),
            iv.len()
        )));
    }
    Ok(AesParams {
        key,
        iv,
    })
}

// ============================================================================
// SECTION: Key Fetch
// ============================================================================

/// Fetches key material from the encryption service.
struct KeyFetcher {
    /// Shared client with retry.
    client: RpcClient,
    /// `db/aes` endpoint.
    url: Url,
    /// `x-access-id` header value.
    access_id: String,
}

impl KeyFetcher {
    /// One fetch with the client's retry.
    fn fetch(&self) -> UdfResult<AesParams> {
        let body = self.client.get(&self.url, &[("x-access-id", &self.access_id)])?;
        let response: AesParamsResponse =
            serde_json::from_slice(&body).map_err(|err| UdfError::Response(err.to_string()))?;
        let key = STANDARD.decode(response.key).map_err(|err| UdfError::CryptoParams(err.to_string()))?;
        let iv = STANDARD.decode(response.iv).map_err(|err| UdfError::CryptoParams(err.to_string()))?;
        validate_params(key, iv)
    }
}

/// Builds the client selected by `[encryption]`.
///
/// # Errors
///
/// Returns an error when the service client cannot be built.
pub fn crypto_client(config: &EncryptionConfig, log: Arc<dyn LogSink>) -> UdfResult<Arc<dyn CryptoClient>> {
    if config.mock {
        return Ok(Arc::new(MockCryptoClient));
    }
    let client: Arc<dyn CryptoClient> = AesCryptoClient::from_service(config, log)?;
    Ok(client)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
