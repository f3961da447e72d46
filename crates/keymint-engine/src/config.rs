//! Service configuration, read from the environment.

use std::path::PathBuf;

use keymint_core::{KeyError, KeyResult};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_MIGRATIONS_DIR: &str = "./migrations";
const DEFAULT_KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com";
const DEFAULT_OTEL_SERVICE_NAME: &str = "key-management-service";

/// Which KMS backend wraps and unwraps DEKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsProvider {
    /// Cloud KMS over REST.
    Http,
    /// In-process AES-256-GCM KEK, for development and tests.
    Local,
}

#[derive(Debug, Clone)]
pub struct KmsConfig {
    pub provider: KmsProvider,
    /// KEK resource name; the client is bound to it at construction.
    pub key_name: String,
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Base64 32-byte KEK for the local provider.
    pub local_kek: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OtelConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Fraction of requests that carry trace context, in [0, 1].
    pub sampling_rate: f64,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: DEFAULT_OTEL_SERVICE_NAME.into(),
            sampling_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub database_url: String,
    pub kms: KmsConfig,
    pub log_level: String,
    pub otel: OtelConfig,
    pub migrations_dir: PathBuf,
    /// Optional append-only JSONL sink for audit events.
    pub audit_log_file: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn from_env() -> KeyResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Keeps configuration testable
    /// without mutating process-global environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> KeyResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|e| KeyError::Config(format!("parsing PORT: {e}")))?,
            None => DEFAULT_PORT,
        };

        let database_url = get("DATABASE_URL")
            .ok_or_else(|| KeyError::Config("DATABASE_URL is required".into()))?;

        let key_name = get("KMS_KEY_NAME")
            .ok_or_else(|| KeyError::Config("KMS_KEY_NAME is required".into()))?;

        let provider = match get("KMS_PROVIDER").as_deref() {
            None | Some("http") => KmsProvider::Http,
            Some("local") => KmsProvider::Local,
            Some(other) => {
                return Err(KeyError::Config(format!(
                    "unknown KMS_PROVIDER {other:?} (expected \"http\" or \"local\")"
                )))
            }
        };

        let otel_enabled = get("OTEL_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let sampling_rate = match get("OTEL_SAMPLING_RATE") {
            Some(raw) => {
                let rate: f64 = raw
                    .parse()
                    .map_err(|e| KeyError::Config(format!("parsing OTEL_SAMPLING_RATE: {e}")))?;
                if !(0.0..=1.0).contains(&rate) {
                    return Err(KeyError::Config(format!(
                        "OTEL_SAMPLING_RATE must be within [0, 1], got {rate}"
                    )));
                }
                rate
            }
            None => 1.0,
        };

        Ok(Self {
            port,
            database_url,
            kms: KmsConfig {
                provider,
                key_name,
                endpoint: get("KMS_ENDPOINT").unwrap_or_else(|| DEFAULT_KMS_ENDPOINT.into()),
                access_token: get("KMS_ACCESS_TOKEN"),
                local_kek: get("KMS_LOCAL_KEK"),
            },
            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.into()),
            otel: OtelConfig {
                enabled: otel_enabled,
                endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
                service_name: get("OTEL_SERVICE_NAME")
                    .unwrap_or_else(|| DEFAULT_OTEL_SERVICE_NAME.into()),
                sampling_rate,
            },
            migrations_dir: PathBuf::from(
                get("MIGRATIONS_DIR").unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.into()),
            ),
            audit_log_file: get("AUDIT_LOG_FILE").map(PathBuf::from),
        })
    }
}
