pub mod audit;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod validation;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use keymint_core::{KeyError, KeyResult, KmsClient};
use keymint_engine::{KeyService, KmsProvider, ServiceConfig};
use keymint_storage::{HttpKmsClient, LocalKmsClient, PgKeyStore};

use crate::audit::AuditLogger;
use crate::state::AppState;

/// Install the global tracing subscriber: JSON output, `RUST_LOG` taking
/// precedence over the configured `LOG_LEVEL`.
pub fn init_tracing(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();

    if config.otel.enabled {
        tracing::info!(
            service_name = %config.otel.service_name,
            endpoint = config.otel.endpoint.as_deref(),
            sampling_rate = config.otel.sampling_rate,
            "trace context propagation enabled"
        );
    }
}

fn default_directive(log_level: &str) -> &'static str {
    match log_level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARN" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}

/// Build the KMS backend named by the configuration. Either backend is bound
/// to the configured KEK resource name for its whole lifetime.
pub fn build_kms_client(config: &ServiceConfig) -> KeyResult<Arc<dyn KmsClient>> {
    match config.kms.provider {
        KmsProvider::Http => Ok(Arc::new(HttpKmsClient::new(
            &config.kms.key_name,
            &config.kms.endpoint,
            config.kms.access_token.clone(),
        )?)),
        KmsProvider::Local => {
            let kek = config.kms.local_kek.as_deref().ok_or_else(|| {
                KeyError::Config("KMS_LOCAL_KEK is required when KMS_PROVIDER=local".into())
            })?;
            Ok(Arc::new(LocalKmsClient::from_base64_kek(
                &config.kms.key_name,
                kek,
            )?))
        }
    }
}

/// Wire the pool, stores, KMS client, and router, then serve until SIGINT or
/// SIGTERM. Every request completes or aborts before shutdown finishes; no
/// background work outlives its originating request.
pub async fn run(config: ServiceConfig) -> KeyResult<()> {
    let pool = keymint_storage::connect(&config.database_url).await?;
    let kms = build_kms_client(&config)?;
    let store = Arc::new(PgKeyStore::new(pool.clone()));
    let service = KeyService::new(store, kms);

    let audit = match &config.audit_log_file {
        Some(path) => AuditLogger::with_file(path),
        None => AuditLogger::new(),
    };

    let state = Arc::new(AppState::new(service, audit, config.otel.clone()));
    let router = rest::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| KeyError::Config(format!("binding {addr}: {e}")))?;
    tracing::info!(addr = %addr, "server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| KeyError::Config(format!("serving: {e}")))?;

    pool.close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_maps_to_filter_directive() {
        assert_eq!(default_directive("DEBUG"), "debug");
        assert_eq!(default_directive("debug"), "debug");
        assert_eq!(default_directive("WARN"), "warn");
        assert_eq!(default_directive("ERROR"), "error");
        assert_eq!(default_directive("INFO"), "info");
        assert_eq!(default_directive("bogus"), "info");
    }
}
