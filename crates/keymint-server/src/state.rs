//! Shared application state.

use keymint_engine::{KeyService, OtelConfig};

use crate::audit::AuditLogger;

pub struct AppState {
    pub service: KeyService,
    pub audit: AuditLogger,
    pub otel: OtelConfig,
}

impl AppState {
    pub fn new(service: KeyService, audit: AuditLogger, otel: OtelConfig) -> Self {
        Self {
            service,
            audit,
            otel,
        }
    }
}
