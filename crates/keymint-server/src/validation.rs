//! Path-parameter validation. Rejections never reach the service layer.

use keymint_core::{KeyError, KeyResult};

const MAX_TENANT_ID_LEN: usize = 64;

/// Tenant ids are 1–64 chars from `[A-Za-z0-9_-]`.
pub fn validate_tenant_id(tenant_id: &str) -> KeyResult<()> {
    if tenant_id.is_empty() || tenant_id.len() > MAX_TENANT_ID_LEN {
        return Err(KeyError::InvalidTenantId(tenant_id.to_string()));
    }
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(KeyError::InvalidTenantId(tenant_id.to_string()));
    }
    Ok(())
}

/// Generations are unsigned integers ≥ 1.
pub fn parse_generation(raw: &str) -> KeyResult<i64> {
    match raw.parse::<u32>() {
        Ok(generation) if generation >= 1 => Ok(i64::from(generation)),
        _ => Err(KeyError::InvalidGeneration(raw.to_string())),
    }
}
