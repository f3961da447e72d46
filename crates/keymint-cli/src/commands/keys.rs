//! Key subcommands, implemented as HTTP calls against a running server.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use super::{CliError, OutputFormat};

#[derive(Deserialize)]
struct KeyMetadataDto {
    generation: i64,
    status: String,
    created_at: String,
}

#[derive(Deserialize)]
struct KeyDto {
    key: String,
}

#[derive(Deserialize)]
struct KeyListDto {
    keys: Vec<KeyMetadataDto>,
}

#[derive(Deserialize)]
struct ErrorDto {
    code: Option<String>,
    message: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    output: OutputFormat,
}

impl ApiClient {
    pub fn new(base_url: String, timeout: Duration, output: OutputFormat) -> Result<Self, CliError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CliError::Other(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            output,
        })
    }

    fn keys_url(&self, tenant: &str) -> String {
        format!("{}/v1/tenants/{tenant}/keys", self.base_url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String), CliError> {
        let response = request
            .send()
            .await
            .map_err(|e| CliError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CliError::Transport(format!("reading response: {e}")))?;
        Ok((status, body))
    }

    /// Non-2xx responses become typed CLI errors; 401/403 map to the
    /// dedicated authentication exit code.
    fn fail(status: StatusCode, body: &str) -> CliError {
        let parsed: Option<ErrorDto> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("server returned status {status}"));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CliError::Auth(message),
            _ => CliError::Api {
                code: parsed
                    .and_then(|e| e.code)
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                message,
            },
        }
    }

    pub async fn create(&self, tenant: &str) -> Result<(), CliError> {
        let (status, body) = self.send(self.http.post(self.keys_url(tenant))).await?;
        if status != StatusCode::CREATED {
            return Err(Self::fail(status, &body));
        }
        match self.output {
            OutputFormat::Json => println!("{body}"),
            OutputFormat::Text => {
                let meta: KeyMetadataDto = parse_body(&body)?;
                println!("Created key for tenant {tenant:?} (generation: {})", meta.generation);
            }
        }
        Ok(())
    }

    pub async fn get(&self, tenant: &str, generation: Option<u32>) -> Result<(), CliError> {
        let url = match generation {
            Some(generation) => format!("{}/{generation}", self.keys_url(tenant)),
            None => format!("{}/current", self.keys_url(tenant)),
        };
        let (status, body) = self.send(self.http.get(url)).await?;
        if status != StatusCode::OK {
            return Err(Self::fail(status, &body));
        }
        match self.output {
            OutputFormat::Json => println!("{body}"),
            OutputFormat::Text => {
                let key: KeyDto = parse_body(&body)?;
                println!("{}", key.key);
            }
        }
        Ok(())
    }

    pub async fn rotate(&self, tenant: &str) -> Result<(), CliError> {
        let url = format!("{}/rotate", self.keys_url(tenant));
        let (status, body) = self.send(self.http.post(url)).await?;
        if status != StatusCode::CREATED {
            return Err(Self::fail(status, &body));
        }
        match self.output {
            OutputFormat::Json => println!("{body}"),
            OutputFormat::Text => {
                let meta: KeyMetadataDto = parse_body(&body)?;
                println!(
                    "Rotated key for tenant {tenant:?} (new generation: {})",
                    meta.generation
                );
            }
        }
        Ok(())
    }

    pub async fn list(&self, tenant: &str) -> Result<(), CliError> {
        let (status, body) = self.send(self.http.get(self.keys_url(tenant))).await?;
        if status != StatusCode::OK {
            return Err(Self::fail(status, &body));
        }
        match self.output {
            OutputFormat::Json => println!("{body}"),
            OutputFormat::Text => {
                let list: KeyListDto = parse_body(&body)?;
                println!("{:<12} {:<10} {}", "GENERATION", "STATUS", "CREATED_AT");
                for key in list.keys {
                    println!("{:<12} {:<10} {}", key.generation, key.status, key.created_at);
                }
            }
        }
        Ok(())
    }

    pub async fn disable(&self, tenant: &str, generation: u32) -> Result<(), CliError> {
        let url = format!("{}/{generation}", self.keys_url(tenant));
        let (status, body) = self.send(self.http.delete(url)).await?;
        if status != StatusCode::ACCEPTED {
            return Err(Self::fail(status, &body));
        }
        match self.output {
            OutputFormat::Json => println!("{{}}"),
            OutputFormat::Text => {
                println!("Disabled key for tenant {tenant:?} (generation: {generation})");
            }
        }
        Ok(())
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, CliError> {
    serde_json::from_str(body).map_err(|e| CliError::Other(format!("parsing response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base.to_string(), Duration::from_secs(5), OutputFormat::Text).unwrap()
    }

    #[test]
    fn urls_are_built_under_the_tenant_scope() {
        let api = client("http://localhost:8080/");
        assert_eq!(
            api.keys_url("tenant-001"),
            "http://localhost:8080/v1/tenants/tenant-001/keys"
        );
    }

    #[test]
    fn auth_statuses_map_to_auth_errors() {
        let err = ApiClient::fail(StatusCode::UNAUTHORIZED, "{}");
        assert!(matches!(err, CliError::Auth(_)));
        assert_eq!(err.exit_code(), 4);

        let err = ApiClient::fail(StatusCode::FORBIDDEN, "not allowed");
        assert!(matches!(err, CliError::Auth(_)));
    }

    #[test]
    fn error_bodies_surface_code_and_message() {
        let body = r#"{"code":"KEY_NOT_FOUND","message":"key not found for this tenant"}"#;
        match ApiClient::fail(StatusCode::NOT_FOUND, body) {
            CliError::Api { code, message } => {
                assert_eq!(code, "KEY_NOT_FOUND");
                assert_eq!(message, "key not found for this tenant");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unparseable_error_bodies_fall_back_to_status() {
        match ApiClient::fail(StatusCode::BAD_GATEWAY, "<html>") {
            CliError::Api { code, message } => {
                assert_eq!(code, "UNKNOWN");
                assert!(message.contains("502"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
