pub mod keys;
pub mod migrate;

use std::time::Duration;

use clap::ValueEnum;
use thiserror::Error;

/// Output rendering for every subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Machine-parseable JSON.
    Json,
}

/// CLI failure modes, each mapped to a distinct process exit code.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("API request failed: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{message}")]
    Api { code: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Transport(_) => 3,
            Self::Auth(_) => 4,
            Self::Api { .. } | Self::Other(_) => 1,
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        Self::Other(format!("{e:#}"))
    }
}

impl From<keymint_core::KeyError> for CliError {
    fn from(e: keymint_core::KeyError) -> Self {
        Self::Other(e.to_string())
    }
}

/// Parse a human duration: plain seconds (`30`), or a value with an
/// `ms`/`s`/`m`/`h` suffix (`500ms`, `30s`, `5m`, `1h`).
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit): (&str, &str) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!(
            "invalid duration {raw:?} (expected e.g. 500ms, 30s, 5m, 1h)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_and_without_units() {
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn bad_durations_are_rejected() {
        for raw in ["", "s", "-5s", "10x", "1.5s"] {
            assert!(parse_duration(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn exit_codes_follow_the_contract() {
        assert_eq!(CliError::Usage("missing flag".into()).exit_code(), 2);
        assert_eq!(CliError::Transport("refused".into()).exit_code(), 3);
        assert_eq!(CliError::Auth("401".into()).exit_code(), 4);
        assert_eq!(
            CliError::Api {
                code: "KEY_NOT_FOUND".into(),
                message: "key not found".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(CliError::Other("boom".into()).exit_code(), 1);
    }
}
