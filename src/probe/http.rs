//! HTTP status probe.

use serde::Serialize;
use std::time::Duration;

use super::DiagnosticError;

/// Result of a single HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HttpCheckResult {
    Status { code: u16 },
    Failed { reason: String },
}

impl HttpCheckResult {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code } => Some(*code),
            Self::Failed { .. } => None,
        }
    }
}

/// One-shot HTTP status check.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, DiagnosticError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiagnosticError::Config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    /// Issue a GET against `url_or_host` and report the status code.
    pub async fn check(&self, url_or_host: &str) -> HttpCheckResult {
        let url = normalize_url(url_or_host);
        match self.client.get(&url).send().await {
            Ok(response) => HttpCheckResult::Status {
                code: response.status().as_u16(),
            },
            Err(e) => {
                tracing::debug!("HTTP check of {} failed: {}", url, e);
                let reason = if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    e.to_string()
                };
                HttpCheckResult::Failed { reason }
            }
        }
    }
}

/// Prefix `https://` when the input carries no scheme.
pub fn normalize_url(input: &str) -> String {
    let input = input.trim();
    let has_scheme = input.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
    });
    if has_scheme {
        input.to_string()
    } else {
        format!("https://{}", input)
    }
}
