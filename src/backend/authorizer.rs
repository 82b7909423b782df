//! Backend authorization client.
//!
//! The backend must co-sign swap-based payment intents. The orchestrator
//! polls [`AuthorizationClient::authorize`] until it gets a grant, a denial,
//! or runs out of polling budget.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::intent::PaymentIntent;

pub type AuthorizationResult<T> = Result<T, AuthorizationError>;

/// Errors from the authorization service.
#[derive(Debug, Clone, Error)]
pub enum AuthorizationError {
    #[error("authorization request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("authorization denied: {reason}")]
    Denied { reason: String },

    #[error("authorization service returned a malformed response: {message}")]
    Malformed { message: String },
}

impl AuthorizationError {
    pub fn user_message(&self) -> String {
        match self {
            AuthorizationError::Request { .. } => {
                "Could not reach the payment service. Please try again".to_string()
            }
            AuthorizationError::Denied { reason } => {
                format!("The payment was not authorized: {}", reason)
            }
            AuthorizationError::Malformed { .. } => {
                "The payment service returned an unexpected response".to_string()
            }
        }
    }
}

/// Outcome of one authorization poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// Intent co-signed; the signature goes into the submission call.
    Granted { signature: String },
    /// Still being processed; poll again.
    Pending,
}

/// Authorization boundary, polled by the orchestrator.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    async fn authorize(&self, intent: &PaymentIntent)
        -> AuthorizationResult<AuthorizationOutcome>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpAuthorizerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HttpAuthorizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_secs: 15,
        }
    }
}

impl HttpAuthorizerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("AUTHORIZER_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("AUTHORIZER_API_KEY").ok(),
            timeout_secs: std::env::var("AUTHORIZER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    status: String,
    signature: Option<String>,
    reason: Option<String>,
}

/// JSON-over-HTTP authorization client.
pub struct HttpAuthorizationClient {
    config: HttpAuthorizerConfig,
    http: reqwest::Client,
}

impl HttpAuthorizationClient {
    pub fn new(config: HttpAuthorizerConfig) -> AuthorizationResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AuthorizationError::Request {
                message: format!("failed to build http client: {}", e),
                retryable: false,
            })?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl AuthorizationClient for HttpAuthorizationClient {
    async fn authorize(
        &self,
        intent: &PaymentIntent,
    ) -> AuthorizationResult<AuthorizationOutcome> {
        let url = format!("{}/v1/payment-intents/authorize", self.config.base_url);

        let mut request = self.http.post(&url).json(intent);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| AuthorizationError::Request {
            message: e.to_string(),
            retryable: e.is_timeout() || e.is_connect(),
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthorizationError::Request {
                message: format!("authorization service returned {}", status),
                retryable: true,
            });
        }
        if !status.is_success() {
            return Err(AuthorizationError::Request {
                message: format!("authorization service returned {}", status),
                retryable: false,
            });
        }

        let body: AuthorizeResponse =
            response
                .json()
                .await
                .map_err(|e| AuthorizationError::Malformed {
                    message: e.to_string(),
                })?;

        match body.status.as_str() {
            "granted" => {
                let signature = body.signature.ok_or_else(|| AuthorizationError::Malformed {
                    message: "granted response without a signature".to_string(),
                })?;
                info!(intent_id = %intent.intent_id, "authorization granted");
                Ok(AuthorizationOutcome::Granted { signature })
            }
            "pending" => Ok(AuthorizationOutcome::Pending),
            "denied" => Err(AuthorizationError::Denied {
                reason: body.reason.unwrap_or_else(|| "no reason given".to_string()),
            }),
            other => Err(AuthorizationError::Malformed {
                message: format!("unknown authorization status '{}'", other),
            }),
        }
    }
}
