//! Inference node Lightning invoices
//!
//! REST client for the node endpoints that sell API-key balance for
//! Lightning: create an invoice (new key or top-up), poll its status, and
//! recover a key from a paid invoice.

use serde::{Deserialize, Serialize};

use crate::stores::cashu::errors::CashuWalletError;
use crate::utils::time::with_timeout;

/// Default timeout for node requests, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoicePurpose {
    /// Pay for a fresh API key
    Create,
    /// Add balance to an existing key
    Topup,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateInvoiceRequest {
    pub amount_sats: u64,
    pub purpose: InvoicePurpose,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_limit_reset: Option<String>,
    /// Unix time after which the key stops working
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_date: Option<u64>,
}

impl CreateInvoiceRequest {
    pub fn create(amount_sats: u64) -> Self {
        Self {
            amount_sats,
            purpose: InvoicePurpose::Create,
            api_key: None,
            balance_limit: None,
            balance_limit_reset: None,
            validity_date: None,
        }
    }

    pub fn topup(amount_sats: u64, api_key: impl Into<String>) -> Self {
        Self {
            purpose: InvoicePurpose::Topup,
            api_key: Some(api_key.into()),
            ..Self::create(amount_sats)
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeInvoice {
    pub invoice_id: String,
    pub bolt11: String,
    pub amount_sats: u64,
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub payment_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeInvoiceState {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl NodeInvoiceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeInvoiceStatus {
    pub status: NodeInvoiceState,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub amount_sats: Option<u64>,
    #[serde(default)]
    pub paid_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
struct RecoverRequest<'a> {
    bolt11: &'a str,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RecoveredKey {
    pub api_key: String,
    #[serde(default)]
    pub balance: Option<u64>,
}

// =============================================================================
// Errors
// =============================================================================

/// Error type for node invoice operations
#[derive(Debug)]
pub enum NodeInvoiceError {
    InvalidUrl(String),
    InvalidAmount,
    FetchError(String),
    Timeout,
    Status { code: u16, message: String },
    ParseError(String),
}

impl std::fmt::Display for NodeInvoiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NodeInvoiceError::InvalidUrl(e) => write!(f, "Invalid node URL: {}", e),
            NodeInvoiceError::InvalidAmount => write!(f, "Invoice amount must be positive"),
            NodeInvoiceError::FetchError(e) => write!(f, "Fetch error: {}", e),
            NodeInvoiceError::Timeout => write!(f, "Node did not respond in time"),
            NodeInvoiceError::Status { code, message } => write!(f, "Node returned {}: {}", code, message),
            NodeInvoiceError::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for NodeInvoiceError {}

impl From<NodeInvoiceError> for CashuWalletError {
    fn from(err: NodeInvoiceError) -> Self {
        match err {
            NodeInvoiceError::InvalidUrl(url) => CashuWalletError::InvalidMintUrl { url },
            NodeInvoiceError::InvalidAmount => CashuWalletError::InvalidAmount {
                reason: err.to_string(),
            },
            NodeInvoiceError::Timeout => CashuWalletError::Timeout(err.to_string()),
            other => CashuWalletError::Network(other.to_string()),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

#[derive(Clone)]
pub struct NodeInvoiceClient {
    base_url: String,
    http: reqwest::Client,
    timeout_secs: u64,
}

impl NodeInvoiceClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, NodeInvoiceError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let parsed = url::Url::parse(trimmed).map_err(|e| NodeInvoiceError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NodeInvoiceError::InvalidUrl(trimmed.to_string()));
        }

        Ok(Self {
            base_url: trimmed.to_string(),
            http: reqwest::Client::new(),
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, NodeInvoiceError> {
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| NodeInvoiceError::FetchError(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(NodeInvoiceError::Status {
                    code: status.as_u16(),
                    message: error_detail(&message),
                });
            }

            response
                .json::<T>()
                .await
                .map_err(|e| NodeInvoiceError::ParseError(e.to_string()))
        };

        with_timeout(self.timeout_secs, exchange)
            .await
            .unwrap_or(Err(NodeInvoiceError::Timeout))
    }

    /// POST /v1/balance/lightning/invoice
    pub async fn create_invoice(
        &self,
        request: &CreateInvoiceRequest,
    ) -> Result<NodeInvoice, NodeInvoiceError> {
        if request.amount_sats == 0 {
            return Err(NodeInvoiceError::InvalidAmount);
        }
        log::info!(
            "Requesting {:?} invoice for {} sats from {}",
            request.purpose,
            request.amount_sats,
            self.base_url
        );
        let builder = self
            .http
            .post(self.endpoint("/v1/balance/lightning/invoice"))
            .json(request);
        self.send(builder).await
    }

    /// GET /v1/balance/lightning/invoice/{id}/status
    pub async fn invoice_status(&self, invoice_id: &str) -> Result<NodeInvoiceStatus, NodeInvoiceError> {
        let path = format!("/v1/balance/lightning/invoice/{}/status", invoice_id);
        let builder = self.http.get(self.endpoint(&path));
        self.send(builder).await
    }

    /// POST /v1/balance/lightning/recover
    pub async fn recover_from_invoice(&self, bolt11: &str) -> Result<RecoveredKey, NodeInvoiceError> {
        let builder = self
            .http
            .post(self.endpoint("/v1/balance/lightning/recover"))
            .json(&RecoverRequest { bolt11: bolt11.trim() });
        self.send(builder).await
    }
}

/// Pull `detail` out of a JSON error body, else return the body as is
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let json = serde_json::to_value(CreateInvoiceRequest::topup(2100, "sk-abc")).unwrap();
        assert_eq!(json["purpose"], "topup");
        assert_eq!(json["api_key"], "sk-abc");
        assert!(json.get("balance_limit").is_none());

        let json = serde_json::to_value(CreateInvoiceRequest::create(500)).unwrap();
        assert_eq!(json["purpose"], "create");
        assert!(json.get("api_key").is_none());
    }

    #[test]
    fn test_status_parsing() {
        let status: NodeInvoiceStatus =
            serde_json::from_str(r#"{"status":"paid","api_key":"sk-x","amount_sats":500}"#).unwrap();
        assert_eq!(status.status, NodeInvoiceState::Paid);
        assert!(status.status.is_terminal());
        assert_eq!(status.api_key.as_deref(), Some("sk-x"));

        let pending: NodeInvoiceStatus = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert!(!pending.status.is_terminal());
    }

    #[test]
    fn test_client_url_validation() {
        let client = NodeInvoiceClient::new("https://node.example.com/", 10).unwrap();
        assert_eq!(
            client.endpoint("/v1/balance/lightning/recover"),
            "https://node.example.com/v1/balance/lightning/recover"
        );
        assert!(NodeInvoiceClient::new("ftp://node.example.com", 10).is_err());
        assert!(NodeInvoiceClient::new("nonsense", 10).is_err());
    }

    #[test]
    fn test_error_detail_and_mapping() {
        assert_eq!(error_detail(r#"{"detail":"Invoice not found"}"#), "Invoice not found");
        assert_eq!(error_detail("bad gateway "), "bad gateway");

        let err: CashuWalletError = NodeInvoiceError::Timeout.into();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_before_network() {
        let client = NodeInvoiceClient::new("https://node.invalid", 1).unwrap();
        assert!(matches!(
            client.create_invoice(&CreateInvoiceRequest::create(0)).await,
            Err(NodeInvoiceError::InvalidAmount)
        ));
    }
}
