//! # PayPal Orders v2
//!
//! Implementation of the PayPal Orders API: create an order the buyer
//! approves on PayPal, then capture it once they return.

use crate::config::PayPalConfig;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pay_core::{
    CaptureResult, GatewayLink, GatewayOrder, Money, PaymentError, PaymentGateway, PaymentResult,
    GENERIC_ERROR_MESSAGE,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// PayPal Orders gateway
///
/// Authenticates with client credentials and caches the bearer token
/// until shortly before it expires.
pub struct PayPalGateway {
    config: PayPalConfig,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

impl PayPalGateway {
    /// Create a new PayPal gateway
    pub fn new(config: PayPalConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                PaymentError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        let config = PayPalConfig::from_env()?;
        Self::new(config)
    }

    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    /// Get a bearer token, reusing the cached one while it is fresh.
    async fn access_token(&self) -> PaymentResult<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/v1/oauth2/token", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            error!("PayPal auth error: status={}, body={}", status, body);

            let message = serde_json::from_str::<PayPalAuthError>(&body)
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or_else(|| format!("HTTP {}", status));

            return Err(PaymentError::gateway(format!(
                "PayPal authentication failed: {}",
                message
            )));
        }

        let token: PayPalTokenResponse = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse PayPal token: {}", e))
        })?;

        debug!("Obtained PayPal access token, expires_in={}s", token.expires_in);

        let fresh = CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        };
        let value = fresh.value.clone();
        *cached = Some(fresh);

        Ok(value)
    }

    /// POST a JSON body with the bearer token; returns status and raw body.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> PaymentResult<(StatusCode, String)> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.api_base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        Ok((status, text))
    }

    fn order_request(&self, amount: &Money, return_url: &str, cancel_url: &str) -> OrderRequest {
        OrderRequest {
            intent: "CAPTURE",
            application_context: ApplicationContext {
                return_url: return_url.to_string(),
                cancel_url: cancel_url.to_string(),
            },
            purchase_units: vec![PurchaseUnit {
                amount: PayPalAmount {
                    currency_code: amount.currency.as_str().to_string(),
                    value: amount.to_gateway_value(),
                },
            }],
        }
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip(self, amount), fields(amount = %amount.to_gateway_value(), currency = %amount.currency))]
    async fn create_order(
        &self,
        amount: &Money,
        return_url: &str,
        cancel_url: &str,
    ) -> PaymentResult<GatewayOrder> {
        let request = self.order_request(amount, return_url, cancel_url);

        debug!("Creating PayPal order");

        let (status, body) = self.post_json("/v2/checkout/orders", &request).await?;

        if !status.is_success() {
            error!("PayPal API error: status={}, body={}", status, body);
            return Err(PaymentError::gateway(error_message(&body)));
        }

        let order: PayPalOrderResponse = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse PayPal response: {}", e))
        })?;

        let id = match order.id {
            Some(id) if !id.is_empty() => id,
            _ => {
                warn!("PayPal order response carried no id");
                return Err(PaymentError::gateway(
                    order
                        .message
                        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
                ));
            }
        };

        info!("Created PayPal order: id={}", id);

        Ok(GatewayOrder {
            id,
            status: order.status,
            links: order
                .links
                .into_iter()
                .map(|link| GatewayLink {
                    rel: link.rel,
                    href: link.href,
                    method: link.method,
                })
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn capture_order(&self, token: &str) -> PaymentResult<CaptureResult> {
        let path = format!("/v2/checkout/orders/{}/capture", token);

        let (status, body) = self.post_json(&path, &serde_json::json!({})).await?;

        if status.is_server_error() {
            error!("PayPal capture error: status={}, body={}", status, body);
            return Err(PaymentError::gateway(error_message(&body)));
        }

        if !status.is_success() {
            // Declines and unprocessable orders come back as 4xx; the
            // buyer sees PayPal's message instead of a hard failure.
            let refusal = serde_json::from_str::<PayPalErrorResponse>(&body).ok();

            if refusal.as_ref().is_some_and(PayPalErrorResponse::is_already_captured) {
                info!("PayPal order already captured: token={}", token);
                return Ok(CaptureResult::already_captured());
            }

            warn!("PayPal refused capture: status={}, body={}", status, body);

            let name = refusal
                .as_ref()
                .and_then(|e| e.name.clone())
                .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));

            let mut result = CaptureResult::new(name);
            result.message = refusal.and_then(|e| e.message);
            return Ok(result);
        }

        let capture: PayPalCaptureResponse = serde_json::from_str(&body).map_err(|e| {
            PaymentError::Serialization(format!("Failed to parse PayPal capture: {}", e))
        })?;

        let status = capture.status.unwrap_or_default();
        info!("PayPal capture finished: token={}, status={}", token, status);

        let mut result = CaptureResult::new(status);
        result.message = capture.message;
        Ok(result)
    }

    fn provider_name(&self) -> &'static str {
        "paypal"
    }
}

/// Issue PayPal reports when capturing an order a second time
const ORDER_ALREADY_CAPTURED: &str = "ORDER_ALREADY_CAPTURED";

/// Best message PayPal gave us for a failed call.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<PayPalErrorResponse>(body) {
        Ok(err) => err
            .details
            .into_iter()
            .find_map(|d| d.description)
            .or(err.message)
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
        Err(_) => GENERIC_ERROR_MESSAGE.to_string(),
    }
}

// =============================================================================
// PayPal API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct OrderRequest {
    intent: &'static str,
    application_context: ApplicationContext,
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Serialize)]
struct ApplicationContext {
    return_url: String,
    cancel_url: String,
}

#[derive(Debug, Serialize)]
struct PurchaseUnit {
    amount: PayPalAmount,
}

#[derive(Debug, Serialize)]
struct PayPalAmount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayPalTokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    300
}

#[derive(Debug, Deserialize)]
struct PayPalAuthError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayPalOrderResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    links: Vec<PayPalLink>,
}

#[derive(Debug, Deserialize)]
struct PayPalLink {
    href: String,
    rel: String,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayPalCaptureResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayPalErrorResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<PayPalErrorDetail>,
}

impl PayPalErrorResponse {
    fn is_already_captured(&self) -> bool {
        self.details
            .iter()
            .any(|d| d.issue.as_deref() == Some(ORDER_ALREADY_CAPTURED))
    }
}

#[derive(Debug, Deserialize)]
struct PayPalErrorDetail {
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    description: Option<String>,
}
