//! # Request Handlers
//!
//! Axum request handlers for the checkout flow.
//! Browser-facing routes answer with a 302 and leave a flash message in a
//! cookie for the next page to show.

use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use pay_core::{
    Currency, Payable, PaymentError, PendingCheckout, GENERIC_ERROR_MESSAGE, SUCCESS_MESSAGE,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Header the upstream auth layer puts the signed-in user's id in
pub const USER_ID_HEADER: &str = "x-user-id";

pub const FLASH_COOKIE: &str = "flash";

// =============================================================================
// Request/Response Types
// =============================================================================

/// Start checkout request
#[derive(Debug, Deserialize)]
pub struct StartCheckoutRequest {
    /// Amount to charge, e.g. `"49.99"`
    pub amount: Decimal,
    /// Currency (optional, defaults to the configured PayPal currency)
    #[serde(default)]
    pub currency: Option<Currency>,
    /// What is being bought
    pub payable: Payable,
    /// Application entity the payment refers to (optional)
    #[serde(default)]
    pub payable_id: Option<i64>,
}

impl StartCheckoutRequest {
    fn into_checkout(self, default_currency: Currency) -> PendingCheckout {
        let checkout = PendingCheckout::new(self.amount, self.payable)
            .with_currency(self.currency.unwrap_or(default_currency));
        match self.payable_id {
            Some(id) => checkout.with_payable_id(id),
            None => checkout,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    /// Gateway order id PayPal appends to the return URL
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
}

/// One-shot notice shown on the page the buyer is sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

// =============================================================================
// Redirect & Flash Helpers
// =============================================================================

/// 302 Found to `location`
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// The page the request came from, if it belongs to this site; home otherwise.
fn back_url(state: &AppState, headers: &HeaderMap) -> String {
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .filter(|referer| is_same_site(referer, &state.config.base_url))
        .map(str::to_string)
        .unwrap_or_else(|| state.config.home_url.clone())
}

fn is_same_site(url: &str, base_url: &str) -> bool {
    url == base_url
        || url
            .strip_prefix(base_url)
            .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
}

fn with_flash(jar: CookieJar, flash: &Flash) -> CookieJar {
    match serde_json::to_string(flash) {
        Ok(value) => jar.add(
            Cookie::build((FLASH_COOKIE, value))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax),
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode flash message");
            jar
        }
    }
}

fn read_flash(jar: &CookieJar) -> Option<Flash> {
    let cookie = jar.get(FLASH_COOKIE)?;
    match serde_json::from_str(cookie.value()) {
        Ok(flash) => Some(flash),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable flash cookie");
            None
        }
    }
}

fn redirect_with_flash(jar: CookieJar, location: &str, flash: Flash) -> (CookieJar, Response) {
    (with_flash(jar, &flash), found(location))
}

fn user_id(headers: &HeaderMap) -> Result<Uuid, (StatusCode, Json<ErrorResponse>)> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Sign in to continue", 401)),
            )
        })
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "paypal-checkout",
        "provider": state.workflow.provider_name(),
        "storage": state.storage_name(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start a checkout and send the buyer to PayPal
#[instrument(skip_all)]
pub async fn start_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    request: Result<Json<StartCheckoutRequest>, JsonRejection>,
) -> Response {
    let user_id = match user_id(&headers) {
        Ok(id) => id,
        Err(rejection) => return rejection.into_response(),
    };
    let back = back_url(&state, &headers);

    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Malformed checkout request");
            return redirect_with_flash(jar, &back, Flash::error(GENERIC_ERROR_MESSAGE))
                .into_response();
        }
    };

    let checkout = request.into_checkout(state.default_currency);

    match state.workflow.initiate(user_id, checkout).await {
        Ok(initiated) => {
            info!(
                payment_id = %initiated.record.id,
                "Redirecting buyer to approval page"
            );
            found(&initiated.approval_url)
        }
        Err(e) => {
            error!(
                error = %e,
                %user_id,
                retryable = e.is_retryable(),
                "Checkout initiation failed"
            );
            redirect_with_flash(jar, &back, Flash::error(e.user_message())).into_response()
        }
    }
}

/// PayPal return URL: capture and fulfill
#[instrument(skip_all)]
pub async fn checkout_success(
    State(state): State<AppState>,
    Query(params): Query<ReturnParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Response) {
    let token = params.token.unwrap_or_default();

    match state.workflow.confirm(&token).await {
        Ok(outcome) => {
            info!(payment_id = %outcome.record().id, "Checkout confirmed");
            redirect_with_flash(
                jar,
                &back_url(&state, &headers),
                Flash::success(SUCCESS_MESSAGE),
            )
        }
        Err(e @ PaymentError::PaymentNotCompleted { .. }) => {
            error!(error = %e, "Payment was not completed");
            redirect_with_flash(
                jar,
                &state.config.home_url,
                Flash::error(e.user_message()),
            )
        }
        Err(e) => {
            error!(
                error = %e,
                retryable = e.is_retryable(),
                "Checkout confirmation failed"
            );
            redirect_with_flash(
                jar,
                &back_url(&state, &headers),
                Flash::error(e.user_message()),
            )
        }
    }
}

/// PayPal cancel URL
pub async fn checkout_cancel(
    State(state): State<AppState>,
    Query(params): Query<ReturnParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Response) {
    let notice = state.workflow.cancel(params.token.as_deref());
    redirect_with_flash(jar, &back_url(&state, &headers), Flash::error(notice))
}

/// Return the pending flash message, if any, and clear it
pub async fn take_flash(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    let flash = read_flash(&jar);
    let jar = jar.remove(Cookie::build(FLASH_COOKIE).path("/"));
    (jar, Json(serde_json::json!({ "flash": flash })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppConfig;
    use pay_core::{
        memory::{MemoryCheckoutStore, MemoryLedger, ScriptedGateway},
        CheckoutUrls, CheckoutWorkflow,
    };
    use std::sync::Arc;

    fn state() -> AppState {
        let config = AppConfig::local("https://shop.test");
        let workflow = CheckoutWorkflow::new(
            Arc::new(ScriptedGateway::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCheckoutStore::new()),
            CheckoutUrls::new(&config.base_url),
        );
        AppState::from_parts(config, workflow)
    }

    fn referer(url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, url.parse().unwrap());
        headers
    }

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("Test error", 400);
        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_back_url_uses_same_site_referer() {
        let state = state();
        assert_eq!(
            back_url(&state, &referer("https://shop.test/challenges/7")),
            "https://shop.test/challenges/7"
        );
    }

    #[test]
    fn test_back_url_ignores_foreign_referer() {
        let state = state();
        assert_eq!(
            back_url(&state, &referer("https://shop.test.evil.example/")),
            "https://shop.test/"
        );
        assert_eq!(back_url(&state, &HeaderMap::new()), "https://shop.test/");
    }

    #[test]
    fn test_request_defaults_currency() {
        let request: StartCheckoutRequest = serde_json::from_value(serde_json::json!({
            "amount": "49.99",
            "payable": {"type": "certificate", "challenge_id": 7}
        }))
        .unwrap();

        let checkout = request.into_checkout(Currency::EUR);
        assert_eq!(checkout.currency, Currency::EUR);
        assert_eq!(checkout.amount.to_string(), "49.99");
        assert!(checkout.payable_id.is_none());
    }

    #[test]
    fn test_missing_user_header_is_unauthorized() {
        let (status, _) = user_id(&HeaderMap::new()).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_flash_cookie_round_trip() {
        let jar = with_flash(CookieJar::new(), &Flash::success(SUCCESS_MESSAGE));
        assert_eq!(read_flash(&jar), Some(Flash::success(SUCCESS_MESSAGE)));
    }
}
