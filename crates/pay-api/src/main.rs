//! # paypal-checkout
//!
//! PayPal checkout service: certificates and subscriptions paid through
//! PayPal Orders.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export PAYPAL_CLIENT_ID=...
//! export PAYPAL_CLIENT_SECRET=...
//! export PAYPAL_MODE=sandbox
//! export DATABASE_URL=postgres://localhost/checkout   # optional
//!
//! # Run the server
//! paypal-checkout
//! ```

use pay_api::{routes, state::AppState, sweep};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Print banner
    print_banner();

    // Initialize application state
    let state = AppState::new().await?;

    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!("Payment provider: {}", state.workflow.provider_name());
    info!("Storage: {}", state.storage_name());

    sweep::spawn_pending_sweep(state.clone());

    // Create router
    let app = routes::create_router(state);

    info!("PayPal checkout starting on http://{}", addr);

    if !is_prod {
        info!("Health: http://{}/health", addr);
        info!("Checkout: POST http://{}/checkout/start", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// `LOG_FORMAT=json` switches to structured JSON lines.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let json_layer = json.then(|| fmt::layer().json().with_current_span(true));
    let text_layer = (!json).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

fn print_banner() {
    println!(
        r#"
  PayPal Checkout
  ━━━━━━━━━━━━━━━━━━━━━━━
  Certificates & subscriptions
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
