// NOTE: async-stripe is compiled with a minimal feature set (runtime-tokio-hyper,
// checkout, billing). Touching APIs outside those features will require updating
// Cargo.toml explicitly so we keep compile times and binary size in check.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StripeGatewayError {
    #[error("card error: {0}")]
    Card(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("stripe api error: {0}")]
    Api(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("webhook verification failed: {0}")]
    Webhook(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<stripe::StripeError> for StripeGatewayError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(req) => {
                let msg = req
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("http status {}", req.http_status));
                match req.http_status {
                    402 => StripeGatewayError::Card(msg),
                    429 => StripeGatewayError::RateLimit(msg),
                    400 | 404 => StripeGatewayError::InvalidRequest(msg),
                    401 | 403 => StripeGatewayError::Authentication(msg),
                    _ => StripeGatewayError::Api(msg),
                }
            }
            stripe::StripeError::ClientError(msg) => StripeGatewayError::Connection(msg),
            stripe::StripeError::Timeout => {
                StripeGatewayError::Connection("timeout communicating with stripe".into())
            }
            other => StripeGatewayError::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    pub price: String,
    pub quantity: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateCheckoutSessionRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub mode: CheckoutMode,
    pub line_items: Vec<CheckoutLineItem>,
    pub customer: Option<String>,
    pub client_reference_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Extra metadata copied onto the subscription object itself so that
    /// subscription lifecycle events also carry the purchase context.
    pub subscription_metadata: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub id: String,
    pub email: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub status: String,
    pub cancel_at_period_end: bool,
    /// Unix timestamp (seconds) when the current period ends
    pub current_period_end: i64,
}

/// A verified inbound notification from the billing provider. The payload is
/// kept as raw JSON; handlers pull out the few fields they need.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    pub r#type: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, StripeGatewayError>;

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CustomerInfo>, StripeGatewayError>;

    async fn create_customer(
        &self,
        email: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> Result<CustomerInfo, StripeGatewayError>;

    async fn update_customer_metadata(
        &self,
        customer_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CustomerInfo, StripeGatewayError>;

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        new_price_id: &str,
        metadata: BTreeMap<String, String>,
        idempotency_key: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError>;

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
        idempotency_key: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError>;

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeGatewayError>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<PaymentEvent, StripeGatewayError>;
}

mod live;
mod mock;
pub mod signature;

pub use live::LiveStripeGateway;
#[allow(unused_imports)]
pub use mock::MockStripeGateway;
