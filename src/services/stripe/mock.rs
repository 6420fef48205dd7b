use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CheckoutSession, CreateCheckoutSessionRequest, CustomerInfo, PaymentEvent, StripeGateway,
    StripeGatewayError, SubscriptionInfo,
};

/// Test double that records every call and returns canned data. Error
/// injection is one-shot: the next matching call fails, then the mock
/// goes back to succeeding.
#[derive(Default)]
pub struct MockStripeGateway {
    pub checkout_calls: Mutex<Vec<(CreateCheckoutSessionRequest, String)>>,
    pub customer_lookups: Mutex<Vec<String>>,
    pub created_customers: Mutex<Vec<CustomerInfo>>,
    pub metadata_updates: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    pub subscription_updates: Mutex<Vec<(String, String, String)>>,
    pub cancel_calls: Mutex<Vec<(String, bool, String)>>,
    pub portal_calls: Mutex<Vec<(String, String)>>,

    pub seeded_customers: Mutex<Vec<CustomerInfo>>,
    pub checkout_error: Mutex<Option<StripeGatewayError>>,
    pub subscription_error: Mutex<Option<StripeGatewayError>>,
    pub reject_webhooks: Mutex<bool>,

    counter: AtomicUsize,
}

impl MockStripeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_customer(&self, customer: CustomerInfo) {
        self.seeded_customers.lock().unwrap().push(customer);
    }

    pub fn fail_next_checkout(&self, err: StripeGatewayError) {
        *self.checkout_error.lock().unwrap() = Some(err);
    }

    pub fn fail_next_subscription_call(&self, err: StripeGatewayError) {
        *self.subscription_error.lock().unwrap() = Some(err);
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}_mock_{}", prefix, n)
    }
}

#[async_trait]
impl StripeGateway for MockStripeGateway {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, StripeGatewayError> {
        self.checkout_calls
            .lock()
            .unwrap()
            .push((req, idempotency_key.to_string()));

        if let Some(err) = self.checkout_error.lock().unwrap().take() {
            return Err(err);
        }

        let id = self.next_id("cs");
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.stripe.test/pay/{}", id)),
            id,
        })
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CustomerInfo>, StripeGatewayError> {
        self.customer_lookups.lock().unwrap().push(email.to_string());
        let found = self
            .seeded_customers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned();
        Ok(found)
    }

    async fn create_customer(
        &self,
        email: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> Result<CustomerInfo, StripeGatewayError> {
        let customer = CustomerInfo {
            id: self.next_id("cus"),
            email: email.map(str::to_string),
            metadata,
        };
        self.created_customers.lock().unwrap().push(customer.clone());
        self.seeded_customers.lock().unwrap().push(customer.clone());
        Ok(customer)
    }

    async fn update_customer_metadata(
        &self,
        customer_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CustomerInfo, StripeGatewayError> {
        self.metadata_updates
            .lock()
            .unwrap()
            .push((customer_id.to_string(), metadata.clone()));

        let mut seeded = self.seeded_customers.lock().unwrap();
        if let Some(customer) = seeded.iter_mut().find(|c| c.id == customer_id) {
            customer.metadata = metadata;
            return Ok(customer.clone());
        }
        Ok(CustomerInfo {
            id: customer_id.to_string(),
            email: None,
            metadata,
        })
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        new_price_id: &str,
        _metadata: BTreeMap<String, String>,
        idempotency_key: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        self.subscription_updates.lock().unwrap().push((
            subscription_id.to_string(),
            new_price_id.to_string(),
            idempotency_key.to_string(),
        ));

        if let Some(err) = self.subscription_error.lock().unwrap().take() {
            return Err(err);
        }

        Ok(SubscriptionInfo {
            id: subscription_id.to_string(),
            status: "active".to_string(),
            cancel_at_period_end: false,
            current_period_end: 1_700_000_000,
        })
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
        idempotency_key: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        self.cancel_calls.lock().unwrap().push((
            subscription_id.to_string(),
            cancel_at_period_end,
            idempotency_key.to_string(),
        ));

        if let Some(err) = self.subscription_error.lock().unwrap().take() {
            return Err(err);
        }

        Ok(SubscriptionInfo {
            id: subscription_id.to_string(),
            status: "active".to_string(),
            cancel_at_period_end,
            current_period_end: 1_700_000_000,
        })
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeGatewayError> {
        self.portal_calls
            .lock()
            .unwrap()
            .push((customer_id.to_string(), return_url.to_string()));
        Ok(format!(
            "https://billing.stripe.test/portal/{}",
            customer_id
        ))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        _signature_header: &str,
    ) -> Result<PaymentEvent, StripeGatewayError> {
        if *self.reject_webhooks.lock().unwrap() {
            return Err(StripeGatewayError::Webhook("signature mismatch".into()));
        }

        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeGatewayError::Serde(e.to_string()))?;
        let id = val
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("evt_mock")
            .to_string();
        let r#type = val
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StripeGatewayError::Serde("event missing type".into()))?
            .to_string();
        Ok(PaymentEvent {
            id,
            r#type,
            payload: val,
        })
    }
}
