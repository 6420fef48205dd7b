use std::collections::BTreeMap;

use async_trait::async_trait;
use stripe::RequestStrategy;

use super::{
    signature, CheckoutLineItem, CheckoutMode, CheckoutSession, CreateCheckoutSessionRequest,
    CustomerInfo, PaymentEvent, StripeGateway, StripeGatewayError, SubscriptionInfo,
};

pub struct LiveStripeGateway {
    client: stripe::Client,
    webhook_secret: String,
}

impl LiveStripeGateway {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        let client = stripe::Client::new(secret_key);
        Self {
            client,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn from_settings(settings: &crate::config::StripeSettings) -> Self {
        Self::new(settings.secret_key.clone(), settings.webhook_secret.clone())
    }

    fn idempotent_client(&self, key: &str) -> stripe::Client {
        self.client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(key.to_string()))
    }
}

fn map_mode(mode: CheckoutMode) -> stripe::CheckoutSessionMode {
    match mode {
        CheckoutMode::Payment => stripe::CheckoutSessionMode::Payment,
        CheckoutMode::Subscription => stripe::CheckoutSessionMode::Subscription,
    }
}

fn map_line_items(items: &[CheckoutLineItem]) -> Vec<stripe::CreateCheckoutSessionLineItems> {
    items
        .iter()
        .map(|li| stripe::CreateCheckoutSessionLineItems {
            price: Some(li.price.clone()),
            quantity: Some(li.quantity),
            ..Default::default()
        })
        .collect()
}

fn to_metadata(meta: &BTreeMap<String, String>) -> stripe::Metadata {
    meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn to_customer_info(customer: stripe::Customer) -> CustomerInfo {
    CustomerInfo {
        id: customer.id.to_string(),
        email: customer.email.clone(),
        metadata: customer
            .metadata
            .unwrap_or_default()
            .into_iter()
            .collect(),
    }
}

fn to_subscription_info(sub: stripe::Subscription) -> SubscriptionInfo {
    SubscriptionInfo {
        id: sub.id.to_string(),
        status: sub.status.to_string(),
        cancel_at_period_end: sub.cancel_at_period_end,
        current_period_end: sub.current_period_end,
    }
}

#[async_trait]
impl StripeGateway for LiveStripeGateway {
    async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, StripeGatewayError> {
        let client = self.idempotent_client(idempotency_key);

        let mut params = stripe::CreateCheckoutSession::new();
        params.mode = Some(map_mode(req.mode));
        params.payment_method_types =
            Some(vec![stripe::CreateCheckoutSessionPaymentMethodTypes::Card]);
        params.success_url = Some(&req.success_url);
        params.cancel_url = Some(&req.cancel_url);
        if let Some(ref id) = req.client_reference_id {
            params.client_reference_id = Some(id);
        }
        if let Some(ref customer) = req.customer {
            let cid = customer
                .parse::<stripe::CustomerId>()
                .map_err(|e| StripeGatewayError::Other(e.to_string()))?;
            params.customer = Some(cid);
        }
        params.metadata = Some(to_metadata(&req.metadata));
        if let Some(ref sub_meta) = req.subscription_metadata {
            params.subscription_data = Some(stripe::CreateCheckoutSessionSubscriptionData {
                metadata: Some(to_metadata(sub_meta)),
                ..Default::default()
            });
        }
        if !req.line_items.is_empty() {
            params.line_items = Some(map_line_items(&req.line_items));
        }

        let session = stripe::CheckoutSession::create(&client, params).await?;
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url: session.url.clone(),
        })
    }

    async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<CustomerInfo>, StripeGatewayError> {
        let mut params = stripe::ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);
        let customers = stripe::Customer::list(&self.client, &params).await?;
        Ok(customers.data.into_iter().next().map(to_customer_info))
    }

    async fn create_customer(
        &self,
        email: Option<&str>,
        metadata: BTreeMap<String, String>,
    ) -> Result<CustomerInfo, StripeGatewayError> {
        let mut params = stripe::CreateCustomer::new();
        params.email = email;
        params.metadata = Some(to_metadata(&metadata));
        let customer = stripe::Customer::create(&self.client, params).await?;
        Ok(to_customer_info(customer))
    }

    async fn update_customer_metadata(
        &self,
        customer_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CustomerInfo, StripeGatewayError> {
        let cid = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeGatewayError::Other(e.to_string()))?;
        let mut params = stripe::UpdateCustomer::new();
        params.metadata = Some(to_metadata(&metadata));
        let customer = stripe::Customer::update(&self.client, &cid, params).await?;
        Ok(to_customer_info(customer))
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        new_price_id: &str,
        metadata: BTreeMap<String, String>,
        idempotency_key: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeGatewayError::Other(e.to_string()))?;

        // The current item id is needed to swap the price in place.
        let current = stripe::Subscription::retrieve(&self.client, &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| {
                StripeGatewayError::InvalidRequest("subscription has no items".into())
            })?;

        let client = self.idempotent_client(idempotency_key);
        let mut params = stripe::UpdateSubscription::new();
        params.items = Some(vec![stripe::UpdateSubscriptionItems {
            id: Some(item_id),
            price: Some(new_price_id.to_string()),
            ..Default::default()
        }]);
        params.metadata = Some(to_metadata(&metadata));
        params.proration_behavior = Some(stripe::generated::billing::subscription::SubscriptionProrationBehavior::CreateProrations);
        let sub = stripe::Subscription::update(&client, &sub_id, params).await?;
        Ok(to_subscription_info(sub))
    }

    async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
        idempotency_key: &str,
    ) -> Result<SubscriptionInfo, StripeGatewayError> {
        let sub_id = subscription_id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| StripeGatewayError::Other(e.to_string()))?;
        let client = self.idempotent_client(idempotency_key);
        let mut params = stripe::UpdateSubscription::new();
        params.cancel_at_period_end = Some(cancel_at_period_end);
        let sub = stripe::Subscription::update(&client, &sub_id, params).await?;
        Ok(to_subscription_info(sub))
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeGatewayError> {
        let cid = customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| StripeGatewayError::Other(e.to_string()))?;
        let mut params = stripe::CreateBillingPortalSession::new(cid);
        params.return_url = Some(return_url);
        let session = stripe::BillingPortalSession::create(&self.client, params).await?;
        Ok(session.url)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<PaymentEvent, StripeGatewayError> {
        signature::verify(payload, signature_header, &self.webhook_secret)
            .map_err(|e| StripeGatewayError::Webhook(e.to_string()))?;

        let val: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| StripeGatewayError::Serde(e.to_string()))?;
        let id = val
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StripeGatewayError::Serde("event missing id".into()))?
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
