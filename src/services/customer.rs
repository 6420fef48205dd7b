use std::collections::BTreeMap;

use tracing::info;

use super::stripe::{CustomerInfo, StripeGateway, StripeGatewayError};

/// Finds the billing customer for `email`, creating one when none exists.
/// Exactly one customer per user: an existing record whose `user_id`
/// metadata is missing or stale is reconciled in place rather than
/// duplicated.
pub async fn resolve_customer(
    gateway: &dyn StripeGateway,
    email: &str,
    user_id: &str,
) -> Result<CustomerInfo, StripeGatewayError> {
    if let Some(existing) = gateway.find_customer_by_email(email).await? {
        if existing.metadata.get("user_id").map(String::as_str) == Some(user_id) {
            return Ok(existing);
        }

        info!(
            customer_id = %existing.id,
            "reconciling user_id metadata on existing customer"
        );
        let mut metadata = existing.metadata.clone();
        metadata.insert("user_id".to_string(), user_id.to_string());
        return gateway.update_customer_metadata(&existing.id, metadata).await;
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("user_id".to_string(), user_id.to_string());
    gateway.create_customer(Some(email), metadata).await
}
