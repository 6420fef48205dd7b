use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::credits::PlanTier;

/// What a checkout session is buying. Recorded in session metadata so the
/// webhook handler can tell the two flows apart, but the authoritative
/// discriminator on delivery is the session `mode` (provider-guaranteed,
/// unlike caller-supplied metadata).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    Subscription,
    CreditPurchase,
}

impl PurchaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseKind::Subscription => "subscription",
            PurchaseKind::CreditPurchase => "credit_purchase",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    HalfYear,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::HalfYear => "half_year",
            BillingPeriod::Yearly => "yearly",
        }
    }
}

/// Ephemeral description of a purchase, alive only for the duration of
/// session creation. Everything the webhook handler will later need must end
/// up in [`CheckoutIntent::metadata`]; the handler runs with no other
/// context.
#[derive(Clone, Debug)]
pub struct CheckoutIntent {
    pub kind: PurchaseKind,
    pub user_id: String,
    /// Stripe price id for the line item.
    pub price_id: String,
    /// Plan id for subscriptions, package id for credit purchases.
    pub product_id: String,
    pub billing_period: Option<BillingPeriod>,
    pub customer_email: Option<String>,
    pub plan_tier: Option<PlanTier>,
}

impl CheckoutIntent {
    /// The metadata bag echoed back on webhook delivery. Invariant: this must
    /// fully reconstruct the intended internal effect without a secondary
    /// lookup.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut meta = BTreeMap::new();
        meta.insert("user_id".to_string(), self.user_id.clone());
        meta.insert("kind".to_string(), self.kind.as_str().to_string());
        meta.insert("price_id".to_string(), self.price_id.clone());
        match self.kind {
            PurchaseKind::Subscription => {
                meta.insert("plan_id".to_string(), self.product_id.clone());
            }
            PurchaseKind::CreditPurchase => {
                meta.insert("package_id".to_string(), self.product_id.clone());
            }
        }
        if let Some(period) = self.billing_period {
            meta.insert("billing_period".to_string(), period.as_str().to_string());
        }
        if let Some(tier) = self.plan_tier {
            meta.insert("plan_tier".to_string(), tier.as_str().to_string());
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_metadata_round_trips_intent() {
        let intent = CheckoutIntent {
            kind: PurchaseKind::Subscription,
            user_id: "user_42".into(),
            price_id: "price_pro_monthly".into(),
            product_id: "pro".into(),
            billing_period: Some(BillingPeriod::Monthly),
            customer_email: Some("u@example.com".into()),
            plan_tier: None,
        };
        let meta = intent.metadata();
        assert_eq!(meta.get("user_id").unwrap(), "user_42");
        assert_eq!(meta.get("plan_id").unwrap(), "pro");
        assert_eq!(meta.get("kind").unwrap(), "subscription");
        assert_eq!(meta.get("billing_period").unwrap(), "monthly");
        assert_eq!(meta.get("price_id").unwrap(), "price_pro_monthly");
    }

    #[test]
    fn credit_metadata_carries_package_id() {
        let intent = CheckoutIntent {
            kind: PurchaseKind::CreditPurchase,
            user_id: "user_42".into(),
            price_id: "price_credits_500".into(),
            product_id: "500".into(),
            billing_period: None,
            customer_email: None,
            plan_tier: Some(PlanTier::Pro),
        };
        let meta = intent.metadata();
        assert_eq!(meta.get("package_id").unwrap(), "500");
        assert_eq!(meta.get("kind").unwrap(), "credit_purchase");
        assert_eq!(meta.get("plan_tier").unwrap(), "pro");
        assert!(meta.get("plan_id").is_none());
    }
}
