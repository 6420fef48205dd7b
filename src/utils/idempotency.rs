use sha2::{Digest, Sha256};

use crate::models::checkout::PurchaseKind;

/// Width of the time bucket folded into checkout idempotency keys. A retried
/// request within the same bucket reuses the key and therefore the same
/// provider-side session; a later retry gets a fresh one.
pub const BUCKET_SECONDS: i64 = 600;

fn prefix(kind: PurchaseKind) -> &'static str {
    match kind {
        PurchaseKind::Subscription => "checkout",
        PurchaseKind::CreditPurchase => "credits",
    }
}

/// Deterministic idempotency key for checkout-session creation: a pure
/// function of (user, product, kind, time bucket).
pub fn checkout_key(user_id: &str, product_id: &str, kind: PurchaseKind, unix_ts: i64) -> String {
    let bucket = unix_ts.div_euclid(BUCKET_SECONDS);
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", user_id, product_id, kind.as_str(), bucket).as_bytes());
    format!("{}_{}", prefix(kind), hex::encode(hasher.finalize()))
}

/// Key for subscription management calls (cancel, resume, price change).
pub fn subscription_key(op: &str, subscription_id: &str, detail: &str, unix_ts: i64) -> String {
    let bucket = unix_ts.div_euclid(BUCKET_SECONDS);
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:{}", op, subscription_id, detail, bucket).as_bytes());
    format!("{}_{}", op, hex::encode(hasher.finalize()))
}
