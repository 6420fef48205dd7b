use axum::Json;
use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::models::credits::find_package;
use crate::models::subscription::{
    CreditGrant, SubscriptionRecord, SubscriptionStatus, SyncStatus,
};
use crate::responses::JsonResponse;
use crate::state::AppState;

// Small helper: nested json lookup
fn jget<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn extract_str<'a>(val: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    jget(val, path)?.as_str()
}

fn extract_bool(val: &serde_json::Value, path: &[&str]) -> Option<bool> {
    jget(val, path)?.as_bool()
}

fn metadata_str<'a>(event: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    extract_str(event, &["data", "object", "metadata", key])
}

fn ack() -> Response {
    Json(serde_json::json!({ "received": true })).into_response()
}

// POST /api/stripe/webhook
//
// Signature failures are the only 400s; once an event is verified it is
// always acknowledged with 200, even when we cannot act on it. A permanent
// interpretation problem (unknown package, missing metadata) would otherwise
// be redelivered for days without ever succeeding.
pub async fn webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let sig = match headers
        .get("Stripe-Signature")
        .and_then(|h| h.to_str().ok())
    {
        Some(s) => s,
        None => return JsonResponse::bad_request("Missing Stripe-Signature").into_response(),
    };

    let evt = match app_state.stripe.verify_webhook(&body, sig) {
        Ok(e) => e,
        Err(err) => {
            warn!(?err, "stripe webhook verification failed");
            return (StatusCode::BAD_REQUEST, "invalid webhook").into_response();
        }
    };

    let evt_type = evt.r#type.as_str();
    let payload = &evt.payload;

    match evt_type {
        "checkout.session.completed" => {
            // The session mode is the authoritative discriminator between the
            // two purchase flows; metadata only fills in the details.
            match extract_str(payload, &["data", "object", "mode"]) {
                Some("payment") => handle_credit_purchase_completed(&app_state, payload).await,
                Some("subscription") => {
                    handle_subscription_checkout_completed(&app_state, payload).await
                }
                other => {
                    warn!(?other, "checkout completed with unexpected mode");
                }
            }
            ack()
        }

        "customer.subscription.updated" => {
            handle_subscription_lifecycle(&app_state, payload, None).await;
            ack()
        }

        "customer.subscription.deleted" => {
            handle_subscription_lifecycle(&app_state, payload, Some(SubscriptionStatus::Canceled))
                .await;
            ack()
        }

        "invoice.payment_failed" => {
            handle_invoice_payment_failed(&app_state, payload).await;
            ack()
        }

        // Other events acknowledged to avoid retries; primary logic handled above.
        _ => {
            info!(evt_type, "unhandled stripe event acknowledged");
            ack()
        }
    }
}

/// One-time credit purchase. The grant ledger keyed by the provider
/// transaction id makes redelivery a no-op; the grant is only recorded after
/// the consumer app confirms the credit add, so a failed forward stays
/// retryable on the next delivery.
async fn handle_credit_purchase_completed(state: &AppState, payload: &serde_json::Value) {
    let user_id = match metadata_str(payload, "user_id") {
        Some(id) => id.to_string(),
        None => {
            warn!("credit purchase completed without user_id metadata");
            return;
        }
    };
    let package_id = match metadata_str(payload, "package_id") {
        Some(id) => id.to_string(),
        None => {
            warn!(%user_id, "credit purchase completed without package_id metadata");
            return;
        }
    };
    let package = match find_package(&package_id) {
        Some(p) => p,
        None => {
            warn!(%user_id, %package_id, "credit purchase references unknown package");
            return;
        }
    };

    // Prefer the payment intent as the dedup key; it survives across
    // redeliveries of the same payment. The session id is the fallback.
    let transaction_id = extract_str(payload, &["data", "object", "payment_intent"])
        .or_else(|| extract_str(payload, &["data", "object", "id"]));
    let transaction_id = match transaction_id {
        Some(id) => id.to_string(),
        None => {
            warn!(%user_id, "credit purchase completed without a transaction id");
            return;
        }
    };

    match state.billing_repo.find_credit_grant(&transaction_id).await {
        Ok(Some(_)) => {
            info!(%user_id, %transaction_id, "duplicate credit purchase delivery ignored");
            return;
        }
        Ok(None) => {}
        Err(err) => {
            error!(?err, %transaction_id, "failed to check credit grant ledger");
            return;
        }
    }

    let forward = state
        .internal_api
        .call(
            "credits/add",
            serde_json::json!({
                "userId": user_id,
                "credits": package.credits,
                "packageId": package.id,
                "transactionId": transaction_id,
            }),
        )
        .await;

    if let Err(err) = forward {
        // Grant deliberately not recorded: the next delivery retries.
        error!(?err, %user_id, %transaction_id, "failed to forward credit grant");
        return;
    }

    let recorded = state
        .billing_repo
        .record_credit_grant(CreditGrant {
            transaction_id: transaction_id.clone(),
            user_id: user_id.clone(),
            package_id,
            credits: package.credits,
            granted_at: OffsetDateTime::now_utc(),
        })
        .await;
    match recorded {
        Ok(true) => info!(%user_id, %transaction_id, credits = package.credits, "credit purchase granted"),
        Ok(false) => info!(%user_id, %transaction_id, "credit grant raced a concurrent delivery"),
        Err(err) => error!(?err, %transaction_id, "failed to record credit grant"),
    }
}

async fn handle_subscription_checkout_completed(state: &AppState, payload: &serde_json::Value) {
    let user_id = match metadata_str(payload, "user_id") {
        Some(id) => id.to_string(),
        None => {
            warn!("subscription checkout completed without user_id metadata");
            return;
        }
    };
    let subscription_id = match extract_str(payload, &["data", "object", "subscription"]) {
        Some(id) => id.to_string(),
        None => {
            warn!(%user_id, "subscription checkout completed without a subscription id");
            return;
        }
    };
    let customer_id =
        extract_str(payload, &["data", "object", "customer"]).map(|s| s.to_string());
    let plan_id = metadata_str(payload, "plan_id").map(|s| s.to_string());
    let price_id = metadata_str(payload, "price_id").map(|s| s.to_string());
    let billing_period = metadata_str(payload, "billing_period").map(|s| s.to_string());

    if let Err(err) = state
        .billing_repo
        .upsert_subscription(SubscriptionRecord {
            subscription_id: subscription_id.clone(),
            user_id: user_id.clone(),
            customer_id: customer_id.clone(),
            plan_id: plan_id.clone(),
            status: SubscriptionStatus::Active,
            cancel_at_period_end: false,
            updated_at: OffsetDateTime::now_utc(),
        })
        .await
    {
        error!(?err, %subscription_id, "failed to store subscription record");
    }

    let forward = state
        .internal_api
        .call(
            "subscription/create",
            serde_json::json!({
                "userId": user_id,
                "subscriptionId": subscription_id,
                "customerId": customer_id,
                "planId": plan_id,
                "priceId": price_id,
                "billingPeriod": billing_period,
            }),
        )
        .await;

    let sync = match forward {
        Ok(_) => {
            info!(%user_id, %subscription_id, "subscription activation forwarded");
            SyncStatus::Synced
        }
        Err(err) => {
            error!(?err, %user_id, %subscription_id, "failed to forward subscription activation");
            SyncStatus::Failed
        }
    };
    if let Err(err) = state.billing_repo.set_sync_status(&subscription_id, sync).await {
        error!(?err, %subscription_id, "failed to record sync status");
    }
}

/// Shared path for subscription lifecycle events. `forced_status` overrides
/// the payload status (deletions always mean canceled, whatever the final
/// status snapshot says).
async fn handle_subscription_lifecycle(
    state: &AppState,
    payload: &serde_json::Value,
    forced_status: Option<SubscriptionStatus>,
) {
    let subscription_id = match extract_str(payload, &["data", "object", "id"]) {
        Some(id) => id.to_string(),
        None => {
            warn!("subscription event without an id");
            return;
        }
    };
    let status = forced_status.unwrap_or_else(|| {
        SubscriptionStatus::from_provider(
            extract_str(payload, &["data", "object", "status"]).unwrap_or(""),
        )
    });
    let cancel_at_period_end = extract_bool(payload, &["data", "object", "cancel_at_period_end"]);

    match state
        .billing_repo
        .update_subscription_status(&subscription_id, status, cancel_at_period_end)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            info!(%subscription_id, "lifecycle event for unknown subscription; syncing anyway");
        }
        Err(err) => error!(?err, %subscription_id, "failed to update subscription status"),
    }

    let forward = state
        .internal_api
        .call(
            "subscription/sync",
            serde_json::json!({
                "subscriptionId": subscription_id,
                "status": status.as_str(),
                "cancelAtPeriodEnd": cancel_at_period_end,
            }),
        )
        .await;

    let sync = match forward {
        Ok(_) => SyncStatus::Synced,
        Err(err) => {
            error!(?err, %subscription_id, "failed to forward subscription sync");
            SyncStatus::Failed
        }
    };
    if let Err(err) = state.billing_repo.set_sync_status(&subscription_id, sync).await {
        error!(?err, %subscription_id, "failed to record sync status");
    }
}

/// Renewal failure: mark past_due locally and tell the consumer app. No
/// destructive action; the provider drives the eventual cancellation.
async fn handle_invoice_payment_failed(state: &AppState, payload: &serde_json::Value) {
    let subscription_id = match extract_str(payload, &["data", "object", "subscription"]) {
        Some(id) => id.to_string(),
        None => {
            info!("invoice payment failure without a subscription; ignoring");
            return;
        }
    };

    match state
        .billing_repo
        .update_subscription_status(&subscription_id, SubscriptionStatus::PastDue, None)
        .await
    {
        Ok(true) => warn!(%subscription_id, "subscription marked past_due after failed renewal"),
        Ok(false) => info!(%subscription_id, "renewal failure for unknown subscription"),
        Err(err) => error!(?err, %subscription_id, "failed to mark subscription past_due"),
    }

    let forward = state
        .internal_api
        .call(
            "subscription/sync",
            serde_json::json!({
                "subscriptionId": subscription_id,
                "status": SubscriptionStatus::PastDue.as_str(),
            }),
        )
        .await;

    let sync = match forward {
        Ok(_) => SyncStatus::Synced,
        Err(err) => {
            error!(?err, %subscription_id, "failed to forward renewal failure");
            SyncStatus::Failed
        }
    };
    if let Err(err) = state.billing_repo.set_sync_status(&subscription_id, sync).await {
        error!(?err, %subscription_id, "failed to record sync status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, InternalApiSettings, StripeSettings};
    use crate::db::{BillingRepository, InMemoryBillingRepository};
    use crate::services::forwarder::MockInternalApi;
    use crate::services::stripe::MockStripeGateway;
    use axum::extract::State as AxumState;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Arc;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            frontend_origin: "https://app.example.com".into(),
            app_base_url: "https://app.example.com".into(),
            stripe: StripeSettings {
                secret_key: "sk_test_stub".into(),
                webhook_secret: "whsec_stub".into(),
            },
            internal_api: InternalApiSettings {
                base_url: "https://app.example.com".into(),
                secret: "internal-stub".into(),
            },
        })
    }

    fn test_state() -> (
        AppState,
        Arc<MockStripeGateway>,
        Arc<MockInternalApi>,
        Arc<InMemoryBillingRepository>,
    ) {
        let stripe = Arc::new(MockStripeGateway::new());
        let internal_api = Arc::new(MockInternalApi::new());
        let repo = Arc::new(InMemoryBillingRepository::new());
        let state = AppState {
            stripe: stripe.clone(),
            internal_api: internal_api.clone(),
            billing_repo: repo.clone(),
            config: test_config(),
        };
        (state, stripe, internal_api, repo)
    }

    fn signed_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Stripe-Signature", HeaderValue::from_static("t=1,v1=stub"));
        headers
    }

    async fn deliver(state: AppState, body: &serde_json::Value) -> Response {
        webhook(
            AxumState(state),
            signed_headers(),
            axum::body::Bytes::from(serde_json::to_vec(body).unwrap()),
        )
        .await
    }

    fn credit_session_completed(payment_intent: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "evt_credit",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_credit",
                "mode": "payment",
                "payment_intent": payment_intent,
                "metadata": { "user_id": "user_1", "package_id": "500", "kind": "credit_purchase" }
            }}
        })
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let (state, _, _, _) = test_state();
        let resp = webhook(
            AxumState(state),
            HeaderMap::new(),
            axum::body::Bytes::from_static(b"{}"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected() {
        let (state, stripe, internal_api, _) = test_state();
        *stripe.reject_webhooks.lock().unwrap() = true;

        let resp = deliver(state, &credit_session_completed("pi_1")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(internal_api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn credit_purchase_grants_credits_once() {
        let (state, _, internal_api, repo) = test_state();
        let body = credit_session_completed("pi_once");

        let resp = deliver(state.clone(), &body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        // Redelivery of the same payment
        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let forwards = internal_api.calls_to("credits/add");
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0]["userId"], "user_1");
        assert_eq!(forwards[0]["credits"], 500);

        let grant = repo.find_credit_grant("pi_once").await.unwrap().unwrap();
        assert_eq!(grant.user_id, "user_1");
        assert_eq!(grant.credits, 500);
    }

    #[tokio::test]
    async fn unknown_package_is_acknowledged_without_granting() {
        let (state, _, internal_api, repo) = test_state();
        let body = serde_json::json!({
            "id": "evt_bad_pkg",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_bad",
                "mode": "payment",
                "payment_intent": "pi_bad",
                "metadata": { "user_id": "user_1", "package_id": "9999" }
            }}
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(internal_api.calls.lock().unwrap().is_empty());
        assert!(repo.find_credit_grant("pi_bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_forward_leaves_grant_unrecorded_for_redelivery() {
        let (state, _, internal_api, repo) = test_state();
        internal_api.fail_endpoint("credits/add");

        let resp = deliver(state, &credit_session_completed("pi_retry")).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(internal_api.calls_to("credits/add").len(), 1);
        assert!(repo.find_credit_grant("pi_retry").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscription_checkout_creates_record_and_forwards() {
        let (state, _, internal_api, repo) = test_state();
        let body = serde_json::json!({
            "id": "evt_sub",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_sub",
                "mode": "subscription",
                "subscription": "sub_new",
                "customer": "cus_9",
                "metadata": {
                    "user_id": "user_1",
                    "plan_id": "pro",
                    "price_id": "price_pro_monthly",
                    "billing_period": "monthly"
                }
            }}
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = repo.find_subscription("sub_new").await.unwrap().unwrap();
        assert_eq!(record.user_id, "user_1");
        assert_eq!(record.plan_id.as_deref(), Some("pro"));
        assert_eq!(record.status, SubscriptionStatus::Active);

        let forwards = internal_api.calls_to("subscription/create");
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0]["subscriptionId"], "sub_new");
        assert_eq!(forwards[0]["planId"], "pro");

        assert_eq!(
            repo.get_sync_status("sub_new").await.unwrap(),
            Some(SyncStatus::Synced)
        );
    }

    #[tokio::test]
    async fn failed_subscription_forward_marks_sync_failed() {
        let (state, _, internal_api, repo) = test_state();
        internal_api.fail_endpoint("subscription/create");
        let body = serde_json::json!({
            "id": "evt_sub_fail",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_sub_fail",
                "mode": "subscription",
                "subscription": "sub_fail",
                "metadata": { "user_id": "user_1", "plan_id": "pro" }
            }}
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            repo.get_sync_status("sub_fail").await.unwrap(),
            Some(SyncStatus::Failed)
        );
        // The record itself is still stored for later reconciliation.
        assert!(repo.find_subscription("sub_fail").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn subscription_updated_syncs_status() {
        let (state, _, internal_api, repo) = test_state();
        repo.upsert_subscription(SubscriptionRecord {
            subscription_id: "sub_live".into(),
            user_id: "user_1".into(),
            customer_id: None,
            plan_id: Some("pro".into()),
            status: SubscriptionStatus::Active,
            cancel_at_period_end: false,
            updated_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

        let body = serde_json::json!({
            "id": "evt_upd",
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_live",
                "status": "active",
                "cancel_at_period_end": true
            }}
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = repo.find_subscription("sub_live").await.unwrap().unwrap();
        assert!(record.cancel_at_period_end);

        let forwards = internal_api.calls_to("subscription/sync");
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0]["cancelAtPeriodEnd"], true);
    }

    #[tokio::test]
    async fn deleted_unknown_subscription_is_acknowledged() {
        let (state, _, internal_api, _) = test_state();
        let body = serde_json::json!({
            "id": "evt_del",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_unknown", "status": "canceled" } }
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        // Still forwarded so the consumer app can reconcile its own state.
        let forwards = internal_api.calls_to("subscription/sync");
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0]["status"], "canceled");
    }

    #[tokio::test]
    async fn invoice_payment_failed_marks_past_due() {
        let (state, _, internal_api, repo) = test_state();
        repo.upsert_subscription(SubscriptionRecord {
            subscription_id: "sub_renew".into(),
            user_id: "user_1".into(),
            customer_id: None,
            plan_id: Some("pro".into()),
            status: SubscriptionStatus::Active,
            cancel_at_period_end: false,
            updated_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();

        let body = serde_json::json!({
            "id": "evt_inv",
            "type": "invoice.payment_failed",
            "data": { "object": { "id": "in_1", "subscription": "sub_renew" } }
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let record = repo.find_subscription("sub_renew").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::PastDue);

        let forwards = internal_api.calls_to("subscription/sync");
        assert_eq!(forwards[0]["status"], "past_due");
    }

    #[tokio::test]
    async fn unhandled_event_is_acknowledged() {
        let (state, _, internal_api, _) = test_state();
        let body = serde_json::json!({
            "id": "evt_misc",
            "type": "customer.created",
            "data": { "object": {} }
        });

        let resp = deliver(state, &body).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(internal_api.calls.lock().unwrap().is_empty());
    }
}
