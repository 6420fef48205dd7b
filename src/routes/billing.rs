use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::models::checkout::{CheckoutIntent, PurchaseKind};
use crate::models::credits::{
    discounted_price_cents, find_package, savings_cents, PlanTier, CREDIT_PACKAGES,
};
use crate::responses::JsonResponse;
use crate::services::customer::resolve_customer;
use crate::services::stripe::{
    CheckoutLineItem, CheckoutMode, CreateCheckoutSessionRequest, StripeGatewayError,
    SubscriptionInfo,
};
use crate::state::AppState;
use crate::utils::idempotency;

/// Maps a gateway failure onto the HTTP surface. The `type` discriminator
/// mirrors the provider's own error families so the frontend can branch on
/// it without string-matching messages.
fn gateway_error_response(err: &StripeGatewayError) -> Response {
    let (status, kind) = match err {
        StripeGatewayError::Card(_) => (StatusCode::PAYMENT_REQUIRED, "card_error"),
        StripeGatewayError::RateLimit(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error"),
        StripeGatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
        StripeGatewayError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
        StripeGatewayError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "connection_error"),
        StripeGatewayError::Api(_) => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
        StripeGatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "unknown_error"),
    };
    error!(%err, kind, "billing provider call failed");
    (
        status,
        Json(json!({
            "error": err.to_string(),
            "type": kind,
        })),
    )
        .into_response()
}

fn success_urls(base: &str, kind: PurchaseKind) -> (String, String) {
    let success = match kind {
        PurchaseKind::Subscription => {
            format!("{}/subscribe/success?session_id={{CHECKOUT_SESSION_ID}}", base)
        }
        PurchaseKind::CreditPurchase => format!(
            "{}/subscribe/success?session_id={{CHECKOUT_SESSION_ID}}&type=credit",
            base
        ),
    };
    (success, format!("{}/subscribe/cancel", base))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCheckoutRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub price_id: String,
    #[serde(default)]
    pub plan_id: String,
    pub billing_period: Option<String>,
}

// POST /api/billing/checkout/subscription
pub async fn create_subscription_checkout(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionCheckoutRequest>,
) -> Response {
    if req.user_id.is_empty() || req.price_id.is_empty() || req.plan_id.is_empty() {
        return JsonResponse::bad_request("userId, priceId and planId are required")
            .into_response();
    }
    if req.email.is_empty() {
        return JsonResponse::bad_request("email is required").into_response();
    }

    let customer = match resolve_customer(state.stripe.as_ref(), &req.email, &req.user_id).await {
        Ok(c) => c,
        Err(err) => return gateway_error_response(&err),
    };

    let billing_period = req
        .billing_period
        .as_deref()
        .and_then(parse_billing_period);
    let intent = CheckoutIntent {
        kind: PurchaseKind::Subscription,
        user_id: req.user_id.clone(),
        price_id: req.price_id.clone(),
        product_id: req.plan_id.clone(),
        billing_period,
        customer_email: Some(req.email.clone()),
        plan_tier: None,
    };
    let metadata = intent.metadata();
    let (success_url, cancel_url) = success_urls(&state.config.app_base_url, intent.kind);

    let key = idempotency::checkout_key(
        &req.user_id,
        &req.plan_id,
        PurchaseKind::Subscription,
        OffsetDateTime::now_utc().unix_timestamp(),
    );

    let session_req = CreateCheckoutSessionRequest {
        success_url,
        cancel_url,
        mode: CheckoutMode::Subscription,
        line_items: vec![CheckoutLineItem {
            price: req.price_id.clone(),
            quantity: 1,
        }],
        customer: Some(customer.id),
        client_reference_id: Some(req.user_id.clone()),
        subscription_metadata: Some(metadata.clone()),
        metadata,
    };

    match state.stripe.create_checkout_session(session_req, &key).await {
        Ok(session) => {
            info!(user_id = %req.user_id, plan_id = %req.plan_id, session_id = %session.id, "created subscription checkout");
            Json(json!({
                "success": true,
                "checkoutUrl": session.url,
                "sessionId": session.id,
            }))
            .into_response()
        }
        Err(err) => gateway_error_response(&err),
    }
}

fn parse_billing_period(value: &str) -> Option<crate::models::checkout::BillingPeriod> {
    use crate::models::checkout::BillingPeriod;
    match value {
        "monthly" => Some(BillingPeriod::Monthly),
        "half_year" => Some(BillingPeriod::HalfYear),
        "yearly" => Some(BillingPeriod::Yearly),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCheckoutRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub package_id: String,
    #[serde(default)]
    pub price_id: String,
    pub plan_tier: Option<String>,
}

// POST /api/billing/checkout/credits
pub async fn create_credit_checkout(
    State(state): State<AppState>,
    Json(req): Json<CreditCheckoutRequest>,
) -> Response {
    if req.user_id.is_empty() || req.price_id.is_empty() {
        return JsonResponse::bad_request("userId and priceId are required").into_response();
    }
    // Package validity is checked before any provider call.
    if find_package(&req.package_id).is_none() {
        return JsonResponse::bad_request("Unknown credit package").into_response();
    }
    if req.email.is_empty() {
        return JsonResponse::bad_request("email is required").into_response();
    }

    let customer = match resolve_customer(state.stripe.as_ref(), &req.email, &req.user_id).await {
        Ok(c) => c,
        Err(err) => return gateway_error_response(&err),
    };

    let tier = PlanTier::from_option(req.plan_tier.as_deref());
    let intent = CheckoutIntent {
        kind: PurchaseKind::CreditPurchase,
        user_id: req.user_id.clone(),
        price_id: req.price_id.clone(),
        product_id: req.package_id.clone(),
        billing_period: None,
        customer_email: Some(req.email.clone()),
        plan_tier: Some(tier),
    };
    let metadata = intent.metadata();
    let (success_url, cancel_url) = success_urls(&state.config.app_base_url, intent.kind);

    let key = idempotency::checkout_key(
        &req.user_id,
        &req.package_id,
        PurchaseKind::CreditPurchase,
        OffsetDateTime::now_utc().unix_timestamp(),
    );

    let session_req = CreateCheckoutSessionRequest {
        success_url,
        cancel_url,
        mode: CheckoutMode::Payment,
        line_items: vec![CheckoutLineItem {
            price: req.price_id.clone(),
            quantity: 1,
        }],
        customer: Some(customer.id),
        client_reference_id: Some(req.user_id.clone()),
        metadata,
        subscription_metadata: None,
    };

    match state.stripe.create_checkout_session(session_req, &key).await {
        Ok(session) => {
            info!(user_id = %req.user_id, package_id = %req.package_id, session_id = %session.id, "created credit checkout");
            Json(json!({
                "success": true,
                "checkoutUrl": session.url,
                "sessionId": session.id,
            }))
            .into_response()
        }
        Err(err) => gateway_error_response(&err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierQuery {
    pub plan_tier: Option<String>,
}

fn package_json(package: &crate::models::credits::CreditPackage, tier: PlanTier) -> serde_json::Value {
    json!({
        "id": package.id,
        "name": package.name,
        "credits": package.credits,
        "description": package.description,
        "basePriceCents": package.base_price_cents,
        "priceCents": discounted_price_cents(package, tier),
        "savingsCents": savings_cents(package, tier),
        "discountPercent": tier.discount_percent(),
    })
}

// GET /api/billing/credits/packages?planTier=pro
pub async fn list_credit_packages(Query(query): Query<TierQuery>) -> Response {
    let tier = PlanTier::from_option(query.plan_tier.as_deref());
    let packages: Vec<_> = CREDIT_PACKAGES
        .iter()
        .map(|p| package_json(p, tier))
        .collect();
    Json(json!({ "planTier": tier.as_str(), "packages": packages })).into_response()
}

// GET /api/billing/credits/packages/{package_id}/quote?planTier=pro
pub async fn quote_credit_package(
    Path(package_id): Path<String>,
    Query(query): Query<TierQuery>,
) -> Response {
    let tier = PlanTier::from_option(query.plan_tier.as_deref());
    match find_package(&package_id) {
        Some(package) => Json(json!({
            "planTier": tier.as_str(),
            "package": package_json(package, tier),
        }))
        .into_response(),
        None => JsonResponse::not_found("Unknown credit package").into_response(),
    }
}

fn subscription_json(sub: &SubscriptionInfo) -> serde_json::Value {
    json!({
        "id": sub.id,
        "status": sub.status,
        "cancelAtPeriodEnd": sub.cancel_at_period_end,
        "currentPeriodEnd": sub.current_period_end,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriptionRequest {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub new_price_id: String,
    pub plan_id: Option<String>,
}

// PATCH /api/billing/subscription — move an active subscription to a new price
pub async fn update_subscription(
    State(state): State<AppState>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> Response {
    if req.subscription_id.is_empty() || req.new_price_id.is_empty() {
        return JsonResponse::bad_request("subscriptionId and newPriceId are required")
            .into_response();
    }

    let mut metadata = std::collections::BTreeMap::new();
    if let Some(plan_id) = &req.plan_id {
        metadata.insert("plan_id".to_string(), plan_id.clone());
    }
    let key = idempotency::subscription_key(
        "subupdate",
        &req.subscription_id,
        &req.new_price_id,
        OffsetDateTime::now_utc().unix_timestamp(),
    );

    match state
        .stripe
        .update_subscription_price(&req.subscription_id, &req.new_price_id, metadata, &key)
        .await
    {
        Ok(sub) => {
            info!(subscription_id = %sub.id, new_price_id = %req.new_price_id, "subscription plan changed");
            Json(json!({ "success": true, "subscription": subscription_json(&sub) }))
                .into_response()
        }
        Err(err) => gateway_error_response(&err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionIdRequest {
    #[serde(default)]
    pub subscription_id: String,
}

// DELETE /api/billing/subscription — cancel at period end
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionIdRequest>,
) -> Response {
    set_cancel_at_period_end(state, req, true, "subcancel").await
}

// PUT /api/billing/subscription — undo a pending cancellation
pub async fn resume_subscription(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionIdRequest>,
) -> Response {
    set_cancel_at_period_end(state, req, false, "subresume").await
}

async fn set_cancel_at_period_end(
    state: AppState,
    req: SubscriptionIdRequest,
    cancel: bool,
    op: &str,
) -> Response {
    if req.subscription_id.is_empty() {
        return JsonResponse::bad_request("subscriptionId is required").into_response();
    }

    let key = idempotency::subscription_key(
        op,
        &req.subscription_id,
        if cancel { "cancel" } else { "resume" },
        OffsetDateTime::now_utc().unix_timestamp(),
    );

    match state
        .stripe
        .set_subscription_cancel_at_period_end(&req.subscription_id, cancel, &key)
        .await
    {
        Ok(sub) => {
            info!(subscription_id = %sub.id, cancel, "subscription cancellation flag updated");
            Json(json!({ "success": true, "subscription": subscription_json(&sub) }))
                .into_response()
        }
        Err(err) => gateway_error_response(&err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    #[serde(default)]
    pub email: String,
    pub return_url: Option<String>,
}

// POST /api/billing/portal — self-serve billing management
pub async fn create_portal_session(
    State(state): State<AppState>,
    Json(req): Json<PortalRequest>,
) -> Response {
    if req.email.is_empty() {
        return JsonResponse::bad_request("email is required").into_response();
    }

    let customer = match state.stripe.find_customer_by_email(&req.email).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return JsonResponse::not_found("No billing customer for that email").into_response()
        }
        Err(err) => return gateway_error_response(&err),
    };

    let return_url = req
        .return_url
        .unwrap_or_else(|| format!("{}/settings/billing", state.config.app_base_url));

    match state
        .stripe
        .create_portal_session(&customer.id, &return_url)
        .await
    {
        Ok(url) => Json(json!({ "success": true, "url": url })).into_response(),
        Err(err) => gateway_error_response(&err),
    }
}
