use std::{net::SocketAddr, sync::Arc};

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use astra_billing::config::Config;
use astra_billing::db::{BillingRepository, InMemoryBillingRepository};
use astra_billing::responses::JsonResponse;
use astra_billing::routes::billing::{
    cancel_subscription, create_credit_checkout, create_portal_session,
    create_subscription_checkout, list_credit_packages, quote_credit_package, resume_subscription,
    update_subscription,
};
use astra_billing::routes::stripe::webhook;
use astra_billing::services::forwarder::{HttpInternalApi, InternalApi};
use astra_billing::services::stripe::{LiveStripeGateway, StripeGateway};
use astra_billing::utils::origin::enforce_allowed_origin;
use astra_billing::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(20);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to cleanup old IPs
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let config = Arc::new(Config::from_env());

    let stripe =
        Arc::new(LiveStripeGateway::from_settings(&config.stripe)) as Arc<dyn StripeGateway>;
    let internal_api =
        Arc::new(HttpInternalApi::new(&config.internal_api)) as Arc<dyn InternalApi>;
    let billing_repo = Arc::new(InMemoryBillingRepository::new()) as Arc<dyn BillingRepository>;

    let state = AppState {
        stripe,
        internal_api,
        billing_repo,
        config: config.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    // Browser-facing billing API: origin-checked and rate limited.
    let billing_routes = Router::new()
        .route("/checkout/subscription", post(create_subscription_checkout))
        .route("/checkout/credits", post(create_credit_checkout))
        .route("/credits/packages", get(list_credit_packages))
        .route(
            "/credits/packages/{package_id}/quote",
            get(quote_credit_package),
        )
        .route(
            "/subscription",
            patch(update_subscription)
                .delete(cancel_subscription)
                .put(resume_subscription),
        )
        .route("/portal", post(create_portal_session))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            enforce_allowed_origin,
        ));

    // The webhook route stays outside the origin check: the provider sends
    // no browser Origin header and is authenticated by signature instead.
    let app = Router::new()
        .route("/", get(root))
        .route("/api/stripe/webhook", post(webhook))
        .nest("/api/billing", billing_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Billing gateway listening at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Billing gateway up").into_response()
}
