use std::sync::Arc;

use crate::config::Config;
use crate::db::billing_repository::BillingRepository;
use crate::services::forwarder::InternalApi;
use crate::services::stripe::StripeGateway;

#[derive(Clone)]
pub struct AppState {
    pub stripe: Arc<dyn StripeGateway>,
    pub internal_api: Arc<dyn InternalApi>,
    pub billing_repo: Arc<dyn BillingRepository>,
    pub config: Arc<Config>,
}
