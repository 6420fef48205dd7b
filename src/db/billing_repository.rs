use async_trait::async_trait;

use crate::models::subscription::{CreditGrant, SubscriptionRecord, SubscriptionStatus, SyncStatus};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Local billing state kept by this service: subscription snapshots, the
/// credit-grant ledger used for webhook dedup, and per-subscription sync
/// status. The consumer app remains the system of record for user data.
#[async_trait]
pub trait BillingRepository: Send + Sync {
    async fn upsert_subscription(&self, record: SubscriptionRecord) -> Result<(), RepositoryError>;

    /// Returns `false` when the subscription is unknown; callers treat that
    /// as a no-op, not an error.
    async fn update_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        cancel_at_period_end: Option<bool>,
    ) -> Result<bool, RepositoryError>;

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError>;

    async fn find_credit_grant(
        &self,
        transaction_id: &str,
    ) -> Result<Option<CreditGrant>, RepositoryError>;

    /// Returns `false` when a grant for the same transaction already exists.
    async fn record_credit_grant(&self, grant: CreditGrant) -> Result<bool, RepositoryError>;

    async fn set_sync_status(
        &self,
        subscription_id: &str,
        status: SyncStatus,
    ) -> Result<(), RepositoryError>;

    async fn get_sync_status(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SyncStatus>, RepositoryError>;
}
