use async_trait::async_trait;
use dashmap::DashMap;

use super::billing_repository::{BillingRepository, RepositoryError};
use crate::models::subscription::{CreditGrant, SubscriptionRecord, SubscriptionStatus, SyncStatus};

/// In-process implementation backed by concurrent maps. Survives for the
/// lifetime of the service; durability lives with the consumer app, which
/// receives every event through the internal API.
#[derive(Default)]
pub struct InMemoryBillingRepository {
    subscriptions: DashMap<String, SubscriptionRecord>,
    credit_grants: DashMap<String, CreditGrant>,
    sync_statuses: DashMap<String, SyncStatus>,
}

impl InMemoryBillingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingRepository for InMemoryBillingRepository {
    async fn upsert_subscription(&self, record: SubscriptionRecord) -> Result<(), RepositoryError> {
        self.subscriptions
            .insert(record.subscription_id.clone(), record);
        Ok(())
    }

    async fn update_subscription_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        cancel_at_period_end: Option<bool>,
    ) -> Result<bool, RepositoryError> {
        match self.subscriptions.get_mut(subscription_id) {
            Some(mut record) => {
                record.status = status;
                if let Some(cancel) = cancel_at_period_end {
                    record.cancel_at_period_end = cancel;
                }
                record.updated_at = time::OffsetDateTime::now_utc();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>, RepositoryError> {
        Ok(self
            .subscriptions
            .get(subscription_id)
            .map(|r| r.clone()))
    }

    async fn find_credit_grant(
        &self,
        transaction_id: &str,
    ) -> Result<Option<CreditGrant>, RepositoryError> {
        Ok(self.credit_grants.get(transaction_id).map(|g| g.clone()))
    }

    async fn record_credit_grant(&self, grant: CreditGrant) -> Result<bool, RepositoryError> {
        // entry() keeps check-and-insert atomic under concurrent deliveries
        match self.credit_grants.entry(grant.transaction_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(grant);
                Ok(true)
            }
        }
    }

    async fn set_sync_status(
        &self,
        subscription_id: &str,
        status: SyncStatus,
    ) -> Result<(), RepositoryError> {
        self.sync_statuses
            .insert(subscription_id.to_string(), status);
        Ok(())
    }

    async fn get_sync_status(
        &self,
        subscription_id: &str,
    ) -> Result<Option<SyncStatus>, RepositoryError> {
        Ok(self.sync_statuses.get(subscription_id).map(|s| *s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn record(id: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            subscription_id: id.to_string(),
            user_id: "user_1".to_string(),
            customer_id: Some("cus_1".to_string()),
            plan_id: Some("pro".to_string()),
            status: SubscriptionStatus::Active,
            cancel_at_period_end: false,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn grant(txn: &str) -> CreditGrant {
        CreditGrant {
            transaction_id: txn.to_string(),
            user_id: "user_1".to_string(),
            package_id: "500".to_string(),
            credits: 500,
            granted_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn upsert_then_update_status() {
        let repo = InMemoryBillingRepository::new();
        repo.upsert_subscription(record("sub_1")).await.unwrap();

        let updated = repo
            .update_subscription_status("sub_1", SubscriptionStatus::PastDue, Some(true))
            .await
            .unwrap();
        assert!(updated);

        let stored = repo.find_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
        assert!(stored.cancel_at_period_end);
    }

    #[tokio::test]
    async fn status_update_on_unknown_subscription_is_a_noop() {
        let repo = InMemoryBillingRepository::new();
        let updated = repo
            .update_subscription_status("sub_missing", SubscriptionStatus::Canceled, None)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn duplicate_credit_grant_is_rejected() {
        let repo = InMemoryBillingRepository::new();
        assert!(repo.record_credit_grant(grant("pi_1")).await.unwrap());
        assert!(!repo.record_credit_grant(grant("pi_1")).await.unwrap());
        assert!(repo.record_credit_grant(grant("pi_2")).await.unwrap());

        let found = repo.find_credit_grant("pi_1").await.unwrap();
        assert_eq!(found.unwrap().credits, 500);
    }

    #[tokio::test]
    async fn sync_status_round_trip() {
        let repo = InMemoryBillingRepository::new();
        assert!(repo.get_sync_status("sub_1").await.unwrap().is_none());

        repo.set_sync_status("sub_1", SyncStatus::Failed).await.unwrap();
        assert_eq!(
            repo.get_sync_status("sub_1").await.unwrap(),
            Some(SyncStatus::Failed)
        );

        repo.set_sync_status("sub_1", SyncStatus::Synced).await.unwrap();
        assert_eq!(
            repo.get_sync_status("sub_1").await.unwrap(),
            Some(SyncStatus::Synced)
        );
    }
}
