use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity};
use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;
use crate::domain::value_objects::subscriptions::SubscriptionSync;

#[async_trait]
#[automock]
pub trait SubscriptionRepository {
    async fn insert_pending(&self, entity: InsertSubscriptionEntity) -> Result<i64>;

    /// Keyed upsert on `stripe_subscription_id`; redelivered events converge
    /// on one row instead of producing duplicates.
    async fn upsert_by_stripe_subscription_id(&self, sync: SubscriptionSync) -> Result<()>;

    async fn update_status_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<()>;

    async fn find_active_by_user_id(&self, user_id: Uuid)
    -> Result<Option<SubscriptionEntity>>;
}
