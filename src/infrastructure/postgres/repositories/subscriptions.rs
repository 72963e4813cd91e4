use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{
    RunQueryDsl, insert_into,
    pg::Pg,
    prelude::*,
    query_builder::QueryFragment,
    query_dsl::methods::ExecuteDsl,
    update,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionSync,
        },
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// Claims the pending row recorded at checkout time: it has no subscription
/// id yet, so the upsert's conflict target would never find it.
fn claim_pending_statement(
    session_id: String,
    sync: SubscriptionSync,
    now: DateTime<Utc>,
) -> impl RunQueryDsl<diesel::PgConnection>
+ ExecuteDsl<diesel::PgConnection>
+ QueryFragment<Pg> {
    update(subscriptions::table)
        .filter(subscriptions::stripe_session_id.eq(session_id))
        .filter(subscriptions::stripe_subscription_id.is_null())
        .set((
            subscriptions::stripe_subscription_id.eq(sync.stripe_subscription_id),
            subscriptions::stripe_customer_id.eq(sync.stripe_customer_id),
            subscriptions::status.eq(sync.status.to_string()),
            subscriptions::company_id.eq(sync.company_id),
            subscriptions::user_id.eq(sync.user_id),
            subscriptions::updated_at.eq(now),
        ))
}

fn upsert_statement(
    sync: SubscriptionSync,
    now: DateTime<Utc>,
) -> impl RunQueryDsl<diesel::PgConnection>
+ ExecuteDsl<diesel::PgConnection>
+ QueryFragment<Pg> {
    use diesel::query_dsl::methods::FilterDsl;

    let entity = InsertSubscriptionEntity {
        stripe_customer_id: sync.stripe_customer_id.clone(),
        stripe_subscription_id: Some(sync.stripe_subscription_id),
        stripe_session_id: sync.stripe_session_id,
        price_id: None,
        company_id: sync.company_id.clone(),
        user_id: sync.user_id,
        status: sync.status.to_string(),
        created_at: now,
        updated_at: now,
    };

    insert_into(subscriptions::table)
        .values(entity)
        .on_conflict(subscriptions::stripe_subscription_id)
        .do_update()
        .set((
            subscriptions::stripe_customer_id.eq(sync.stripe_customer_id),
            subscriptions::status.eq(sync.status.to_string()),
            subscriptions::company_id.eq(sync.company_id),
            subscriptions::user_id.eq(sync.user_id),
            subscriptions::updated_at.eq(now),
        ))
        // `canceled` is terminal: a redelivered checkout event for a
        // subscription Stripe already deleted must not revive the row.
        .filter(subscriptions::status.ne(SubscriptionStatus::Canceled.to_string()))
}

fn update_status_statement(
    stripe_subscription_id: String,
    status: SubscriptionStatus,
    now: DateTime<Utc>,
) -> impl RunQueryDsl<diesel::PgConnection>
+ ExecuteDsl<diesel::PgConnection>
+ QueryFragment<Pg> {
    update(subscriptions::table)
        .filter(subscriptions::stripe_subscription_id.eq(stripe_subscription_id))
        // `canceled` is terminal: a revived subscription gets a new id from
        // Stripe, so late or re-ordered invoice events must not resurrect it.
        .filter(subscriptions::status.ne(SubscriptionStatus::Canceled.to_string()))
        .set((
            subscriptions::status.eq(status.to_string()),
            subscriptions::updated_at.eq(now),
        ))
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn insert_pending(&self, entity: InsertSubscriptionEntity) -> Result<i64> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(subscriptions::table)
            .values(&entity)
            .returning(subscriptions::id)
            .get_result::<i64>(&mut conn)?;

        Ok(result)
    }

    async fn upsert_by_stripe_subscription_id(&self, sync: SubscriptionSync) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        if let Some(session_id) = sync.stripe_session_id.clone() {
            let claimed =
                claim_pending_statement(session_id, sync.clone(), now).execute(&mut conn)?;
            if claimed > 0 {
                return Ok(());
            }
        }

        upsert_statement(sync, now).execute(&mut conn)?;

        Ok(())
    }

    async fn update_status_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update_status_statement(stripe_subscription_id.to_string(), status, Utc::now())
            .execute(&mut conn)?;

        Ok(())
    }

    async fn find_active_by_user_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .filter(subscriptions::status.eq(SubscriptionStatus::Active.to_string()))
            .order(subscriptions::updated_at.desc())
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }
}
