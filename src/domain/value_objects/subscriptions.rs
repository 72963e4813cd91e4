use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;

/// Incoming checkout request body. Fields are optional so shape validation
/// can report every missing field at once instead of failing at parse time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCheckoutModel {
    #[serde(rename = "priceId", default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSessionDto {
    pub session_id: String,
    pub url: String,
}

/// Authoritative subscription state carried by a verified Stripe event,
/// applied to the store as a keyed upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSync {
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    /// Checkout session that opened this subscription, when the event
    /// carries one; lets the store claim the pending row it created.
    pub stripe_session_id: Option<String>,
    pub status: SubscriptionStatus,
    pub company_id: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionModel {
    pub id: i64,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub price_id: Option<String>,
    pub company_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionEntity> for SubscriptionModel {
    fn from(entity: SubscriptionEntity) -> Self {
        Self {
            id: entity.id,
            stripe_customer_id: entity.stripe_customer_id,
            stripe_subscription_id: entity.stripe_subscription_id,
            price_id: entity.price_id,
            company_id: entity.company_id,
            user_id: entity.user_id,
            status: SubscriptionStatus::from_str(&entity.status),
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}
