use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::subscriptions::SubscriptionModel,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUserDto {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDto {
    pub user: Option<SessionUserDto>,
    pub subscription: Option<SubscriptionModel>,
    pub has_active_subscription: bool,
}

impl SessionDto {
    fn anonymous() -> Self {
        Self {
            user: None,
            subscription: None,
            has_active_subscription: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSubscriptionDto {
    pub subscription: Option<SubscriptionModel>,
    pub has_active_subscription: bool,
}

pub struct SessionUseCase<S>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
}

impl<S> SessionUseCase<S>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>) -> Self {
        Self { subscription_repo }
    }

    /// Anonymous callers get an empty session rather than an error so the
    /// front end can render the signed-out state from one endpoint.
    pub async fn current_session(&self, auth: Option<AuthUser>) -> Result<SessionDto> {
        let Some(user) = auth else {
            return Ok(SessionDto::anonymous());
        };

        let subscription = self.lookup_active_subscription(user.user_id).await?;

        Ok(SessionDto {
            has_active_subscription: subscription.is_some(),
            subscription,
            user: Some(SessionUserDto {
                id: user.user_id,
                email: user.email,
                role: user.role,
            }),
        })
    }

    pub async fn active_subscription(&self, user_id: Uuid) -> Result<ActiveSubscriptionDto> {
        let subscription = self.lookup_active_subscription(user_id).await?;

        Ok(ActiveSubscriptionDto {
            has_active_subscription: subscription.is_some(),
            subscription,
        })
    }

    async fn lookup_active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionModel>> {
        info!(%user_id, "session: loading active subscription");
        let subscription = self
            .subscription_repo
            .find_active_by_user_id(user_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    db_error = ?err,
                    "session: failed to load active subscription"
                );
                err
            })?;

        Ok(subscription.map(SubscriptionModel::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::subscriptions::SubscriptionEntity;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn active_entity(user_id: Uuid) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: 7,
            stripe_customer_id: Some("cus_456".to_string()),
            stripe_subscription_id: Some("sub_123".to_string()),
            stripe_session_id: Some("cs_test_123".to_string()),
            price_id: Some("price_ABC".to_string()),
            company_id: Some("co_1".to_string()),
            user_id: Some(user_id),
            status: SubscriptionStatus::Active.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn anonymous_caller_gets_an_empty_session() {
        let repo = MockSubscriptionRepository::new();
        let usecase = SessionUseCase::new(Arc::new(repo));

        let session = usecase.current_session(None).await.unwrap();

        assert!(session.user.is_none());
        assert!(session.subscription.is_none());
        assert!(!session.has_active_subscription);
    }

    #[tokio::test]
    async fn authenticated_caller_sees_their_active_subscription() {
        let user_id = Uuid::new_v4();
        let entity = active_entity(user_id);

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_find_active_by_user_id()
            .with(eq(user_id))
            .returning(move |_| {
                let entity = entity.clone();
                Box::pin(async move { Ok(Some(entity)) })
            });

        let usecase = SessionUseCase::new(Arc::new(repo));
        let session = usecase
            .current_session(Some(AuthUser {
                user_id,
                email: Some("a@b.com".to_string()),
                role: "authenticated".to_string(),
            }))
            .await
            .unwrap();

        assert!(session.has_active_subscription);
        assert_eq!(
            session
                .subscription
                .unwrap()
                .stripe_subscription_id
                .as_deref(),
            Some("sub_123")
        );
        assert_eq!(session.user.unwrap().id, user_id);
    }

    #[tokio::test]
    async fn missing_subscription_yields_null_payload() {
        let user_id = Uuid::new_v4();

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_find_active_by_user_id()
            .with(eq(user_id))
            .returning(|_| Box::pin(async { Ok(None) }));

        let usecase = SessionUseCase::new(Arc::new(repo));
        let dto = usecase.active_subscription(user_id).await.unwrap();

        assert!(dto.subscription.is_none());
        assert!(!dto.has_active_subscription);
    }
}
