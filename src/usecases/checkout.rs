use std::sync::Arc;

use anyhow::Result as AnyResult;
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::InsertSubscriptionEntity,
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus,
            subscriptions::{CheckoutSessionDto, CreateCheckoutModel},
        },
    },
    payments::{StripeGateway, stripe_client::CheckoutSessionParams},
};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid checkout request")]
    Validation(Vec<String>),
    #[error("the selected plan is not available")]
    InvalidPrice,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CheckoutError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CheckoutError::Validation(_) | CheckoutError::InvalidPrice => StatusCode::BAD_REQUEST,
            CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, CheckoutError>;

pub struct CheckoutUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    stripe_client: Arc<G>,
}

impl<S, G> CheckoutUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>, stripe_client: Arc<G>) -> Self {
        Self {
            subscription_repo,
            stripe_client,
        }
    }

    pub async fn create_checkout_session(
        &self,
        model: CreateCheckoutModel,
    ) -> UseCaseResult<CheckoutSessionDto> {
        // Shape validation runs before any network call so a bad request
        // never creates a gateway customer.
        let violations = Self::validate(&model);
        if !violations.is_empty() {
            let err = CheckoutError::Validation(violations);
            warn!(
                status = err.status_code().as_u16(),
                "checkout: request rejected by validation"
            );
            return Err(err);
        }

        let price_id = model.price_id.unwrap_or_default();
        let email = model.customer_email.unwrap_or_default();
        let company_id = model.company_id.unwrap_or_default();

        info!(
            price_id = %price_id,
            company_id = %company_id,
            "checkout: create checkout session requested"
        );

        let price = self
            .stripe_client
            .retrieve_price(&price_id)
            .await
            .map_err(|err| {
                error!(
                    price_id = %price_id,
                    error = ?err,
                    "checkout: failed to retrieve price from stripe"
                );
                CheckoutError::Internal(err)
            })?;

        let Some(price) = price else {
            let err = CheckoutError::InvalidPrice;
            warn!(
                price_id = %price_id,
                status = err.status_code().as_u16(),
                "checkout: price not found at stripe"
            );
            return Err(err);
        };

        info!(
            price_id = %price.id,
            unit_amount = ?price.unit_amount,
            "checkout: price verified at stripe"
        );

        let customer_id = self.ensure_customer(&email).await.map_err(|err| {
            error!(
                price_id = %price_id,
                error = ?err,
                "checkout: failed to resolve stripe customer"
            );
            CheckoutError::Internal(err)
        })?;

        let session = self
            .stripe_client
            .create_checkout_session(CheckoutSessionParams {
                price_id: price_id.clone(),
                customer_id: customer_id.clone(),
                company_id: company_id.clone(),
                profile_id: model.profile_id.clone(),
            })
            .await
            .map_err(|err| {
                error!(
                    price_id = %price_id,
                    customer_id = %customer_id,
                    error = ?err,
                    "checkout: stripe checkout session creation failed"
                );
                CheckoutError::Internal(err)
            })?;

        // Optimistic pending row. Losing it is non-critical: the webhook
        // re-establishes authoritative state keyed on the subscription id.
        let now = Utc::now();
        let pending = InsertSubscriptionEntity {
            stripe_customer_id: Some(customer_id),
            stripe_subscription_id: None,
            stripe_session_id: Some(session.id.clone()),
            price_id: Some(price_id),
            company_id: Some(company_id),
            user_id: model
                .profile_id
                .as_deref()
                .and_then(|value| Uuid::parse_str(value).ok()),
            status: SubscriptionStatus::Pending.to_string(),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.subscription_repo.insert_pending(pending).await {
            warn!(
                session_id = %session.id,
                db_error = ?err,
                "checkout: failed to record pending subscription (non-critical)"
            );
        }

        info!(
            session_id = %session.id,
            "checkout: session created successfully"
        );

        Ok(CheckoutSessionDto {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Resolves a Stripe customer for the email, creating one when none
    /// exists. Read-then-write: two concurrent first-time checkouts may both
    /// create a customer; Stripe is the source of truth and the duplicate is
    /// a recoverable anomaly, so no lock is taken.
    pub async fn ensure_customer(&self, email: &str) -> AnyResult<String> {
        if let Some(existing) = self.stripe_client.find_customer_by_email(email).await? {
            info!(customer_id = %existing, "checkout: existing stripe customer found");
            return Ok(existing);
        }

        let created = self.stripe_client.create_customer(email).await?;
        info!(customer_id = %created, "checkout: new stripe customer created");
        Ok(created)
    }

    fn validate(model: &CreateCheckoutModel) -> Vec<String> {
        let mut violations = Vec::new();

        match model.price_id.as_deref() {
            Some(value) if !value.trim().is_empty() => {}
            _ => violations.push("priceId is required and must be a string".to_string()),
        }

        match model.customer_email.as_deref() {
            Some(value) if Self::is_valid_email(value) => {}
            _ => violations.push("customer_email is required and must be valid".to_string()),
        }

        match model.company_id.as_deref() {
            Some(value) if !value.trim().is_empty() => {}
            _ => violations.push("company_id is required".to_string()),
        }

        violations
    }

    fn is_valid_email(email: &str) -> bool {
        if email.is_empty() || email.len() > 255 || email.chars().any(char::is_whitespace) {
            return false;
        }

        let Some((local, domain)) = email.split_once('@') else {
            return false;
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return false;
        }

        match domain.rsplit_once('.') {
            Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::payments::MockStripeGateway;
    use crate::payments::stripe_client::{CreatedCheckoutSession, StripePrice};

    fn valid_model() -> CreateCheckoutModel {
        CreateCheckoutModel {
            price_id: Some("price_ABC".to_string()),
            customer_email: Some("a@b.com".to_string()),
            profile_id: Some("123e4567-e89b-12d3-a456-426614174000".to_string()),
            company_id: Some("co_1".to_string()),
        }
    }

    fn known_price() -> StripePrice {
        StripePrice {
            id: "price_ABC".to_string(),
            unit_amount: Some(2900),
            currency: Some("usd".to_string()),
            active: Some(true),
        }
    }

    #[tokio::test]
    async fn valid_request_returns_session_and_records_pending_row() {
        let mut gateway = MockStripeGateway::new();
        let mut repo = MockSubscriptionRepository::new();

        let price = known_price();
        gateway
            .expect_retrieve_price()
            .returning(move |_| Ok(Some(price.clone())));
        gateway
            .expect_find_customer_by_email()
            .returning(|_| Ok(None));
        gateway
            .expect_create_customer()
            .returning(|_| Ok("cus_123".to_string()));
        gateway.expect_create_checkout_session().returning(|_| {
            Ok(CreatedCheckoutSession {
                id: "cs_test_123".to_string(),
                url: "https://checkout.stripe.com/c/pay/cs_test_123".to_string(),
            })
        });

        repo.expect_insert_pending()
            .withf(|entity| {
                entity.price_id.as_deref() == Some("price_ABC")
                    && entity.company_id.as_deref() == Some("co_1")
                    && entity.stripe_session_id.as_deref() == Some("cs_test_123")
                    && entity.status == SubscriptionStatus::Pending.to_string()
                    && entity.stripe_subscription_id.is_none()
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(1) }));

        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));
        let dto = usecase
            .create_checkout_session(valid_model())
            .await
            .unwrap();

        assert_eq!(dto.session_id, "cs_test_123");
        assert!(dto.url.starts_with("https://"));
    }

    #[tokio::test]
    async fn missing_fields_are_all_reported_at_once() {
        let gateway = MockStripeGateway::new();
        let repo = MockSubscriptionRepository::new();
        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));

        let result = usecase
            .create_checkout_session(CreateCheckoutModel::default())
            .await;

        match result {
            Err(CheckoutError::Validation(violations)) => {
                assert_eq!(violations.len(), 3);
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn malformed_email_is_rejected_before_any_gateway_call() {
        // No gateway expectations: any network call would panic the mock.
        let gateway = MockStripeGateway::new();
        let repo = MockSubscriptionRepository::new();
        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));

        let mut model = valid_model();
        model.customer_email = Some("not-an-email".to_string());

        let result = usecase.create_checkout_session(model).await;
        match result {
            Err(CheckoutError::Validation(violations)) => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("customer_email"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn unknown_price_maps_to_invalid_price() {
        let mut gateway = MockStripeGateway::new();
        let repo = MockSubscriptionRepository::new();

        gateway.expect_retrieve_price().returning(|_| Ok(None));
        gateway.expect_find_customer_by_email().never();
        gateway.expect_create_customer().never();

        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));
        let result = usecase.create_checkout_session(valid_model()).await;

        assert!(matches!(result, Err(CheckoutError::InvalidPrice)));
    }

    #[tokio::test]
    async fn existing_customer_is_reused_without_creating_a_new_one() {
        let mut gateway = MockStripeGateway::new();
        let repo = MockSubscriptionRepository::new();

        gateway
            .expect_find_customer_by_email()
            .returning(|_| Ok(Some("cus_existing".to_string())));
        gateway.expect_create_customer().never();

        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));
        let customer_id = usecase.ensure_customer("a@b.com").await.unwrap();

        assert_eq!(customer_id, "cus_existing");
    }

    #[tokio::test]
    async fn new_email_creates_exactly_one_customer() {
        let mut gateway = MockStripeGateway::new();
        let repo = MockSubscriptionRepository::new();

        gateway
            .expect_find_customer_by_email()
            .returning(|_| Ok(None));
        gateway
            .expect_create_customer()
            .times(1)
            .returning(|_| Ok("cus_new".to_string()));

        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));
        let customer_id = usecase.ensure_customer("new@b.com").await.unwrap();

        assert_eq!(customer_id, "cus_new");
    }

    #[tokio::test]
    async fn pending_row_insert_failure_does_not_fail_the_checkout() {
        let mut gateway = MockStripeGateway::new();
        let mut repo = MockSubscriptionRepository::new();

        let price = known_price();
        gateway
            .expect_retrieve_price()
            .returning(move |_| Ok(Some(price.clone())));
        gateway
            .expect_find_customer_by_email()
            .returning(|_| Ok(Some("cus_123".to_string())));
        gateway.expect_create_checkout_session().returning(|_| {
            Ok(CreatedCheckoutSession {
                id: "cs_test_456".to_string(),
                url: "https://checkout.stripe.com/c/pay/cs_test_456".to_string(),
            })
        });

        repo.expect_insert_pending()
            .returning(|_| Box::pin(async { Err(anyhow::anyhow!("store unavailable")) }));

        let usecase = CheckoutUseCase::new(Arc::new(repo), Arc::new(gateway));
        let dto = usecase
            .create_checkout_session(valid_model())
            .await
            .unwrap();

        assert_eq!(dto.session_id, "cs_test_456");
    }
}
