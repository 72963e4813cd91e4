use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            enums::subscription_statuses::SubscriptionStatus, subscriptions::SubscriptionSync,
        },
    },
    payments::{
        StripeGateway,
        stripe_client::{StripeClient, StripeEvent},
    },
};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            WebhookError::InvalidSignature | WebhookError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, WebhookError>;

pub struct StripeWebhookUseCase<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    stripe_client: Arc<G>,
}

impl<S, G> StripeWebhookUseCase<S, G>
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

    /// Verifies authenticity against the raw body, then applies the event's
    /// state transition. Every write is keyed on `stripe_subscription_id`,
    /// so Stripe redeliveries converge instead of compounding.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> UseCaseResult<()> {
        let event = self
            .stripe_client
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(
                    error = %err,
                    "webhook: stripe signature verification failed"
                );
                WebhookError::InvalidSignature
            })?;

        let event_type = event.type_.clone();
        info!(
            event_type = %event_type,
            event_id = ?event.id,
            "webhook: stripe event verified"
        );

        match event_type.as_str() {
            "checkout.session.completed" => {
                self.handle_checkout_completed(&event).await?;
            }
            "invoice.payment_succeeded" => {
                self.handle_invoice_status_change(&event, SubscriptionStatus::Active)
                    .await?;
            }
            "invoice.payment_failed" => {
                self.handle_invoice_status_change(&event, SubscriptionStatus::PastDue)
                    .await?;
            }
            "customer.subscription.deleted" => {
                self.handle_subscription_deleted(&event).await?;
            }
            _ => {
                // Acknowledge so Stripe does not retry events we do not track.
                debug!("unhandled stripe event type: {:?}", event.type_);
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: &StripeEvent) -> UseCaseResult<()> {
        let session = StripeClient::extract_checkout_session(event).ok_or_else(|| {
            let err = WebhookError::InvalidPayload("missing checkout session".to_string());
            warn!(
                status = err.status_code().as_u16(),
                "webhook: checkout session missing in event"
            );
            err
        })?;

        let subscription_id = session.subscription.clone().ok_or_else(|| {
            let err = WebhookError::InvalidPayload("subscription id missing on session".to_string());
            warn!(
                session_id = ?session.id,
                status = err.status_code().as_u16(),
                "webhook: session completed without a subscription reference"
            );
            err
        })?;

        let metadata = session.metadata.clone().unwrap_or_default();
        let company_id = metadata
            .get("company_id")
            .filter(|value| !value.is_empty())
            .cloned();
        let user_id = metadata
            .get("profile_id")
            .and_then(|value| Uuid::parse_str(value).ok());

        info!(
            subscription_id = %subscription_id,
            customer_id = ?session.customer,
            company_id = ?company_id,
            "webhook: activating subscription after checkout"
        );

        self.subscription_repo
            .upsert_by_stripe_subscription_id(SubscriptionSync {
                stripe_subscription_id: subscription_id.clone(),
                stripe_customer_id: session.customer.clone(),
                stripe_session_id: session.id.clone(),
                status: SubscriptionStatus::Active,
                company_id,
                user_id,
            })
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription_id,
                    db_error = ?err,
                    "webhook: failed to upsert subscription after checkout"
                );
                WebhookError::Internal(err)
            })?;

        Ok(())
    }

    async fn handle_invoice_status_change(
        &self,
        event: &StripeEvent,
        status: SubscriptionStatus,
    ) -> UseCaseResult<()> {
        #[derive(Deserialize)]
        struct InvoiceObject {
            subscription: Option<String>,
        }

        let invoice: InvoiceObject =
            serde_json::from_value(event.data.object.clone()).map_err(|err| {
                warn!(
                    error = %err,
                    "webhook: invalid invoice payload in event"
                );
                WebhookError::InvalidPayload("invalid invoice payload".to_string())
            })?;

        // One-off invoices carry no subscription; nothing to synchronize.
        let Some(subscription_id) = invoice.subscription else {
            debug!(event_type = %event.type_, "webhook: invoice without subscription reference");
            return Ok(());
        };

        info!(
            subscription_id = %subscription_id,
            status = %status,
            "webhook: updating subscription status from invoice event"
        );

        self.subscription_repo
            .update_status_by_stripe_subscription_id(&subscription_id, status)
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription_id,
                    db_error = ?err,
                    "webhook: failed to update subscription status"
                );
                WebhookError::Internal(err)
            })?;

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &StripeEvent) -> UseCaseResult<()> {
        #[derive(Deserialize)]
        struct SubscriptionObject {
            id: Option<String>,
        }

        let subscription: SubscriptionObject = serde_json::from_value(event.data.object.clone())
            .map_err(|err| {
                warn!(
                    error = %err,
                    "webhook: invalid subscription payload in event"
                );
                WebhookError::InvalidPayload("invalid subscription payload".to_string())
            })?;

        let subscription_id = subscription.id.ok_or_else(|| {
            let err = WebhookError::InvalidPayload("missing subscription id".to_string());
            warn!(
                status = err.status_code().as_u16(),
                "webhook: subscription id missing in event payload"
            );
            err
        })?;

        info!(
            subscription_id = %subscription_id,
            "webhook: marking subscription canceled"
        );

        self.subscription_repo
            .update_status_by_stripe_subscription_id(
                &subscription_id,
                SubscriptionStatus::Canceled,
            )
            .await
            .map_err(|err| {
                error!(
                    subscription_id = %subscription_id,
                    db_error = ?err,
                    "webhook: failed to mark subscription canceled"
                );
                WebhookError::Internal(err)
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::payments::MockStripeGateway;
    use crate::payments::stripe_client::StripeEventData;
    use mockall::predicate::eq;
    use serde_json::{Value, json};

    fn make_event(type_: &str, object: Value) -> StripeEvent {
        StripeEvent {
            id: Some("evt_test".to_string()),
            type_: type_.to_string(),
            created: Some(1700000000),
            data: StripeEventData { object },
        }
    }

    fn gateway_returning(event_type: &'static str, object: Value) -> MockStripeGateway {
        let mut gateway = MockStripeGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| Ok(make_event(event_type, object.clone())));
        gateway
    }

    fn completed_session_object() -> Value {
        json!({
            "id": "cs_test_123",
            "subscription": "sub_123",
            "customer": "cus_456",
            "metadata": {
                "company_id": "co_1",
                "profile_id": "123e4567-e89b-12d3-a456-426614174000"
            }
        })
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_without_store_writes() {
        let mut gateway = MockStripeGateway::new();
        gateway
            .expect_verify_webhook_signature()
            .returning(|_, _| Err(anyhow::anyhow!("invalid webhook signature")));

        // No repository expectations: any write would panic the mock.
        let repo = MockSubscriptionRepository::new();
        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));

        let result = usecase.handle_webhook(b"{}", "t=1,v1=bad").await;
        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[tokio::test]
    async fn checkout_completed_upserts_an_active_subscription() {
        let gateway =
            gateway_returning("checkout.session.completed", completed_session_object());

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_upsert_by_stripe_subscription_id()
            .withf(|sync| {
                sync.stripe_subscription_id == "sub_123"
                    && sync.stripe_customer_id.as_deref() == Some("cus_456")
                    && sync.stripe_session_id.as_deref() == Some("cs_test_123")
                    && sync.status == SubscriptionStatus::Active
                    && sync.company_id.as_deref() == Some("co_1")
                    && sync.user_id
                        == Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").ok()
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));
        usecase
            .handle_webhook(b"raw", "t=1,v1=ok")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn redelivered_checkout_completed_applies_the_same_upsert() {
        let gateway =
            gateway_returning("checkout.session.completed", completed_session_object());

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_upsert_by_stripe_subscription_id()
            .withf(|sync| sync.stripe_subscription_id == "sub_123")
            .times(2)
            .returning(|_| Box::pin(async { Ok(()) }));

        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));
        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn checkout_completed_without_subscription_reference_is_rejected() {
        let gateway = gateway_returning(
            "checkout.session.completed",
            json!({ "id": "cs_test_123", "customer": "cus_456" }),
        );

        let repo = MockSubscriptionRepository::new();
        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));

        let result = usecase.handle_webhook(b"raw", "t=1,v1=ok").await;
        assert!(matches!(result, Err(WebhookError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn payment_failure_then_success_ends_active() {
        let mut gateway = MockStripeGateway::new();
        let mut call = 0;
        gateway
            .expect_verify_webhook_signature()
            .returning(move |_, _| {
                call += 1;
                let type_ = if call == 1 {
                    "invoice.payment_failed"
                } else {
                    "invoice.payment_succeeded"
                };
                Ok(make_event(type_, json!({ "subscription": "sub_123" })))
            });

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_update_status_by_stripe_subscription_id()
            .with(eq("sub_123"), eq(SubscriptionStatus::PastDue))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        repo.expect_update_status_by_stripe_subscription_id()
            .with(eq("sub_123"), eq(SubscriptionStatus::Active))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));
        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn subscription_deleted_sets_status_canceled() {
        let gateway = gateway_returning(
            "customer.subscription.deleted",
            json!({ "id": "sub_123", "status": "canceled" }),
        );

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_update_status_by_stripe_subscription_id()
            .with(eq("sub_123"), eq(SubscriptionStatus::Canceled))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));
        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn unrecognized_event_is_acknowledged_without_writes() {
        let gateway = gateway_returning("customer.created", json!({ "id": "cus_456" }));

        let repo = MockSubscriptionRepository::new();
        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));

        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn invoice_without_subscription_reference_is_acknowledged() {
        let gateway = gateway_returning(
            "invoice.payment_succeeded",
            json!({ "id": "in_123", "subscription": null }),
        );

        let repo = MockSubscriptionRepository::new();
        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));

        usecase.handle_webhook(b"raw", "t=1,v1=ok").await.unwrap();
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_internal_so_stripe_retries() {
        let gateway = gateway_returning(
            "customer.subscription.deleted",
            json!({ "id": "sub_123" }),
        );

        let mut repo = MockSubscriptionRepository::new();
        repo.expect_update_status_by_stripe_subscription_id()
            .returning(|_, _| Box::pin(async { Err(anyhow::anyhow!("store unavailable")) }));

        let usecase = StripeWebhookUseCase::new(Arc::new(repo), Arc::new(gateway));
        let result = usecase.handle_webhook(b"raw", "t=1,v1=ok").await;

        match result {
            Err(err @ WebhookError::Internal(_)) => {
                assert_eq!(err.status_code().as_u16(), 500);
            }
            other => panic!("expected internal error, got {:?}", other.map(|_| ())),
        }
    }
}
