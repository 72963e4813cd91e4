pub mod stripe_client;

use anyhow::Result as AnyResult;
use async_trait::async_trait;

use stripe_client::{
    CheckoutSessionParams, CreatedCheckoutSession, StripeClient, StripeEvent, StripePrice,
};

/// Seam between the billing flows and the payment gateway, so tests can
/// substitute a mock for the real Stripe API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn retrieve_price(&self, price_id: &str) -> AnyResult<Option<StripePrice>>;

    async fn find_customer_by_email(&self, email: &str) -> AnyResult<Option<String>>;

    async fn create_customer(&self, email: &str) -> AnyResult<String>;

    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> AnyResult<CreatedCheckoutSession>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str)
    -> AnyResult<StripeEvent>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn retrieve_price(&self, price_id: &str) -> AnyResult<Option<StripePrice>> {
        self.retrieve_price(price_id).await
    }

    async fn find_customer_by_email(&self, email: &str) -> AnyResult<Option<String>> {
        self.find_customer_by_email(email).await
    }

    async fn create_customer(&self, email: &str) -> AnyResult<String> {
        self.create_customer(email).await
    }

    async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> AnyResult<CreatedCheckoutSession> {
        self.create_checkout_session(params).await
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}
