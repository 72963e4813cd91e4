use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::{
    domain::repositories::subscriptions::SubscriptionRepository,
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad, repositories::subscriptions::SubscriptionPostgres,
    },
    payments::{StripeGateway, stripe_client::StripeClient},
    usecases::stripe_webhook::{StripeWebhookUseCase, WebhookError},
};

pub fn routes(db_pool: Arc<PgPoolSquad>, stripe_client: Arc<StripeClient>) -> Router {
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let webhook_usecase =
        StripeWebhookUseCase::new(Arc::new(subscription_repository), stripe_client);

    Router::new()
        .route("/webhook", post(handle_stripe_webhook))
        .with_state(Arc::new(webhook_usecase))
}

// Signature verification needs the raw body bytes, so this handler must
// never go through a Json extractor.
pub async fn handle_stripe_webhook<S, G>(
    State(webhook_usecase): State<Arc<StripeWebhookUseCase<S, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    let signature = match headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
    {
        Some(signature) => signature.to_string(),
        None => {
            warn!("webhook: request arrived without a stripe-signature header");
            return WebhookError::InvalidSignature.into_response();
        }
    };

    match webhook_usecase.handle_webhook(&body, &signature).await {
        Ok(()) => Json(json!({ "received": true })).into_response(),
        Err(err) => err.into_response(),
    }
}
