use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::subscriptions::CreateCheckoutModel,
    },
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad, repositories::subscriptions::SubscriptionPostgres,
    },
    payments::{StripeGateway, stripe_client::StripeClient},
    usecases::checkout::CheckoutUseCase,
};

pub fn routes(db_pool: Arc<PgPoolSquad>, stripe_client: Arc<StripeClient>) -> Router {
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let checkout_usecase =
        CheckoutUseCase::new(Arc::new(subscription_repository), stripe_client);

    Router::new()
        .route("/create-checkout-session", post(create_checkout_session))
        .with_state(Arc::new(checkout_usecase))
}

pub async fn create_checkout_session<S, G>(
    State(checkout_usecase): State<Arc<CheckoutUseCase<S, G>>>,
    Json(create_checkout_model): Json<CreateCheckoutModel>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: StripeGateway + Send + Sync + 'static,
{
    match checkout_usecase
        .create_checkout_session(create_checkout_model)
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "sessionId": session.session_id,
                "url": session.url,
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
