use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use std::sync::Arc;

use crate::{
    auth::AuthUser,
    axum_http::error_responses::AppError,
    domain::repositories::subscriptions::SubscriptionRepository,
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad, repositories::subscriptions::SubscriptionPostgres,
    },
    usecases::session::SessionUseCase,
};

pub fn routes(db_pool: Arc<PgPoolSquad>) -> Router {
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let session_usecase = SessionUseCase::new(Arc::new(subscription_repository));

    Router::new()
        .route("/auth/session", get(current_session))
        .route("/subscription/active", get(active_subscription))
        .with_state(Arc::new(session_usecase))
}

pub async fn current_session<S>(
    State(session_usecase): State<Arc<SessionUseCase<S>>>,
    auth: Option<AuthUser>,
) -> Result<impl IntoResponse, AppError>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    let session = session_usecase.current_session(auth).await?;

    Ok(Json(session))
}

pub async fn active_subscription<S>(
    State(session_usecase): State<Arc<SessionUseCase<S>>>,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    let subscription = session_usecase.active_subscription(auth.user_id).await?;

    Ok(Json(subscription))
}
