use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::config::{config_loader, stage::Stage};
use crate::usecases::{checkout::CheckoutError, stripe_webhook::WebhookError};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

// App-level error type for the thin query endpoints.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            // Don't leak internal error detail to the client
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            details: None,
            code: None,
        });

        (status, body).into_response()
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            CheckoutError::Validation(violations) => ErrorResponse {
                error: "Invalid request data".to_string(),
                details: Some(json!(violations)),
                code: None,
            },
            CheckoutError::InvalidPrice => ErrorResponse {
                error: "The selected plan is not available".to_string(),
                details: None,
                code: Some("INVALID_PRICE".to_string()),
            },
            CheckoutError::Internal(err) => {
                // Full detail only reaches the client outside production.
                let details = match config_loader::get_stage() {
                    Stage::Production => None,
                    _ => Some(json!(err.to_string())),
                };
                ErrorResponse {
                    error: "Error processing the payment".to_string(),
                    details,
                    code: Some("CHECKOUT_ERROR".to_string()),
                }
            }
        };

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            WebhookError::InvalidSignature => ErrorResponse {
                error: "Invalid webhook signature".to_string(),
                details: None,
                code: None,
            },
            WebhookError::InvalidPayload(message) => ErrorResponse {
                error: format!("Webhook Error: {}", message),
                details: None,
                code: None,
            },
            WebhookError::Internal(_) => ErrorResponse {
                error: "Internal error processing the webhook".to_string(),
                details: None,
                code: None,
            },
        };

        (status, Json(body)).into_response()
    }
}
