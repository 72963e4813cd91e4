use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, warn};

type HmacSha256 = Hmac<Sha256>;

/// Minimal Stripe client built on reqwest.
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: Option<String>,
    pub subscription: Option<String>,
    pub customer: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripePrice {
    pub id: String,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    pub active: Option<bool>,
}

/// Everything the orchestrator pins onto a hosted checkout page.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionParams {
    pub price_id: String,
    pub customer_id: String,
    pub company_id: String,
    pub profile_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CreatedCheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
        }
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (stripe_error_type, stripe_error_code, stripe_error_param, stripe_error_message) =
            match serde_json::from_str::<StripeErrorEnvelope>(&body) {
                Ok(envelope) => {
                    let details = envelope.error;
                    (details.type_, details.code, details.param, details.message)
                }
                Err(_) => (None, None, None, None),
            };

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?stripe_error_type,
            stripe_error_code = ?stripe_error_code,
            stripe_error_param = ?stripe_error_param,
            stripe_error_message = ?stripe_error_message,
            context = %context,
            "stripe api request failed"
        );

        anyhow::bail!(
            "Stripe API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Retrieves a price by id. Returns `None` when Stripe does not know the
    /// price, so the caller can answer with an "invalid plan" error instead
    /// of a generic failure. https://stripe.com/docs/api/prices/retrieve
    pub async fn retrieve_price(&self, price_id: &str) -> Result<Option<StripePrice>> {
        let resp = self
            .http
            .get(format!("https://api.stripe.com/v1/prices/{}", price_id))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await?;

        if resp.status().is_client_error() {
            warn!(price_id, status = %resp.status(), "stripe price lookup rejected");
            return Ok(None);
        }
        let resp = Self::ensure_success(resp, "retrieve price").await?;

        let price: StripePrice = resp.json().await?;
        Ok(Some(price))
    }

    /// Looks up an existing customer by exact email match.
    /// https://stripe.com/docs/api/customers/list
    pub async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>> {
        let resp = self
            .http
            .get("https://api.stripe.com/v1/customers")
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list customers").await?;

        #[derive(Deserialize)]
        struct CustomerRef {
            id: String,
        }

        #[derive(Deserialize)]
        struct CustomerList {
            data: Vec<CustomerRef>,
        }

        let parsed: CustomerList = resp.json().await?;
        Ok(parsed.data.into_iter().next().map(|customer| customer.id))
    }

    /// Creates a customer tagged with a provenance marker.
    /// https://stripe.com/docs/api/customers/create
    pub async fn create_customer(&self, email: &str) -> Result<String> {
        let body = [
            ("email", email.to_string()),
            ("metadata[source]", "braincore_web_app".to_string()),
            ("metadata[created_at]", Utc::now().to_rfc3339()),
        ];

        let resp = self
            .http
            .post("https://api.stripe.com/v1/customers")
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create customer").await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    /// Creates a subscription-mode Checkout Session and returns its id and
    /// hosted URL. https://stripe.com/docs/payments/checkout
    pub async fn create_checkout_session(
        &self,
        params: CheckoutSessionParams,
    ) -> Result<CreatedCheckoutSession> {
        let profile_id = params.profile_id.unwrap_or_default();
        let body: Vec<(String, String)> = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("line_items[0][price]".to_string(), params.price_id),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("customer".to_string(), params.customer_id),
            (
                "client_reference_id".to_string(),
                params.company_id.clone(),
            ),
            (
                "metadata[company_id]".to_string(),
                params.company_id.clone(),
            ),
            ("metadata[profile_id]".to_string(), profile_id.clone()),
            (
                "subscription_data[metadata][company_id]".to_string(),
                params.company_id,
            ),
            (
                "subscription_data[metadata][profile_id]".to_string(),
                profile_id,
            ),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("allow_promotion_codes".to_string(), "true".to_string()),
            (
                "billing_address_collection".to_string(),
                "required".to_string(),
            ),
            ("customer_update[address]".to_string(), "auto".to_string()),
            ("customer_update[name]".to_string(), "auto".to_string()),
        ];

        let resp = self
            .http
            .post("https://api.stripe.com/v1/checkout/sessions")
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .form(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create checkout session").await?;

        let parsed: CreatedCheckoutSession = resp.json().await?;
        Ok(parsed)
    }

    /// Verifies the webhook signature against the raw, unparsed body.
    /// https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<StripeEvent> {
        let mut timestamp: Option<String> = None;
        let mut signature: Option<String> = None;

        for part in signature_header.split(',') {
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest.to_string());
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signature = Some(rest.to_string());
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
        let signature =
            signature.ok_or_else(|| anyhow::anyhow!("missing v1 in stripe-signature"))?;

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let provided = hex::decode(signature)?;

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(signed_payload.as_bytes());
        // verify_slice compares in constant time.
        mac.verify_slice(&provided)
            .map_err(|_| anyhow::anyhow!("invalid webhook signature"))?;

        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }

    pub fn extract_checkout_session(event: &StripeEvent) -> Option<StripeCheckoutSession> {
        serde_json::from_value(event.data.object.clone()).ok()
    }
}
