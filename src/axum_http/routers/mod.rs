pub mod checkout;
pub mod session;
pub mod stripe_webhook;
