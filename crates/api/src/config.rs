//! Environment-driven configuration.

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Shared secret for generation provider webhooks.
    pub generation_webhook_secret: String,
    /// Shared secret for payment webhooks and capture signatures.
    pub payment_webhook_secret: String,
    /// Credits granted to a new account on first access.
    pub starter_balance: u64,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let generation_webhook_secret =
            std::env::var("GENERATION_WEBHOOK_SECRET").unwrap_or_else(|_| {
                tracing::warn!("GENERATION_WEBHOOK_SECRET not set; using insecure dev default");
                "dev-generation-secret".to_string()
            });

        let payment_webhook_secret =
            std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_else(|_| {
                tracing::warn!("PAYMENT_WEBHOOK_SECRET not set; using insecure dev default");
                "dev-payment-secret".to_string()
            });

        let starter_balance = std::env::var("STARTER_CREDITS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        Self {
            bind_addr,
            generation_webhook_secret,
            payment_webhook_secret,
            starter_balance,
        }
    }
}
