use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use tandem_core::config::{
    parse_bounded, required_trimmed, value_or_default, ConfigError, ServiceConfig,
};

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Shared secret for Supabase webhook signatures
    pub webhook_secret: String,
    /// Shared secret for Frappe webhook signatures
    pub frappe_webhook_token: String,
    /// `None` disables the background queue worker
    pub queue_poll_interval: Option<Duration>,
    /// Requeue cap for failed operations replayed by the worker; 0 disables replay
    pub queue_retry_max: u32,
    /// Age at which the worker prunes failed operations; `None` keeps them
    pub failed_retention: Option<Duration>,
    pub service: ServiceConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("webhook_secret", &"[REDACTED]")
            .field("frappe_webhook_token", &"[REDACTED]")
            .field("queue_poll_interval", &self.queue_poll_interval)
            .field("queue_retry_max", &self.queue_retry_max)
            .field("failed_retention", &self.failed_retention)
            .field("service", &self.service)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let service = ServiceConfig::from_lookup(&lookup)?;
        let bind_addr = value_or_default(&lookup, "TANDEM_API_BIND_ADDR", "127.0.0.1:8080");
        let webhook_secret = required_trimmed(&lookup, "WEBHOOK_SECRET")?;
        let frappe_webhook_token = required_trimmed(&lookup, "FRAPPE_WEBHOOK_TOKEN")?;

        let poll_secs = parse_bounded(&lookup, "QUEUE_POLL_INTERVAL_SECS", 15_u64, 0..=3_600)?;
        let queue_poll_interval = (poll_secs > 0).then(|| Duration::from_secs(poll_secs));
        let queue_retry_max = parse_bounded(&lookup, "QUEUE_RETRY_MAX", 3_u32, 0..=100)?;
        let retention_days = parse_bounded(&lookup, "FAILED_RETENTION_DAYS", 7_u64, 0..=365)?;
        let failed_retention =
            (retention_days > 0).then(|| Duration::from_secs(retention_days * 24 * 60 * 60));

        Ok(Self {
            bind_addr,
            webhook_secret,
            frappe_webhook_token,
            queue_poll_interval,
            queue_retry_max,
            failed_retention,
            service,
        })
    }
}
