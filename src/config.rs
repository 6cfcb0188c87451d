use {
    crate::domain::{attribution::CommissionKind, error::PipelineError, money::Currency},
    std::{env, net::SocketAddr, time::Duration},
};

/// Basis-point commission rate per kind. `None` means no commission is
/// recorded for that kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommissionRates {
    pub signup_bps: Option<u32>,
    pub rebill_bps: Option<u32>,
    pub ppv_bps: Option<u32>,
}

impl CommissionRates {
    pub fn for_kind(&self, kind: CommissionKind) -> Option<u32> {
        match kind {
            CommissionKind::Signup => self.signup_bps,
            CommissionKind::Rebill => self.rebill_bps,
            CommissionKind::Ppv => self.ppv_bps,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub max_attempts: u32,
    pub queue_capacity: usize,
    pub base_backoff: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_attempts: 5,
            queue_capacity: 1024,
            base_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub webhook_secret: String,
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
    pub default_currency: Currency,
    pub provider: ProviderConfig,
    pub commission_rates: CommissionRates,
    pub commission_hold: chrono::Duration,
    pub notify: NotifyConfig,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();

        let hold_days: i64 = optional("COMMISSION_HOLD_DAYS")?.unwrap_or(30);
        let notify_defaults = NotifyConfig::default();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            webhook_secret: required("WEBHOOK_SECRET")?,
            bind_addr: optional("BIND_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000))),
            max_body_bytes: optional("MAX_BODY_BYTES")?.unwrap_or(64 * 1024),
            default_currency: match env::var("DEFAULT_CURRENCY") {
                Ok(code) => Currency::try_from(code.as_str())
                    .map_err(|e| PipelineError::Config(format!("DEFAULT_CURRENCY: {e}")))?,
                Err(_) => Currency::Usd,
            },
            provider: ProviderConfig {
                api_url: required("PROVIDER_API_URL")?,
                api_key: required("PROVIDER_API_KEY")?,
            },
            commission_rates: CommissionRates {
                signup_bps: optional("COMMISSION_SIGNUP_BPS")?,
                rebill_bps: optional("COMMISSION_REBILL_BPS")?,
                ppv_bps: optional("COMMISSION_PPV_BPS")?,
            },
            commission_hold: chrono::Duration::days(hold_days),
            notify: NotifyConfig {
                webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
                max_attempts: optional("NOTIFY_MAX_ATTEMPTS")?
                    .unwrap_or(notify_defaults.max_attempts),
                ..notify_defaults
            },
        })
    }
}

fn required(key: &str) -> Result<String, PipelineError> {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::Config(format!("{key} must be set")))
}

fn optional<T>(key: &str) -> Result<Option<T>, PipelineError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("{key}: {e}"))),
        _ => Ok(None),
    }
}
