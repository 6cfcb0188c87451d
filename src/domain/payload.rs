use {
    super::{
        error::PipelineError,
        id::{SubscriberId, TransactionId},
        money::{Currency, Money, MoneyAmount},
    },
    chrono::NaiveDate,
    derive_more::Display,
    serde::{Deserialize, Deserializer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PostbackType {
    #[display("approved")]
    Approved,
    #[display("rebill")]
    Rebill,
    #[display("cancel")]
    Cancel,
    #[display("expiry")]
    Expiry,
    #[display("chargeback")]
    Chargeback,
    #[display("credit")]
    Credit,
    #[display("uncancel")]
    Uncancel,
    #[display("extend")]
    Extend,
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[display("subscription")]
    Subscription,
    #[display("purchase")]
    Purchase,
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
pub enum SubscriptionType {
    #[serde(rename = "recurring")]
    #[display("recurring")]
    Recurring,
    #[serde(rename = "one-time", alias = "one_time", alias = "onetime")]
    #[display("one-time")]
    OneTime,
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

/// A date field as the provider sends it. The provider distinguishes "not
/// mentioned" from "explicitly empty": a cancel that carries an empty
/// `nextChargeOn` clears the stored value, one that omits it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateField {
    #[default]
    Absent,
    Cleared,
    Set(NaiveDate),
}

impl DateField {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::Set(d) => Some(*d),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for DateField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            None | Some("") => DateField::Cleared,
            Some(s) => match parse_provider_date(s) {
                Some(d) => DateField::Set(d),
                None => {
                    tracing::warn!(value = s, "unparsable provider date, ignoring field");
                    DateField::Absent
                }
            },
        })
    }
}

/// Accepts `YYYY-MM-DD` optionally followed by a time component
/// (`2024-05-01T10:00:00Z`, `2024-05-01 10:00:00`).
pub fn parse_provider_date(s: &str) -> Option<NaiveDate> {
    let day = s.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Provider ids and amounts arrive as either JSON strings or numbers.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// One inbound provider notification, after signature verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default = "unknown_postback")]
    pub postback_type: PostbackType,
    #[serde(default = "unknown_order")]
    pub order_type: OrderType,
    #[serde(default)]
    pub subscription_type: Option<SubscriptionType>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub subscription_phase: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub reference_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub sale_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub transaction_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price_amount: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub price_currency: Option<String>,
    #[serde(default)]
    pub next_charge_on: DateField,
    #[serde(default)]
    pub expires_on: DateField,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub cancelled_by: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub uncancelled_by: Option<String>,
}

fn unknown_postback() -> PostbackType {
    PostbackType::Unknown
}

fn unknown_order() -> OrderType {
    OrderType::Unknown
}

impl WebhookPayload {
    /// Reads an already-parsed JSON document. A document that does not fit
    /// the schema is authentic but unusable, so it is a `Validation` error
    /// rather than a transport one.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, PipelineError> {
        Self::deserialize(value).map_err(|e| {
            PipelineError::Validation(format!("webhook payload does not fit schema: {e}"))
        })
    }

    pub fn transaction_id(&self) -> Result<Option<TransactionId>, PipelineError> {
        self.transaction_id.clone().map(TransactionId::new).transpose()
    }

    pub fn subscriber_id(&self) -> Result<Option<SubscriberId>, PipelineError> {
        self.sale_id.clone().map(SubscriberId::new).transpose()
    }

    pub fn parent_transaction_id(&self) -> Result<Option<TransactionId>, PipelineError> {
        self.parent_id.clone().map(TransactionId::new).transpose()
    }

    /// Missing amount is zero and missing currency falls back to
    /// `default_currency`; anything present but unparsable is rejected.
    pub fn money(&self, default_currency: Currency) -> Result<Money, PipelineError> {
        let currency = match self.price_currency.as_deref() {
            Some(code) => Currency::try_from(code)?,
            None => default_currency,
        };
        let amount = match self.price_amount.as_deref() {
            Some(raw) => MoneyAmount::parse_decimal(raw, currency.minor_digits())?,
            None => MoneyAmount::ZERO,
        };
        Ok(Money::new(amount, currency))
    }

    pub fn is_one_time(&self) -> bool {
        self.subscription_type == Some(SubscriptionType::OneTime)
    }
}
