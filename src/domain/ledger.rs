use {
    super::{
        error::PipelineError,
        event::{EventKind, RefundKind},
        id::{AccountId, PlanId, SubscriberId, TransactionId},
        money::Money,
        payload::OrderType,
    },
    derive_more::Display,
    serde::Serialize,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    #[display("approved")]
    Approved,
    #[display("rebill")]
    Rebill,
    #[display("chargeback")]
    Chargeback,
    #[display("credit")]
    Credit,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rebill => "rebill",
            Self::Chargeback => "chargeback",
            Self::Credit => "credit",
        }
    }

    pub fn for_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::SubscriptionApproved | EventKind::PurchaseApproved => Some(Self::Approved),
            EventKind::Rebill => Some(Self::Rebill),
            EventKind::Refund(RefundKind::Chargeback) => Some(Self::Chargeback),
            EventKind::Refund(RefundKind::Credit) => Some(Self::Credit),
            _ => None,
        }
    }
}

impl TryFrom<&str> for TransactionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "approved" => Ok(Self::Approved),
            "rebill" => Ok(Self::Rebill),
            "chargeback" => Ok(Self::Chargeback),
            "credit" => Ok(Self::Credit),
            other => Err(PipelineError::Validation(format!(
                "unknown transaction status: {other}"
            ))),
        }
    }
}

/// Ledger entry. Written once per `transaction_id`; never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub subscriber_id: Option<SubscriberId>,
    pub money: Money,
    pub status: TransactionStatus,
    #[serde(serialize_with = "order_type_str")]
    pub order_type: OrderType,
    pub reference_id: String,
    pub parent_transaction_id: Option<TransactionId>,
    pub affiliate_code: Option<String>,
    pub promo_code: Option<String>,
    pub signup_source: Option<String>,
    pub plan_id: Option<PlanId>,
}

fn order_type_str<S: serde::Serializer>(order: &OrderType, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(order)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded,
    /// A record with this `transaction_id` already exists: redelivery.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum JournalOutcome {
    #[display("applied")]
    Applied,
    #[display("duplicate")]
    Duplicate,
    #[display("ignored_unknown_event")]
    IgnoredUnknownEvent,
    #[display("ignored_unresolved_account")]
    IgnoredUnresolvedAccount,
    #[display("ignored_invalid_data")]
    IgnoredInvalidData,
    #[display("downstream_failed")]
    DownstreamFailed,
}

impl JournalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::IgnoredUnknownEvent => "ignored_unknown_event",
            Self::IgnoredUnresolvedAccount => "ignored_unresolved_account",
            Self::IgnoredInvalidData => "ignored_invalid_data",
            Self::DownstreamFailed => "downstream_failed",
        }
    }

    /// The event changed account state, whether or not every side effect
    /// went through.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied | Self::DownstreamFailed)
    }
}

/// Append-only record of a verified webhook and what became of it.
#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub id: Uuid,
    pub transaction_id: Option<String>,
    pub postback_type: String,
    pub event_kind: String,
    pub account_id: Option<AccountId>,
    pub outcome: JournalOutcome,
    pub detail: serde_json::Value,
    pub payload: serde_json::Value,
}

impl JournalEntry {
    pub fn new(
        transaction_id: Option<&str>,
        postback_type: impl Into<String>,
        event_kind: EventKind,
        outcome: JournalOutcome,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id: transaction_id.map(str::to_string),
            postback_type: postback_type.into(),
            event_kind: event_kind.to_string(),
            account_id: None,
            outcome,
            detail: serde_json::json!({}),
            payload,
        }
    }

    pub fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
