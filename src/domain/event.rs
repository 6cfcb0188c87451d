use {
    super::payload::{OrderType, PostbackType, WebhookPayload},
    derive_more::Display,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RefundKind {
    #[display("chargeback")]
    Chargeback,
    #[display("credit")]
    Credit,
}

/// Everything downstream of the classifier matches on this, never on the
/// raw provider strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EventKind {
    #[display("subscription_approved")]
    SubscriptionApproved,
    #[display("purchase_approved")]
    PurchaseApproved,
    #[display("rebill")]
    Rebill,
    #[display("cancel")]
    Cancel,
    #[display("expiry")]
    Expiry,
    #[display("refund_{_0}")]
    Refund(RefundKind),
    #[display("uncancel")]
    Uncancel,
    #[display("extend")]
    Extend,
    #[display("unknown")]
    Unknown,
}

impl EventKind {
    /// Events that move money and therefore get a ledger entry keyed by
    /// `transactionId`.
    pub fn is_financial(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionApproved | Self::PurchaseApproved | Self::Rebill | Self::Refund(_)
        )
    }
}

pub fn classify(payload: &WebhookPayload) -> EventKind {
    match (payload.postback_type, payload.order_type) {
        (PostbackType::Approved, OrderType::Subscription) => EventKind::SubscriptionApproved,
        (PostbackType::Approved, OrderType::Purchase) => EventKind::PurchaseApproved,
        (PostbackType::Approved, OrderType::Unknown) => EventKind::Unknown,
        (PostbackType::Rebill, _) => EventKind::Rebill,
        (PostbackType::Cancel, _) => EventKind::Cancel,
        (PostbackType::Expiry, _) => EventKind::Expiry,
        (PostbackType::Chargeback, _) => EventKind::Refund(RefundKind::Chargeback),
        (PostbackType::Credit, _) => EventKind::Refund(RefundKind::Credit),
        (PostbackType::Uncancel, _) => EventKind::Uncancel,
        (PostbackType::Extend, _) => EventKind::Extend,
        (PostbackType::Unknown, _) => EventKind::Unknown,
    }
}
