use {
    super::{
        attribution::{AttributionRecord, CommissionKind, TrackingAttribution},
        error::PipelineError,
        event::EventKind,
        id::{AccountId, AffiliateId, ContentId, PlanId, PromoCodeId, SubscriberId, TransactionId},
        ledger::{TransactionRecord, TransactionStatus},
        money::{Currency, Money, MoneyAmount},
        payload::{DateField, OrderType},
        reference::ReferenceData,
    },
    chrono::{DateTime, NaiveDate, Utc},
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt,
    },
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    #[default]
    None,
    Active,
    Cancelled,
    Expired,
    Banned,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Banned => "banned",
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for MembershipStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "none" | "" => Ok(Self::None),
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "banned" => Ok(Self::Banned),
            other => Err(PipelineError::Validation(format!(
                "unknown membership status: {other}"
            ))),
        }
    }
}

/// Keys under which membership state is persisted in the account store's
/// generic key/value metadata.
pub mod fields {
    pub const SUBSCRIBER_ID: &str = "subscriber_id";
    pub const LAST_TRANSACTION_ID: &str = "last_transaction_id";
    pub const NEXT_CHARGE_ON: &str = "next_charge_on";
    pub const MEMBERSHIP_EXPIRES_ON: &str = "membership_expires_on";
    pub const PLAN_ID: &str = "plan_id";
    pub const LAST_AMOUNT: &str = "last_amount";
    pub const LAST_CURRENCY: &str = "last_currency";
    pub const TRACKING_AFFILIATE_ID: &str = "tracking_affiliate_id";
    pub const TRACKING_PROMO_CODE_ID: &str = "tracking_promo_code_id";
    pub const TRACKING_CLICK_ID: &str = "tracking_click_id";
    pub const BAN_REASONS: &str = "ban_reasons";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanNote {
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Raw account as the account store returns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: AccountId,
    pub status: MembershipStatus,
    pub fields: BTreeMap<String, String>,
}

impl AccountRecord {
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn ban_reasons(&self) -> Vec<BanNote> {
        self.field(fields::BAN_REASONS)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub account_id: AccountId,
    pub membership_status: MembershipStatus,
    pub subscriber_id: Option<SubscriberId>,
    pub last_transaction_id: Option<TransactionId>,
    pub next_charge_on: Option<NaiveDate>,
    pub membership_expires_on: Option<NaiveDate>,
    pub plan_id: Option<PlanId>,
    pub last_amount: Option<Money>,
    pub purchased_content_ids: BTreeSet<ContentId>,
    /// Signup tracking-cookie attribution; read by the resolver, never
    /// written by the state machine.
    pub tracking: Option<TrackingAttribution>,
}

impl AccountState {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            ..Self::default()
        }
    }

    /// Builds the state from stored metadata. Unparsable values are treated
    /// as absent.
    pub fn from_record(record: &AccountRecord, purchased: BTreeSet<ContentId>) -> Self {
        let get = |key: &str| record.field(key).filter(|v| !v.is_empty());
        let date = |key: &str| get(key).and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok());
        let number = |key: &str| get(key).and_then(|v| v.parse::<u64>().ok());

        let last_amount = match (number(fields::LAST_AMOUNT), get(fields::LAST_CURRENCY)) {
            (Some(minor), Some(code)) => Currency::try_from(code)
                .ok()
                .map(|c| Money::new(MoneyAmount::new(minor), c)),
            _ => None,
        };

        let tracking = number(fields::TRACKING_AFFILIATE_ID).map(|aff| TrackingAttribution {
            affiliate_id: AffiliateId::new(aff),
            promo_code_id: number(fields::TRACKING_PROMO_CODE_ID).map(PromoCodeId::new),
            click_id: get(fields::TRACKING_CLICK_ID).map(str::to_string),
        });

        Self {
            account_id: record.id,
            membership_status: record.status,
            subscriber_id: get(fields::SUBSCRIBER_ID).and_then(|v| SubscriberId::new(v).ok()),
            last_transaction_id: get(fields::LAST_TRANSACTION_ID)
                .and_then(|v| TransactionId::new(v).ok()),
            next_charge_on: date(fields::NEXT_CHARGE_ON),
            membership_expires_on: date(fields::MEMBERSHIP_EXPIRES_ON),
            plan_id: number(fields::PLAN_ID).map(PlanId::new),
            last_amount,
            purchased_content_ids: purchased,
            tracking,
        }
    }

    /// Metadata writes needed to move the store from `self` to `next`.
    /// `None` deletes the key.
    pub fn field_changes(&self, next: &AccountState) -> Vec<(&'static str, Option<String>)> {
        let mut changes = Vec::new();
        let mut diff = |key: &'static str, old: Option<String>, new: Option<String>| {
            if old != new {
                changes.push((key, new));
            }
        };

        diff(
            fields::SUBSCRIBER_ID,
            self.subscriber_id.as_ref().map(|s| s.as_str().to_string()),
            next.subscriber_id.as_ref().map(|s| s.as_str().to_string()),
        );
        diff(
            fields::LAST_TRANSACTION_ID,
            self.last_transaction_id.as_ref().map(|t| t.as_str().to_string()),
            next.last_transaction_id.as_ref().map(|t| t.as_str().to_string()),
        );
        diff(
            fields::NEXT_CHARGE_ON,
            self.next_charge_on.map(|d| d.to_string()),
            next.next_charge_on.map(|d| d.to_string()),
        );
        diff(
            fields::MEMBERSHIP_EXPIRES_ON,
            self.membership_expires_on.map(|d| d.to_string()),
            next.membership_expires_on.map(|d| d.to_string()),
        );
        diff(
            fields::PLAN_ID,
            self.plan_id.map(|p| p.to_string()),
            next.plan_id.map(|p| p.to_string()),
        );
        diff(
            fields::LAST_AMOUNT,
            self.last_amount.map(|m| m.amount().to_string()),
            next.last_amount.map(|m| m.amount().to_string()),
        );
        diff(
            fields::LAST_CURRENCY,
            self.last_amount.map(|m| m.currency().to_string()),
            next.last_amount.map(|m| m.currency().to_string()),
        );
        changes
    }
}

/// A classified webhook addressed to one account, with reference and
/// attribution already resolved.
#[derive(Debug, Clone)]
pub struct AccountEvent {
    pub kind: EventKind,
    pub transaction_id: Option<TransactionId>,
    pub subscriber_id: Option<SubscriberId>,
    pub parent_transaction_id: Option<TransactionId>,
    pub order_type: OrderType,
    pub one_time: bool,
    pub money: Money,
    pub next_charge_on: DateField,
    pub expires_on: DateField,
    pub reference_id: String,
    pub reference: ReferenceData,
    pub attribution: AttributionRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionIntent {
    pub affiliate_id: AffiliateId,
    pub kind: CommissionKind,
    pub transaction_id: TransactionId,
    pub plan_id: Option<PlanId>,
    pub sale: Money,
    pub promo_code_id: Option<PromoCodeId>,
    pub click_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub account_id: AccountId,
    pub event: String,
    pub status: MembershipStatus,
    pub transaction_id: Option<String>,
    pub amount: Option<Money>,
    pub content_id: Option<ContentId>,
}

impl fmt::Display for EventSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account {}: {} -> {}", self.account_id, self.event, self.status)?;
        if let Some(amount) = &self.amount {
            write!(f, " ({} {})", amount.amount(), amount.currency())?;
        }
        if let Some(content) = self.content_id {
            write!(f, " content {content}")?;
        }
        Ok(())
    }
}

/// Side effect requested by a transition. Only the dispatcher executes these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    GrantAccess {
        content_id: ContentId,
    },
    RevokeAccess {
        content_id: ContentId,
    },
    CancelAtProvider {
        subscriber_id: SubscriberId,
    },
    BanAccount {
        reason: String,
    },
    IncrementPromoUsage {
        promo_code_id: PromoCodeId,
        transaction_id: TransactionId,
    },
    RecordCommission(CommissionIntent),
    VoidCommissions {
        transaction_id: TransactionId,
    },
    Notify(EventSummary),
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: AccountState,
    pub ledger_entry: Option<TransactionRecord>,
    pub intents: Vec<Intent>,
    /// Conditions worth a log line that do not stop the transition.
    pub warnings: Vec<&'static str>,
}

/// Applies one event to one account. Pure: all I/O is expressed as
/// [`Intent`]s and the optional ledger entry.
pub fn apply(state: &AccountState, event: &AccountEvent) -> Transition {
    use MembershipStatus as S;

    let mut next = state.clone();
    let mut intents = Vec::new();
    let mut warnings = Vec::new();
    let banned = state.membership_status == S::Banned;
    let mut granted = None;

    match event.kind {
        EventKind::SubscriptionApproved => {
            next.membership_status = S::Active;
            if let Some(sub) = &event.subscriber_id {
                next.subscriber_id = Some(sub.clone());
            }
            next.last_transaction_id = event.transaction_id.clone();
            next.last_amount = Some(event.money);
            set_date(&mut next.next_charge_on, event.next_charge_on);
            set_date(&mut next.membership_expires_on, event.expires_on);
            if let Some(plan) = event.reference.plan_id {
                next.plan_id = Some(plan);
            }
            push_promo_usage(event, &mut intents);
            push_commission(event, CommissionKind::Signup, &mut intents);
        }

        EventKind::PurchaseApproved => {
            match event.reference.content_id {
                Some(content_id) => {
                    if next.purchased_content_ids.insert(content_id) {
                        intents.push(Intent::GrantAccess { content_id });
                    }
                    granted = Some(content_id);
                }
                None => warnings.push("purchase reference carries no content id, access not granted"),
            }
            push_promo_usage(event, &mut intents);
            push_commission(event, CommissionKind::Ppv, &mut intents);
        }

        EventKind::Rebill => {
            if banned {
                warnings.push("rebill for banned account, status kept");
            } else {
                next.membership_status = S::Active;
            }
            set_date(&mut next.next_charge_on, event.next_charge_on);
            if let Some(sub) = &event.subscriber_id {
                if next.subscriber_id.as_ref() != Some(sub) {
                    next.subscriber_id = Some(sub.clone());
                }
            }
            next.last_transaction_id = event.transaction_id.clone();
            next.last_amount = Some(event.money);
            if !banned {
                push_commission(event, CommissionKind::Rebill, &mut intents);
            }
        }

        EventKind::Cancel => {
            if banned {
                warnings.push("cancel for banned account, status kept");
            } else {
                next.membership_status = S::Cancelled;
            }
            if let DateField::Set(d) = event.expires_on {
                next.membership_expires_on = Some(d);
            }
            if event.next_charge_on == DateField::Cleared {
                next.next_charge_on = None;
            }
        }

        EventKind::Expiry => {
            if banned {
                warnings.push("expiry for banned account, status kept");
            } else {
                next.membership_status = S::Expired;
            }
        }

        EventKind::Uncancel => {
            if banned {
                warnings.push("uncancel for banned account, status kept");
            } else {
                next.membership_status = S::Active;
            }
            if let DateField::Set(d) = event.next_charge_on {
                next.next_charge_on = Some(d);
            }
        }

        // Never touches membership_status: an extend that lands after a
        // cancel must leave the account cancelled.
        EventKind::Extend => {
            if event.one_time {
                if let Some(d) = event.expires_on.date().or(event.next_charge_on.date()) {
                    next.membership_expires_on = Some(d);
                }
            } else {
                if let DateField::Set(d) = event.next_charge_on {
                    next.next_charge_on = Some(d);
                }
                if let DateField::Set(d) = event.expires_on {
                    next.membership_expires_on = Some(d);
                }
            }
        }

        EventKind::Refund(kind) => {
            next.membership_status = S::Banned;

            if let Some(content_id) = event.reference.content_id {
                if next.purchased_content_ids.remove(&content_id) {
                    intents.push(Intent::RevokeAccess { content_id });
                }
            }

            if matches!(state.membership_status, S::Active | S::Cancelled) {
                if let Some(subscriber_id) = state.subscriber_id.clone() {
                    intents.push(Intent::CancelAtProvider { subscriber_id });
                }
                next.next_charge_on = None;
            }

            if let Some(parent) = &event.parent_transaction_id {
                intents.push(Intent::VoidCommissions {
                    transaction_id: parent.clone(),
                });
            }

            let tx = event
                .transaction_id
                .as_ref()
                .map(|t| t.as_str())
                .unwrap_or("unknown");
            intents.push(Intent::BanAccount {
                reason: format!("{kind} on transaction {tx}"),
            });
        }

        EventKind::Unknown => {}
    }

    let ledger_entry = ledger_entry(state.account_id, &next, event);

    if event.kind != EventKind::Unknown {
        intents.push(Intent::Notify(EventSummary {
            account_id: state.account_id,
            event: event.kind.to_string(),
            status: next.membership_status,
            transaction_id: event.transaction_id.as_ref().map(|t| t.as_str().to_string()),
            amount: event.kind.is_financial().then_some(event.money),
            content_id: granted.or(match event.kind {
                EventKind::Refund(_) => event.reference.content_id,
                _ => None,
            }),
        }));
    }

    Transition {
        state: next,
        ledger_entry,
        intents,
        warnings,
    }
}

fn set_date(slot: &mut Option<NaiveDate>, field: DateField) {
    match field {
        DateField::Set(d) => *slot = Some(d),
        DateField::Cleared => *slot = None,
        DateField::Absent => {}
    }
}

fn push_promo_usage(event: &AccountEvent, intents: &mut Vec<Intent>) {
    if let (Some(promo_code_id), Some(transaction_id)) =
        (event.attribution.redeemed_promo_code_id, &event.transaction_id)
    {
        intents.push(Intent::IncrementPromoUsage {
            promo_code_id,
            transaction_id: transaction_id.clone(),
        });
    }
}

fn push_commission(event: &AccountEvent, kind: CommissionKind, intents: &mut Vec<Intent>) {
    let (Some(affiliate_id), Some(transaction_id)) =
        (event.attribution.affiliate_id, &event.transaction_id)
    else {
        return;
    };
    intents.push(Intent::RecordCommission(CommissionIntent {
        affiliate_id,
        kind,
        transaction_id: transaction_id.clone(),
        plan_id: event.reference.plan_id,
        sale: event.money,
        promo_code_id: event.attribution.promo_code_id,
        click_id: event.attribution.click_id.clone(),
    }));
}

fn ledger_entry(
    account_id: AccountId,
    next: &AccountState,
    event: &AccountEvent,
) -> Option<TransactionRecord> {
    let status = TransactionStatus::for_event(event.kind)?;
    let transaction_id = event.transaction_id.clone()?;
    Some(TransactionRecord {
        transaction_id,
        account_id,
        subscriber_id: event
            .subscriber_id
            .clone()
            .or_else(|| next.subscriber_id.clone()),
        money: event.money,
        status,
        order_type: event.order_type,
        reference_id: event.reference_id.clone(),
        parent_transaction_id: event.parent_transaction_id.clone(),
        affiliate_code: event.reference.affiliate_code.clone(),
        promo_code: event.reference.promo_code.clone(),
        signup_source: event.reference.signup_source.clone(),
        plan_id: event.reference.plan_id.or(next.plan_id),
    })
}
