//! Collaborators the pipeline talks to. Everything outside the core
//! (account storage, content access, affiliate books, the provider API,
//! chat/email delivery) sits behind one of these traits.

use {
    super::{
        account::{AccountRecord, EventSummary, MembershipStatus},
        attribution::{NewCommission, PendingCommission, PromoCode},
        error::PipelineError,
        id::{AccountId, ContentId, PromoCodeId, SubscriberId, TransactionId},
        ledger::{AppendOutcome, JournalEntry, TransactionRecord},
    },
    chrono::{DateTime, Utc},
    std::{collections::BTreeSet, future::Future, pin::Pin},
    uuid::Uuid,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send + 'a>>;

pub trait AccountStore: Send + Sync {
    /// Membership state is created implicitly: an id the store has never
    /// seen comes back as a record with status `none`.
    fn get_account(&self, id: AccountId) -> BoxFuture<'_, Option<AccountRecord>>;

    fn find_by_subscriber<'a>(
        &'a self,
        subscriber_id: &'a SubscriberId,
    ) -> BoxFuture<'a, Option<AccountId>>;

    fn set_membership_status(&self, id: AccountId, status: MembershipStatus) -> BoxFuture<'_, ()>;

    /// `None` removes the key.
    fn set_account_field<'a>(
        &'a self,
        id: AccountId,
        key: &'a str,
        value: Option<&'a str>,
    ) -> BoxFuture<'a, ()>;
}

pub trait ContentAccessStore: Send + Sync {
    /// `true` if access was newly granted.
    fn grant_access(&self, account: AccountId, content: ContentId) -> BoxFuture<'_, bool>;

    /// `true` if access existed and was removed.
    fn revoke_access(&self, account: AccountId, content: ContentId) -> BoxFuture<'_, bool>;

    fn list_access(&self, account: AccountId) -> BoxFuture<'_, BTreeSet<ContentId>>;
}

pub trait PromoLedger: Send + Sync {
    fn lookup_promo_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Option<PromoCode>>;

    /// Counts one use per `(promo_code_id, transaction_id)`; `false` if this
    /// transaction was already counted.
    fn increment_usage<'a>(
        &'a self,
        promo_code_id: PromoCodeId,
        transaction_id: &'a TransactionId,
    ) -> BoxFuture<'a, bool>;

    /// `false` if a commission for this transaction and affiliate exists.
    fn record_commission<'a>(&'a self, commission: &'a NewCommission) -> BoxFuture<'a, bool>;

    /// Voids every non-void commission recorded for `transaction_id`.
    fn void_commissions<'a>(&'a self, transaction_id: &'a TransactionId) -> BoxFuture<'a, u64>;

    fn pending_commissions(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Vec<PendingCommission>>;

    /// `false` if the commission is no longer pending.
    fn approve_commission(&self, id: Uuid) -> BoxFuture<'_, bool>;

    fn void_commission(&self, id: Uuid) -> BoxFuture<'_, bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCancelled,
}

pub trait ProviderClient: Send + Sync {
    fn cancel_subscription<'a>(
        &'a self,
        subscriber_id: &'a SubscriberId,
    ) -> BoxFuture<'a, CancelOutcome>;
}

pub trait NotificationSink: Send + Sync {
    fn notify<'a>(&'a self, summary: &'a EventSummary) -> BoxFuture<'a, ()>;
}

pub trait TransactionLedger: Send + Sync {
    fn already_processed<'a>(&'a self, transaction_id: &'a TransactionId) -> BoxFuture<'a, bool>;

    /// Replay guard for events that never reach the ledger: `true` once an
    /// event with this `transactionId` and postback type has been applied.
    fn already_applied<'a>(
        &'a self,
        transaction_id: &'a TransactionId,
        postback_type: &'a str,
    ) -> BoxFuture<'a, bool>;

    /// Insert-if-absent keyed by `transaction_id`.
    fn append<'a>(&'a self, record: &'a TransactionRecord) -> BoxFuture<'a, AppendOutcome>;

    fn journal<'a>(&'a self, entry: &'a JournalEntry) -> BoxFuture<'a, ()>;
}
