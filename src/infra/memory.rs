//! In-process implementations of every collaborator trait. They back the
//! test suite and local runs without Postgres; each keeps the same
//! insert-if-absent semantics as its database counterpart.

use {
    crate::domain::{
        account::{AccountRecord, EventSummary, MembershipStatus, fields},
        attribution::{CommissionStatus, NewCommission, PendingCommission, PromoCode},
        error::PipelineError,
        id::{AccountId, ContentId, PromoCodeId, SubscriberId, TransactionId},
        ledger::{AppendOutcome, JournalEntry, JournalOutcome, TransactionRecord},
        ports::{
            AccountStore, BoxFuture, CancelOutcome, ContentAccessStore, NotificationSink,
            PromoLedger, ProviderClient, TransactionLedger,
        },
    },
    chrono::{DateTime, Utc},
    std::{
        collections::{BTreeMap, BTreeSet, HashMap, HashSet},
        sync::{Mutex, MutexGuard, PoisonError},
    },
    uuid::Uuid,
};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ready<'a, T: Send + 'a>(value: Result<T, PipelineError>) -> BoxFuture<'a, T> {
    Box::pin(std::future::ready(value))
}

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<AccountId, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn insert(&self, record: AccountRecord) {
        guard(&self.accounts).insert(record.id, record);
    }

    pub fn record(&self, id: AccountId) -> AccountRecord {
        guard(&self.accounts)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| AccountRecord::new(id))
    }

    pub fn status(&self, id: AccountId) -> MembershipStatus {
        self.record(id).status
    }

    pub fn field(&self, id: AccountId, key: &str) -> Option<String> {
        self.record(id).field(key).map(str::to_string)
    }
}

impl AccountStore for MemoryAccountStore {
    fn get_account(&self, id: AccountId) -> BoxFuture<'_, Option<AccountRecord>> {
        ready(Ok(Some(self.record(id))))
    }

    fn find_by_subscriber<'a>(
        &'a self,
        subscriber_id: &'a SubscriberId,
    ) -> BoxFuture<'a, Option<AccountId>> {
        let found = guard(&self.accounts)
            .values()
            .find(|r| r.field(fields::SUBSCRIBER_ID) == Some(subscriber_id.as_str()))
            .map(|r| r.id);
        ready(Ok(found))
    }

    fn set_membership_status(&self, id: AccountId, status: MembershipStatus) -> BoxFuture<'_, ()> {
        guard(&self.accounts)
            .entry(id)
            .or_insert_with(|| AccountRecord::new(id))
            .status = status;
        ready(Ok(()))
    }

    fn set_account_field<'a>(
        &'a self,
        id: AccountId,
        key: &'a str,
        value: Option<&'a str>,
    ) -> BoxFuture<'a, ()> {
        let mut accounts = guard(&self.accounts);
        let record = accounts.entry(id).or_insert_with(|| AccountRecord::new(id));
        match value {
            Some(v) => {
                record.fields.insert(key.to_string(), v.to_string());
            }
            None => {
                record.fields.remove(key);
            }
        }
        ready(Ok(()))
    }
}

#[derive(Default)]
pub struct MemoryContentAccess {
    grants: Mutex<HashMap<AccountId, BTreeSet<ContentId>>>,
}

impl MemoryContentAccess {
    pub fn has_access(&self, account: AccountId, content: ContentId) -> bool {
        guard(&self.grants)
            .get(&account)
            .is_some_and(|set| set.contains(&content))
    }
}

impl ContentAccessStore for MemoryContentAccess {
    fn grant_access(&self, account: AccountId, content: ContentId) -> BoxFuture<'_, bool> {
        let added = guard(&self.grants).entry(account).or_default().insert(content);
        ready(Ok(added))
    }

    fn revoke_access(&self, account: AccountId, content: ContentId) -> BoxFuture<'_, bool> {
        let removed = guard(&self.grants)
            .get_mut(&account)
            .is_some_and(|set| set.remove(&content));
        ready(Ok(removed))
    }

    fn list_access(&self, account: AccountId) -> BoxFuture<'_, BTreeSet<ContentId>> {
        let set = guard(&self.grants).get(&account).cloned().unwrap_or_default();
        ready(Ok(set))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCommission {
    pub commission: NewCommission,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct PromoBook {
    codes: Vec<PromoCode>,
    usages: HashSet<(PromoCodeId, String)>,
    usage_counts: HashMap<PromoCodeId, u64>,
    commissions: Vec<StoredCommission>,
}

#[derive(Default)]
pub struct MemoryPromoLedger {
    book: Mutex<PromoBook>,
}

impl MemoryPromoLedger {
    pub fn add_promo(&self, code: PromoCode) {
        guard(&self.book).codes.push(code);
    }

    pub fn usage_count(&self, id: PromoCodeId) -> u64 {
        guard(&self.book).usage_counts.get(&id).copied().unwrap_or(0)
    }

    pub fn commissions(&self) -> Vec<StoredCommission> {
        guard(&self.book).commissions.clone()
    }

    /// Shifts every commission's creation time back, as if the hold period
    /// had elapsed.
    pub fn age_commissions(&self, by: chrono::Duration) {
        for c in guard(&self.book).commissions.iter_mut() {
            c.created_at -= by;
        }
    }

    fn transition(&self, id: Uuid, to: CommissionStatus) -> bool {
        let mut book = guard(&self.book);
        match book
            .commissions
            .iter_mut()
            .find(|c| c.commission.id == id && c.status == CommissionStatus::Pending)
        {
            Some(c) => {
                c.status = to;
                true
            }
            None => false,
        }
    }
}

impl PromoLedger for MemoryPromoLedger {
    fn lookup_promo_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Option<PromoCode>> {
        let found = guard(&self.book)
            .codes
            .iter()
            .find(|p| p.code.eq_ignore_ascii_case(code))
            .cloned();
        ready(Ok(found))
    }

    fn increment_usage<'a>(
        &'a self,
        promo_code_id: PromoCodeId,
        transaction_id: &'a TransactionId,
    ) -> BoxFuture<'a, bool> {
        let mut book = guard(&self.book);
        let inserted = book
            .usages
            .insert((promo_code_id, transaction_id.as_str().to_string()));
        if inserted {
            *book.usage_counts.entry(promo_code_id).or_default() += 1;
        }
        ready(Ok(inserted))
    }

    fn record_commission<'a>(&'a self, commission: &'a NewCommission) -> BoxFuture<'a, bool> {
        let mut book = guard(&self.book);
        let exists = book.commissions.iter().any(|c| {
            c.commission.transaction_id == commission.transaction_id
                && c.commission.affiliate_id == commission.affiliate_id
        });
        if !exists {
            book.commissions.push(StoredCommission {
                commission: commission.clone(),
                status: CommissionStatus::Pending,
                created_at: Utc::now(),
            });
        }
        ready(Ok(!exists))
    }

    fn void_commissions<'a>(&'a self, transaction_id: &'a TransactionId) -> BoxFuture<'a, u64> {
        let mut voided = 0;
        for c in guard(&self.book).commissions.iter_mut() {
            if &c.commission.transaction_id == transaction_id && c.status != CommissionStatus::Void {
                c.status = CommissionStatus::Void;
                voided += 1;
            }
        }
        ready(Ok(voided))
    }

    fn pending_commissions(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Vec<PendingCommission>> {
        let pending = guard(&self.book)
            .commissions
            .iter()
            .filter(|c| c.status == CommissionStatus::Pending && c.created_at < created_before)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|c| PendingCommission {
                id: c.commission.id,
                affiliate_id: c.commission.affiliate_id,
                account_id: c.commission.account_id,
                transaction_id: c.commission.transaction_id.clone(),
                created_at: c.created_at,
            })
            .collect();
        ready(Ok(pending))
    }

    fn approve_commission(&self, id: Uuid) -> BoxFuture<'_, bool> {
        ready(Ok(self.transition(id, CommissionStatus::Approved)))
    }

    fn void_commission(&self, id: Uuid) -> BoxFuture<'_, bool> {
        ready(Ok(self.transition(id, CommissionStatus::Void)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderBehavior {
    #[default]
    Cancel,
    AlreadyCancelled,
    Fail,
}

/// Provider stand-in that records every cancellation request.
#[derive(Default)]
pub struct ScriptedProvider {
    behavior: Mutex<ProviderBehavior>,
    calls: Mutex<Vec<SubscriberId>>,
}

impl ScriptedProvider {
    pub fn with_behavior(behavior: ProviderBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            ..Self::default()
        }
    }

    pub fn set_behavior(&self, behavior: ProviderBehavior) {
        *guard(&self.behavior) = behavior;
    }

    pub fn cancellations(&self) -> Vec<SubscriberId> {
        guard(&self.calls).clone()
    }
}

impl ProviderClient for ScriptedProvider {
    fn cancel_subscription<'a>(
        &'a self,
        subscriber_id: &'a SubscriberId,
    ) -> BoxFuture<'a, CancelOutcome> {
        guard(&self.calls).push(subscriber_id.clone());
        let result = match *guard(&self.behavior) {
            ProviderBehavior::Cancel => Ok(CancelOutcome::Cancelled),
            ProviderBehavior::AlreadyCancelled => Ok(CancelOutcome::AlreadyCancelled),
            ProviderBehavior::Fail => Err(PipelineError::Provider(format!(
                "cancel {subscriber_id} rejected"
            ))),
        };
        ready(result)
    }
}

/// Collects delivered notifications; fails the first `failures` attempts.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<EventSummary>>,
    failures: Mutex<u32>,
}

impl RecordingSink {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<EventSummary> {
        guard(&self.delivered).clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify<'a>(&'a self, summary: &'a EventSummary) -> BoxFuture<'a, ()> {
        let mut failures = guard(&self.failures);
        if *failures > 0 {
            *failures -= 1;
            return ready(Err(PipelineError::downstream("notification", "sink unavailable")));
        }
        drop(failures);
        guard(&self.delivered).push(summary.clone());
        ready(Ok(()))
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    transactions: Mutex<BTreeMap<String, TransactionRecord>>,
    journal: Mutex<Vec<JournalEntry>>,
}

impl MemoryLedger {
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        guard(&self.transactions).values().cloned().collect()
    }

    pub fn transaction(&self, id: &str) -> Option<TransactionRecord> {
        guard(&self.transactions).get(id).cloned()
    }

    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        guard(&self.journal).clone()
    }

    pub fn outcomes(&self) -> Vec<JournalOutcome> {
        guard(&self.journal).iter().map(|e| e.outcome).collect()
    }
}

impl TransactionLedger for MemoryLedger {
    fn already_processed<'a>(&'a self, transaction_id: &'a TransactionId) -> BoxFuture<'a, bool> {
        let seen = guard(&self.transactions).contains_key(transaction_id.as_str());
        ready(Ok(seen))
    }

    fn already_applied<'a>(
        &'a self,
        transaction_id: &'a TransactionId,
        postback_type: &'a str,
    ) -> BoxFuture<'a, bool> {
        let seen = guard(&self.journal).iter().any(|e| {
            e.outcome.is_applied()
                && e.postback_type == postback_type
                && e.transaction_id.as_deref() == Some(transaction_id.as_str())
        });
        ready(Ok(seen))
    }

    fn append<'a>(&'a self, record: &'a TransactionRecord) -> BoxFuture<'a, AppendOutcome> {
        let mut txs = guard(&self.transactions);
        let key = record.transaction_id.as_str().to_string();
        let outcome = if txs.contains_key(&key) {
            AppendOutcome::Duplicate
        } else {
            txs.insert(key, record.clone());
            AppendOutcome::Recorded
        };
        ready(Ok(outcome))
    }

    fn journal<'a>(&'a self, entry: &'a JournalEntry) -> BoxFuture<'a, ()> {
        guard(&self.journal).push(entry.clone());
        ready(Ok(()))
    }
}
