#![allow(dead_code)]

use member_sync::config::CommissionRates;
use member_sync::domain::account::{AccountEvent, EventSummary};
use member_sync::domain::attribution::AttributionRecord;
use member_sync::domain::error::PipelineError;
use member_sync::domain::event::EventKind;
use member_sync::domain::id::{AccountId, SubscriberId, TransactionId};
use member_sync::domain::money::{Currency, Money};
use member_sync::domain::payload::{DateField, OrderType};
use member_sync::domain::reference::ReferenceData;
use member_sync::domain::signature::SignatureVerifier;
use member_sync::infra::memory::{
    MemoryAccountStore, MemoryContentAccess, MemoryLedger, MemoryPromoLedger, ScriptedProvider,
};
use member_sync::services::locks::AccountLocks;
use member_sync::services::notifier::NotificationQueue;
use member_sync::services::webhook_pipeline::{
    Collaborators, PipelineSettings, WebhookOutcome, WebhookPipeline,
};
use member_sync::AppState;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const SECRET: &str = "whsec_test_3f1c";

/// 25% signup, 10% rebill, 20% ppv.
pub fn test_rates() -> CommissionRates {
    CommissionRates {
        signup_bps: Some(2500),
        rebill_bps: Some(1000),
        ppv_bps: Some(2000),
    }
}

/// Pipeline wired to in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub pipeline: Arc<WebhookPipeline>,
    pub accounts: Arc<MemoryAccountStore>,
    pub access: Arc<MemoryContentAccess>,
    pub promos: Arc<MemoryPromoLedger>,
    pub provider: Arc<ScriptedProvider>,
    pub ledger: Arc<MemoryLedger>,
    pub locks: AccountLocks,
    pub signer: SignatureVerifier,
    notifications: Mutex<mpsc::Receiver<EventSummary>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_provider(ScriptedProvider::default())
    }

    pub fn with_provider(provider: ScriptedProvider) -> Self {
        let accounts = Arc::new(MemoryAccountStore::default());
        let access = Arc::new(MemoryContentAccess::default());
        let promos = Arc::new(MemoryPromoLedger::default());
        let provider = Arc::new(provider);
        let ledger = Arc::new(MemoryLedger::default());
        let locks = AccountLocks::new();
        let (queue, rx) = NotificationQueue::channel(256);

        let pipeline = WebhookPipeline::new(
            SignatureVerifier::new(SECRET),
            Collaborators {
                accounts: accounts.clone(),
                access: access.clone(),
                promos: promos.clone(),
                provider: provider.clone(),
                ledger: ledger.clone(),
            },
            queue,
            locks.clone(),
            PipelineSettings {
                default_currency: Currency::Usd,
                commission_rates: test_rates(),
            },
        );

        Self {
            pipeline: Arc::new(pipeline),
            accounts,
            access,
            promos,
            provider,
            ledger,
            locks,
            signer: SignatureVerifier::new(SECRET),
            notifications: Mutex::new(rx),
        }
    }

    pub fn sign(&self, payload: &serde_json::Value) -> String {
        self.signer.sign(payload.to_string().as_bytes())
    }

    pub async fn deliver(
        &self,
        payload: &serde_json::Value,
    ) -> Result<WebhookOutcome, PipelineError> {
        self.pipeline.process(&self.sign(payload)).await
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            pipeline: self.pipeline.clone(),
        }
    }

    /// Notifications enqueued so far.
    pub fn drain_notifications(&self) -> Vec<EventSummary> {
        let mut rx = self.notifications.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(summary) = rx.try_recv() {
            out.push(summary);
        }
        out
    }
}

// ── Payload builders ───────────────────────────────────────────────────────

pub fn subscription_approved(reference: &str, tx: &str, sale: &str) -> serde_json::Value {
    serde_json::json!({
        "postbackType": "approved",
        "orderType": "subscription",
        "subscriptionType": "recurring",
        "referenceId": reference,
        "saleId": sale,
        "transactionId": tx,
        "priceAmount": "19.95",
        "priceCurrency": "USD",
        "nextChargeOn": "2025-02-01",
    })
}

pub fn purchase_approved(reference: &str, tx: &str) -> serde_json::Value {
    serde_json::json!({
        "postbackType": "approved",
        "orderType": "purchase",
        "referenceId": reference,
        "transactionId": tx,
        "priceAmount": 9.99,
        "priceCurrency": "USD",
    })
}

pub fn event_for(
    postback: &str,
    reference: &str,
    sale: &str,
    extra: serde_json::Value,
) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "postbackType": postback,
        "orderType": "subscription",
        "referenceId": reference,
        "saleId": sale,
    });
    if let (Some(base), serde_json::Value::Object(extra)) = (payload.as_object_mut(), extra) {
        base.extend(extra);
    }
    payload
}

// ── Domain builders ────────────────────────────────────────────────────────

pub fn account(id: u64) -> AccountId {
    AccountId::new(id)
}

pub fn tx(id: &str) -> TransactionId {
    TransactionId::new(id).unwrap()
}

pub fn sub(id: &str) -> SubscriberId {
    SubscriberId::new(id).unwrap()
}

/// Event with every optional field absent.
pub fn event(kind: EventKind) -> AccountEvent {
    AccountEvent {
        kind,
        transaction_id: None,
        subscriber_id: None,
        parent_transaction_id: None,
        order_type: OrderType::Subscription,
        one_time: false,
        money: Money::zero(Currency::Usd),
        next_charge_on: DateField::Absent,
        expires_on: DateField::Absent,
        reference_id: String::new(),
        reference: ReferenceData::default(),
        attribution: AttributionRecord::default(),
    }
}

pub fn date(s: &str) -> chrono::NaiveDate {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}
