use {
    super::{
        attribution::AttributionResolver,
        dispatcher::{DispatchReport, Dispatcher, DownstreamFailure},
        locks::AccountLocks,
        notifier::NotificationQueue,
    },
    crate::{
        config::CommissionRates,
        domain::{
            account::{self, AccountEvent, AccountRecord, AccountState, MembershipStatus},
            attribution::AttributionRecord,
            error::PipelineError,
            event::{EventKind, classify},
            id::AccountId,
            ledger::{AppendOutcome, JournalEntry, JournalOutcome},
            money::{Currency, Money},
            payload::WebhookPayload,
            ports::{
                AccountStore, ContentAccessStore, PromoLedger, ProviderClient, TransactionLedger,
            },
            reference::{ReferenceData, ReferenceDecoder},
            signature::{InvalidReason, SignatureVerifier, Verification},
        },
    },
    std::sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownEvent,
    UnresolvedAccount,
    InvalidData(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Transition applied. `downstream_failures` counts side effects that
    /// failed after the event was recorded.
    Applied {
        account_id: AccountId,
        kind: EventKind,
        status: MembershipStatus,
        downstream_failures: usize,
    },
    /// `transactionId` already on the ledger: redelivery, nothing repeated.
    Duplicate { account_id: AccountId },
    Ignored(IgnoreReason),
}

impl WebhookOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Applied {
                downstream_failures: 0,
                ..
            } => "applied",
            Self::Applied { .. } => "applied_with_failures",
            Self::Duplicate { .. } => "duplicate",
            Self::Ignored(IgnoreReason::UnknownEvent) => "ignored_unknown_event",
            Self::Ignored(IgnoreReason::UnresolvedAccount) => "ignored_unresolved_account",
            Self::Ignored(IgnoreReason::InvalidData(_)) => "ignored_invalid_data",
        }
    }
}

pub struct Collaborators {
    pub accounts: Arc<dyn AccountStore>,
    pub access: Arc<dyn ContentAccessStore>,
    pub promos: Arc<dyn PromoLedger>,
    pub provider: Arc<dyn ProviderClient>,
    pub ledger: Arc<dyn TransactionLedger>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub default_currency: Currency,
    pub commission_rates: CommissionRates,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_currency: Currency::Usd,
            commission_rates: CommissionRates::default(),
        }
    }
}

/// verify → classify → decode → resolve account → (locked) apply → ledger →
/// dispatch.
pub struct WebhookPipeline {
    verifier: SignatureVerifier,
    decoder: ReferenceDecoder,
    resolver: AttributionResolver,
    ledger: Arc<dyn TransactionLedger>,
    accounts: Arc<dyn AccountStore>,
    access: Arc<dyn ContentAccessStore>,
    dispatcher: Dispatcher,
    locks: AccountLocks,
    default_currency: Currency,
}

impl WebhookPipeline {
    pub fn new(
        verifier: SignatureVerifier,
        collaborators: Collaborators,
        notifications: NotificationQueue,
        locks: AccountLocks,
        settings: PipelineSettings,
    ) -> Self {
        let Collaborators {
            accounts,
            access,
            promos,
            provider,
            ledger,
        } = collaborators;

        Self {
            verifier,
            decoder: ReferenceDecoder::default(),
            resolver: AttributionResolver::new(promos.clone()),
            dispatcher: Dispatcher::new(
                accounts.clone(),
                access.clone(),
                promos,
                provider,
                notifications,
                settings.commission_rates,
            ),
            ledger,
            accounts,
            access,
            locks,
            default_currency: settings.default_currency,
        }
    }

    /// Processes one signed webhook body. `Err` means the provider must not
    /// get a success acknowledgment; every `Ok` is acknowledged.
    #[tracing::instrument(
        name = "webhook",
        skip_all,
        fields(
            transaction_id = tracing::field::Empty,
            postback_type = tracing::field::Empty,
            account_id = tracing::field::Empty,
        )
    )]
    pub async fn process(&self, body: &str) -> Result<WebhookOutcome, PipelineError> {
        let payload_bytes = match self.verifier.verify(body) {
            Verification::Valid(bytes) => bytes,
            Verification::Invalid(InvalidReason::Malformed) => {
                return Err(PipelineError::Transport(
                    "body is not a three-segment base64url envelope".into(),
                ));
            }
            Verification::Invalid(InvalidReason::Mismatch) => {
                return Err(PipelineError::Auth("signature mismatch".into()));
            }
        };

        let raw: serde_json::Value = serde_json::from_slice(&payload_bytes)
            .map_err(|e| PipelineError::Transport(format!("payload is not JSON: {e}")))?;
        let payload = match WebhookPayload::from_json(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "verified payload does not fit schema, acknowledged without mutation");
                let msg = e.to_string();
                let entry = JournalEntry::new(
                    raw_field(&raw, "transactionId").as_deref(),
                    raw_field(&raw, "postbackType").unwrap_or_else(|| "unknown".into()),
                    EventKind::Unknown,
                    JournalOutcome::IgnoredInvalidData,
                    raw,
                )
                .with_detail(serde_json::json!({ "error": msg }));
                self.ledger.journal(&entry).await?;
                return Ok(WebhookOutcome::Ignored(IgnoreReason::InvalidData(msg)));
            }
        };

        let span = tracing::Span::current();
        span.record(
            "postback_type",
            tracing::field::display(&payload.postback_type),
        );
        if let Some(tx) = &payload.transaction_id {
            span.record("transaction_id", tracing::field::display(tx));
        }

        let kind = classify(&payload);
        let postback = payload.postback_type.to_string();

        if kind == EventKind::Unknown {
            tracing::warn!(order_type = %payload.order_type, "unknown event kind, acknowledged without mutation");
            let entry = JournalEntry::new(
                payload.transaction_id.as_deref(),
                postback,
                kind,
                JournalOutcome::IgnoredUnknownEvent,
                raw,
            );
            self.ledger.journal(&entry).await?;
            return Ok(WebhookOutcome::Ignored(IgnoreReason::UnknownEvent));
        }

        let reference = self
            .decoder
            .decode(payload.reference_id.as_deref().unwrap_or_default());
        if !reference.is_recognized() {
            tracing::warn!(reference_id = ?payload.reference_id, "reference not decodable, attribution unavailable");
        }

        let event = match self.build_event(kind, &payload, reference) {
            Ok(event) => event,
            Err(PipelineError::Validation(msg)) => {
                tracing::warn!(event = %kind, "skipping invalid event data: {msg}");
                let entry = JournalEntry::new(
                    payload.transaction_id.as_deref(),
                    postback,
                    kind,
                    JournalOutcome::IgnoredInvalidData,
                    raw,
                )
                .with_detail(serde_json::json!({ "error": msg }));
                self.ledger.journal(&entry).await?;
                return Ok(WebhookOutcome::Ignored(IgnoreReason::InvalidData(msg)));
            }
            Err(e) => return Err(e),
        };

        let Some(account_id) = self.resolve_account(&event).await? else {
            tracing::warn!(event = %kind, sale_id = ?payload.sale_id, "no account for event, acknowledged without mutation");
            let entry = JournalEntry::new(
                payload.transaction_id.as_deref(),
                postback,
                kind,
                JournalOutcome::IgnoredUnresolvedAccount,
                raw,
            );
            self.ledger.journal(&entry).await?;
            return Ok(WebhookOutcome::Ignored(IgnoreReason::UnresolvedAccount));
        };
        span.record("account_id", tracing::field::display(account_id));

        self.apply_locked(account_id, event, postback, raw).await
    }

    fn build_event(
        &self,
        kind: EventKind,
        payload: &WebhookPayload,
        reference: ReferenceData,
    ) -> Result<AccountEvent, PipelineError> {
        let transaction_id = payload.transaction_id()?;
        if kind.is_financial() && transaction_id.is_none() {
            return Err(PipelineError::Validation(format!(
                "{kind} event without transactionId"
            )));
        }

        let money = if kind.is_financial() {
            payload.money(self.default_currency)?
        } else {
            payload
                .money(self.default_currency)
                .unwrap_or_else(|_| Money::zero(self.default_currency))
        };

        Ok(AccountEvent {
            kind,
            transaction_id,
            subscriber_id: payload.subscriber_id()?,
            parent_transaction_id: payload.parent_transaction_id()?,
            order_type: payload.order_type,
            one_time: payload.is_one_time(),
            money,
            next_charge_on: payload.next_charge_on,
            expires_on: payload.expires_on,
            reference_id: payload.reference_id.clone().unwrap_or_default(),
            reference,
            attribution: AttributionRecord::default(),
        })
    }

    /// The decoded reference names the account; failing that, the sale id
    /// stored on an earlier approval does.
    async fn resolve_account(&self, event: &AccountEvent) -> Result<Option<AccountId>, PipelineError> {
        if event.reference.account_id.is_known() {
            return Ok(Some(event.reference.account_id));
        }
        match &event.subscriber_id {
            Some(sub) => self.accounts.find_by_subscriber(sub).await,
            None => Ok(None),
        }
    }

    async fn apply_locked(
        &self,
        account_id: AccountId,
        mut event: AccountEvent,
        postback: String,
        raw: serde_json::Value,
    ) -> Result<WebhookOutcome, PipelineError> {
        let _guard = self.locks.lock(account_id).await;
        let tx_id = event.transaction_id.as_ref().map(|t| t.as_str().to_string());

        // Financial events are keyed on the ledger. The rest are keyed on
        // the journal by (transactionId, postbackType), since a cancel may
        // reuse the transaction id of the approval it ends.
        if let Some(tx) = &event.transaction_id {
            let seen = if event.kind.is_financial() {
                self.ledger.already_processed(tx).await?
            } else {
                self.ledger.already_applied(tx, &postback).await?
            };
            if seen {
                tracing::debug!("transaction already processed, duplicate delivery");
                self.journal_after_commit(
                    JournalEntry::new(
                        tx_id.as_deref(),
                        postback,
                        event.kind,
                        JournalOutcome::Duplicate,
                        raw,
                    )
                    .with_account(account_id),
                )
                .await;
                return Ok(WebhookOutcome::Duplicate { account_id });
            }
        }

        let record = self
            .accounts
            .get_account(account_id)
            .await?
            .unwrap_or_else(|| AccountRecord::new(account_id));
        let purchased = self.access.list_access(account_id).await?;
        let state = AccountState::from_record(&record, purchased);

        if matches!(
            event.kind,
            EventKind::SubscriptionApproved | EventKind::PurchaseApproved | EventKind::Rebill
        ) {
            event.attribution = self
                .resolver
                .resolve(&event.reference, state.tracking.as_ref())
                .await?;
        }

        let transition = account::apply(&state, &event);
        for warning in &transition.warnings {
            tracing::warn!(event = %event.kind, "{warning}");
        }

        let mut recorded = false;
        if let Some(entry) = &transition.ledger_entry {
            match self.ledger.append(entry).await? {
                AppendOutcome::Recorded => recorded = true,
                AppendOutcome::Duplicate => {
                    tracing::debug!("ledger already holds transaction, duplicate delivery");
                    self.journal_after_commit(JournalEntry::new(
                        tx_id.as_deref(),
                        postback,
                        event.kind,
                        JournalOutcome::Duplicate,
                        raw,
                    )
                    .with_account(account_id))
                    .await;
                    return Ok(WebhookOutcome::Duplicate { account_id });
                }
            }
        }

        // A recorded transaction is acknowledged no matter what fails below.
        let mut failures = Vec::new();
        if let Err(e) = self.persist(&state, &transition.state).await {
            if !recorded {
                return Err(e);
            }
            tracing::error!(error = %e, "account state write failed after ledger write, needs manual reconciliation");
            failures.push(DownstreamFailure {
                intent: "persist_state",
                error: e.to_string(),
            });
        }

        let DispatchReport {
            executed,
            failures: dispatch_failures,
        } = self
            .dispatcher
            .dispatch(account_id, transition.intents)
            .await;
        failures.extend(dispatch_failures);

        let status = transition.state.membership_status;
        let outcome = if failures.is_empty() {
            JournalOutcome::Applied
        } else {
            JournalOutcome::DownstreamFailed
        };
        self.journal_after_commit(
            JournalEntry::new(tx_id.as_deref(), postback, event.kind, outcome, raw)
                .with_account(account_id)
                .with_detail(serde_json::json!({
                    "from_status": state.membership_status.as_str(),
                    "to_status": status.as_str(),
                    "side_effects": executed,
                    "failures": failures,
                })),
        )
        .await;

        tracing::info!(
            event = %event.kind,
            from = %state.membership_status,
            to = %status,
            side_effects = executed,
            failures = failures.len(),
            "webhook applied"
        );

        Ok(WebhookOutcome::Applied {
            account_id,
            kind: event.kind,
            status,
            downstream_failures: failures.len(),
        })
    }

    async fn persist(&self, old: &AccountState, new: &AccountState) -> Result<(), PipelineError> {
        let id = new.account_id;
        if old.membership_status != new.membership_status {
            self.accounts
                .set_membership_status(id, new.membership_status)
                .await?;
        }
        for (key, value) in old.field_changes(new) {
            self.accounts
                .set_account_field(id, key, value.as_deref())
                .await?;
        }
        Ok(())
    }

    /// Journal writes that happen once the outcome is settled only log on
    /// failure; the acknowledgment no longer depends on them.
    async fn journal_after_commit(&self, entry: JournalEntry) {
        if let Err(e) = self.ledger.journal(&entry).await {
            tracing::error!(error = %e, outcome = %entry.outcome, "journal write failed");
        }
    }
}

/// String or numeric member of a payload that failed schema checks.
fn raw_field(raw: &serde_json::Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        n @ serde_json::Value::Number(_) => Some(n.to_string()),
        _ => None,
    }
}
