use {
    super::notifier::NotificationQueue,
    crate::{
        config::CommissionRates,
        domain::{
            account::{AccountRecord, BanNote, CommissionIntent, Intent, fields},
            attribution::NewCommission,
            error::PipelineError,
            id::AccountId,
            money::Money,
            ports::{AccountStore, CancelOutcome, ContentAccessStore, PromoLedger, ProviderClient},
        },
    },
    chrono::Utc,
    serde::Serialize,
    std::sync::Arc,
    uuid::Uuid,
};

#[derive(Debug, Clone, Serialize)]
pub struct DownstreamFailure {
    pub intent: &'static str,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub executed: usize,
    pub failures: Vec<DownstreamFailure>,
}

/// Executes transition intents. The only caller of content grant/revoke,
/// provider cancellation, ban bookkeeping and commission writes.
///
/// Runs after the ledger write, so a failing intent is logged and reported,
/// never propagated: the provider must not redeliver an event that is
/// already on the books.
pub struct Dispatcher {
    accounts: Arc<dyn AccountStore>,
    access: Arc<dyn ContentAccessStore>,
    promos: Arc<dyn PromoLedger>,
    provider: Arc<dyn ProviderClient>,
    notifications: NotificationQueue,
    rates: CommissionRates,
}

impl Dispatcher {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        access: Arc<dyn ContentAccessStore>,
        promos: Arc<dyn PromoLedger>,
        provider: Arc<dyn ProviderClient>,
        notifications: NotificationQueue,
        rates: CommissionRates,
    ) -> Self {
        Self {
            accounts,
            access,
            promos,
            provider,
            notifications,
            rates,
        }
    }

    pub async fn dispatch(&self, account: AccountId, intents: Vec<Intent>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for intent in intents {
            let label = label(&intent);
            match self.execute(account, intent).await {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    tracing::error!(
                        account_id = %account,
                        intent = label,
                        error = %e,
                        "side effect failed, needs manual reconciliation"
                    );
                    report.failures.push(DownstreamFailure {
                        intent: label,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn execute(&self, account: AccountId, intent: Intent) -> Result<(), PipelineError> {
        match intent {
            Intent::GrantAccess { content_id } => {
                if self.access.grant_access(account, content_id).await? {
                    tracing::info!(account_id = %account, content_id = %content_id, "content access granted");
                } else {
                    tracing::debug!(account_id = %account, content_id = %content_id, "content access already present");
                }
            }
            Intent::RevokeAccess { content_id } => {
                if self.access.revoke_access(account, content_id).await? {
                    tracing::info!(account_id = %account, content_id = %content_id, "content access revoked");
                } else {
                    tracing::debug!(account_id = %account, content_id = %content_id, "content access already absent");
                }
            }
            Intent::CancelAtProvider { subscriber_id } => {
                match self.provider.cancel_subscription(&subscriber_id).await? {
                    CancelOutcome::Cancelled => {
                        tracing::info!(account_id = %account, subscriber_id = %subscriber_id, "subscription cancelled at provider");
                    }
                    CancelOutcome::AlreadyCancelled => {
                        tracing::info!(account_id = %account, subscriber_id = %subscriber_id, "subscription already cancelled at provider");
                    }
                }
            }
            Intent::BanAccount { reason } => self.record_ban(account, reason).await?,
            Intent::IncrementPromoUsage {
                promo_code_id,
                transaction_id,
            } => {
                if !self
                    .promos
                    .increment_usage(promo_code_id, &transaction_id)
                    .await?
                {
                    tracing::debug!(promo_code_id = %promo_code_id, transaction_id = %transaction_id, "promo usage already counted");
                }
            }
            Intent::RecordCommission(commission) => {
                self.record_commission(account, commission).await?
            }
            Intent::VoidCommissions { transaction_id } => {
                let voided = self.promos.void_commissions(&transaction_id).await?;
                tracing::info!(transaction_id = %transaction_id, voided, "commissions voided");
            }
            Intent::Notify(summary) => self.notifications.enqueue(summary),
        }
        Ok(())
    }

    async fn record_ban(&self, account: AccountId, reason: String) -> Result<(), PipelineError> {
        let record = self
            .accounts
            .get_account(account)
            .await?
            .unwrap_or_else(|| AccountRecord::new(account));

        let mut notes = record.ban_reasons();
        if notes.iter().any(|n| n.reason == reason) {
            return Ok(());
        }
        notes.push(BanNote {
            at: Utc::now(),
            reason,
        });
        let encoded = serde_json::to_string(&notes)?;
        self.accounts
            .set_account_field(account, fields::BAN_REASONS, Some(&encoded))
            .await?;

        tracing::warn!(account_id = %account, bans = notes.len(), "account banned");
        Ok(())
    }

    async fn record_commission(
        &self,
        account: AccountId,
        commission: CommissionIntent,
    ) -> Result<(), PipelineError> {
        let Some(bps) = self.rates.for_kind(commission.kind) else {
            tracing::debug!(kind = %commission.kind, "no commission rate configured, skipped");
            return Ok(());
        };

        let amount = commission
            .sale
            .amount()
            .apply_rate_bps(bps)
            .ok_or_else(|| PipelineError::Validation("commission amount overflow".into()))?;

        let record = NewCommission {
            id: Uuid::now_v7(),
            affiliate_id: commission.affiliate_id,
            account_id: account,
            kind: commission.kind,
            transaction_id: commission.transaction_id,
            plan_id: commission.plan_id,
            sale: commission.sale,
            amount: Money::new(amount, commission.sale.currency()),
            promo_code_id: commission.promo_code_id,
            click_id: commission.click_id,
        };

        if self.promos.record_commission(&record).await? {
            tracing::info!(
                affiliate_id = %record.affiliate_id,
                transaction_id = %record.transaction_id,
                kind = %record.kind,
                amount = %amount,
                "commission recorded"
            );
        } else {
            tracing::debug!(transaction_id = %record.transaction_id, "commission already recorded");
        }
        Ok(())
    }
}

fn label(intent: &Intent) -> &'static str {
    match intent {
        Intent::GrantAccess { .. } => "grant_access",
        Intent::RevokeAccess { .. } => "revoke_access",
        Intent::CancelAtProvider { .. } => "cancel_at_provider",
        Intent::BanAccount { .. } => "ban_account",
        Intent::IncrementPromoUsage { .. } => "increment_promo_usage",
        Intent::RecordCommission(_) => "record_commission",
        Intent::VoidCommissions { .. } => "void_commissions",
        Intent::Notify(_) => "notify",
    }
}
