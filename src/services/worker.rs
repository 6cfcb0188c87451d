use {
    super::locks::AccountLocks,
    crate::domain::{
        account::MembershipStatus,
        error::PipelineError,
        ports::{AccountStore, PromoLedger},
    },
    chrono::{DateTime, Utc},
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalSummary {
    pub approved: usize,
    pub voided: usize,
    pub skipped: usize,
}

/// Moves pending commissions past the hold period to `approved`, or to
/// `void` when the referred account has since been banned.
pub struct CommissionApprover {
    promos: Arc<dyn PromoLedger>,
    accounts: Arc<dyn AccountStore>,
    locks: AccountLocks,
    hold: chrono::Duration,
    batch_size: i64,
}

impl CommissionApprover {
    pub fn new(
        promos: Arc<dyn PromoLedger>,
        accounts: Arc<dyn AccountStore>,
        locks: AccountLocks,
        hold: chrono::Duration,
    ) -> Self {
        Self {
            promos,
            accounts,
            locks,
            hold,
            batch_size: 100,
        }
    }

    pub async fn approve_due(&self, now: DateTime<Utc>) -> Result<ApprovalSummary, PipelineError> {
        let cutoff = now - self.hold;
        let pending = self
            .promos
            .pending_commissions(cutoff, self.batch_size)
            .await?;
        let mut summary = ApprovalSummary::default();

        for commission in pending {
            // Same lock as the webhook pipeline: a refund for this account
            // cannot slip in between the status read and the approval.
            let _guard = self.locks.lock(commission.account_id).await;

            let status = self
                .accounts
                .get_account(commission.account_id)
                .await?
                .map(|r| r.status)
                .unwrap_or_default();

            let changed = if status == MembershipStatus::Banned {
                let voided = self.promos.void_commission(commission.id).await?;
                if voided {
                    summary.voided += 1;
                    tracing::info!(
                        commission_id = %commission.id,
                        account_id = %commission.account_id,
                        "commission voided, account banned during hold"
                    );
                }
                voided
            } else {
                let approved = self.promos.approve_commission(commission.id).await?;
                if approved {
                    summary.approved += 1;
                    tracing::debug!(commission_id = %commission.id, "commission approved");
                }
                approved
            };

            if !changed {
                summary.skipped += 1;
            }
        }

        Ok(summary)
    }
}

pub async fn run_commission_approver(
    approver: CommissionApprover,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("commission approver started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("commission approver shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match approver.approve_due(Utc::now()).await {
            Ok(ApprovalSummary {
                approved: 0,
                voided: 0,
                ..
            }) => {}
            Ok(s) => tracing::info!(
                approved = s.approved,
                voided = s.voided,
                skipped = s.skipped,
                "commission approval pass"
            ),
            Err(e) => tracing::error!(error = %e, "commission approval error"),
        }
    }
}
