use {
    crate::domain::{
        attribution::{CommissionStatus, NewCommission, PendingCommission, PromoCode},
        error::PipelineError,
        id::{AccountId, AffiliateId, PromoCodeId, TransactionId, from_db_id, to_db_id},
        money::MoneyAmount,
        ports::{BoxFuture, PromoLedger},
    },
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Row},
    uuid::Uuid,
};

fn to_db_amount(amount: MoneyAmount) -> Result<i64, PipelineError> {
    i64::try_from(amount.minor_units())
        .map_err(|_| PipelineError::Validation("amount exceeds storage capacity".into()))
}

/// Promo codes, their per-transaction usage, and affiliate commissions.
#[derive(Clone)]
pub struct PgPromoLedger {
    pool: PgPool,
}

impl PgPromoLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lookup(&self, code: &str) -> Result<Option<PromoCode>, PipelineError> {
        let row = sqlx::query(
            "SELECT id, code, affiliate_id FROM promo_codes WHERE lower(code) = lower($1) AND active",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let affiliate_id: Option<i64> = row.try_get("affiliate_id")?;
        Ok(Some(PromoCode {
            id: PromoCodeId::new(from_db_id(row.try_get("id")?)?),
            code: row.try_get("code")?,
            affiliate_id: affiliate_id
                .map(|id| from_db_id(id).map(AffiliateId::new))
                .transpose()?,
        }))
    }

    /// The usage row and the counter move together; a second call for the
    /// same transaction changes neither.
    async fn increment(
        &self,
        promo_code_id: PromoCodeId,
        transaction_id: &TransactionId,
    ) -> Result<bool, PipelineError> {
        let promo = to_db_id(promo_code_id.get())?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO promo_code_usages (promo_code_id, transaction_id) VALUES ($1, $2)
            ON CONFLICT (promo_code_id, transaction_id) DO NOTHING
            "#,
        )
        .bind(promo)
        .bind(transaction_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query("UPDATE promo_codes SET usage_count = usage_count + 1 WHERE id = $1")
                .bind(promo)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn record(&self, c: &NewCommission) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO commissions
                (id, affiliate_id, account_id, kind, transaction_id, plan_id,
                 sale_amount, amount, currency, promo_code_id, click_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending')
            ON CONFLICT (transaction_id, affiliate_id) DO NOTHING
            "#,
        )
        .bind(c.id)
        .bind(to_db_id(c.affiliate_id.get())?)
        .bind(to_db_id(c.account_id.get())?)
        .bind(c.kind.as_str())
        .bind(c.transaction_id.as_str())
        .bind(c.plan_id.map(|p| to_db_id(p.get())).transpose()?)
        .bind(to_db_amount(c.sale.amount())?)
        .bind(to_db_amount(c.amount.amount())?)
        .bind(c.amount.currency().as_str())
        .bind(c.promo_code_id.map(|p| to_db_id(p.get())).transpose()?)
        .bind(c.click_id.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn void_for_transaction(&self, transaction_id: &TransactionId) -> Result<u64, PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE commissions SET status = 'void', updated_at = now()
            WHERE transaction_id = $1 AND status <> 'void'
            "#,
        )
        .bind(transaction_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PendingCommission>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, affiliate_id, account_id, transaction_id, created_at
            FROM commissions
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<PendingCommission, PipelineError> {
                Ok(PendingCommission {
                    id: row.try_get("id")?,
                    affiliate_id: AffiliateId::new(from_db_id(row.try_get("affiliate_id")?)?),
                    account_id: AccountId::new(from_db_id(row.try_get("account_id")?)?),
                    transaction_id: TransactionId::new(row.try_get::<String, _>("transaction_id")?)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn transition(&self, id: Uuid, to: CommissionStatus) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            "UPDATE commissions SET status = $2, updated_at = now() WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl PromoLedger for PgPromoLedger {
    fn lookup_promo_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Option<PromoCode>> {
        Box::pin(self.lookup(code))
    }

    fn increment_usage<'a>(
        &'a self,
        promo_code_id: PromoCodeId,
        transaction_id: &'a TransactionId,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.increment(promo_code_id, transaction_id))
    }

    fn record_commission<'a>(&'a self, commission: &'a NewCommission) -> BoxFuture<'a, bool> {
        Box::pin(self.record(commission))
    }

    fn void_commissions<'a>(&'a self, transaction_id: &'a TransactionId) -> BoxFuture<'a, u64> {
        Box::pin(self.void_for_transaction(transaction_id))
    }

    fn pending_commissions(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Vec<PendingCommission>> {
        Box::pin(self.pending(created_before, limit))
    }

    fn approve_commission(&self, id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(self.transition(id, CommissionStatus::Approved))
    }

    fn void_commission(&self, id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(self.transition(id, CommissionStatus::Void))
    }
}
