use {
    crate::domain::{
        error::PipelineError,
        id::{TransactionId, to_db_id},
        ledger::{AppendOutcome, JournalEntry, TransactionRecord},
        ports::{BoxFuture, TransactionLedger},
    },
    sqlx::PgPool,
};

/// Transaction ledger and webhook journal. The `transactions` primary key is
/// the idempotency guard across every instance sharing the database.
#[derive(Clone)]
pub struct PgTransactionLedger {
    pool: PgPool,
}

impl PgTransactionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn already_processed(
    pool: &PgPool,
    transaction_id: &TransactionId,
) -> Result<bool, PipelineError> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM transactions WHERE transaction_id = $1)")
            .bind(transaction_id.as_str())
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

pub async fn append_transaction(
    pool: &PgPool,
    record: &TransactionRecord,
) -> Result<AppendOutcome, PipelineError> {
    let amount = i64::try_from(record.money.amount().minor_units())
        .map_err(|_| PipelineError::Validation("amount exceeds storage capacity".into()))?;

    let inserted: Option<bool> = sqlx::query_scalar(
        r#"
        INSERT INTO transactions
            (transaction_id, account_id, subscriber_id, amount, currency, status, order_type,
             reference_id, parent_transaction_id, affiliate_code, promo_code, signup_source, plan_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (transaction_id) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(record.transaction_id.as_str())
    .bind(to_db_id(record.account_id.get())?)
    .bind(record.subscriber_id.as_ref().map(|s| s.as_str()))
    .bind(amount)
    .bind(record.money.currency().as_str())
    .bind(record.status.as_str())
    .bind(record.order_type.to_string())
    .bind(&record.reference_id)
    .bind(record.parent_transaction_id.as_ref().map(|t| t.as_str()))
    .bind(record.affiliate_code.as_deref())
    .bind(record.promo_code.as_deref())
    .bind(record.signup_source.as_deref())
    .bind(record.plan_id.map(|p| to_db_id(p.get())).transpose()?)
    .fetch_optional(pool)
    .await?;

    Ok(match inserted {
        Some(_) => AppendOutcome::Recorded,
        None => AppendOutcome::Duplicate,
    })
}

pub async fn already_applied(
    pool: &PgPool,
    transaction_id: &TransactionId,
    postback_type: &str,
) -> Result<bool, PipelineError> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM webhook_journal
            WHERE transaction_id = $1
              AND postback_type = $2
              AND outcome IN ('applied', 'downstream_failed')
        )
        "#,
    )
    .bind(transaction_id.as_str())
    .bind(postback_type)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn insert_journal_entry(pool: &PgPool, entry: &JournalEntry) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO webhook_journal
            (id, transaction_id, postback_type, event_kind, account_id, outcome, detail, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.transaction_id.as_deref())
    .bind(&entry.postback_type)
    .bind(&entry.event_kind)
    .bind(entry.account_id.map(|a| to_db_id(a.get())).transpose()?)
    .bind(entry.outcome.as_str())
    .bind(&entry.detail)
    .bind(&entry.payload)
    .execute(pool)
    .await?;
    Ok(())
}

impl TransactionLedger for PgTransactionLedger {
    fn already_processed<'a>(&'a self, transaction_id: &'a TransactionId) -> BoxFuture<'a, bool> {
        Box::pin(already_processed(&self.pool, transaction_id))
    }

    fn already_applied<'a>(
        &'a self,
        transaction_id: &'a TransactionId,
        postback_type: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(already_applied(&self.pool, transaction_id, postback_type))
    }

    fn append<'a>(&'a self, record: &'a TransactionRecord) -> BoxFuture<'a, AppendOutcome> {
        Box::pin(append_transaction(&self.pool, record))
    }

    fn journal<'a>(&'a self, entry: &'a JournalEntry) -> BoxFuture<'a, ()> {
        Box::pin(insert_journal_entry(&self.pool, entry))
    }
}
