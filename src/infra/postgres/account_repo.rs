use {
    crate::domain::{
        account::{AccountRecord, MembershipStatus, fields},
        error::PipelineError,
        id::{AccountId, ContentId, SubscriberId, from_db_id, to_db_id},
        ports::{AccountStore, BoxFuture, ContentAccessStore},
    },
    sqlx::{PgPool, Row},
    std::collections::{BTreeMap, BTreeSet},
};

/// Account membership status plus its key/value fields.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn get_account(pool: &PgPool, id: AccountId) -> Result<AccountRecord, PipelineError> {
    let db_id = to_db_id(id.get())?;

    let status: Option<String> = sqlx::query_scalar("SELECT status FROM accounts WHERE id = $1")
        .bind(db_id)
        .fetch_optional(pool)
        .await?;

    let Some(status) = status else {
        return Ok(AccountRecord::new(id));
    };

    let rows = sqlx::query("SELECT key, value FROM account_fields WHERE account_id = $1")
        .bind(db_id)
        .fetch_all(pool)
        .await?;

    let mut fields = BTreeMap::new();
    for row in rows {
        fields.insert(row.try_get::<String, _>("key")?, row.try_get("value")?);
    }

    Ok(AccountRecord {
        id,
        status: MembershipStatus::try_from(status.as_str())?,
        fields,
    })
}

pub async fn find_by_subscriber(
    pool: &PgPool,
    subscriber_id: &SubscriberId,
) -> Result<Option<AccountId>, PipelineError> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT account_id FROM account_fields
        WHERE key = $1 AND value = $2
        ORDER BY updated_at DESC
        LIMIT 1
        "#,
    )
    .bind(fields::SUBSCRIBER_ID)
    .bind(subscriber_id.as_str())
    .fetch_optional(pool)
    .await?;

    id.map(|id| from_db_id(id).map(AccountId::new)).transpose()
}

pub async fn set_membership_status(
    pool: &PgPool,
    id: AccountId,
    status: MembershipStatus,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO accounts (id, status) VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, updated_at = now()
        "#,
    )
    .bind(to_db_id(id.get())?)
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_account_field(
    pool: &PgPool,
    id: AccountId,
    key: &str,
    value: Option<&str>,
) -> Result<(), PipelineError> {
    let db_id = to_db_id(id.get())?;

    let Some(value) = value else {
        sqlx::query("DELETE FROM account_fields WHERE account_id = $1 AND key = $2")
            .bind(db_id)
            .bind(key)
            .execute(pool)
            .await?;
        return Ok(());
    };

    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO accounts (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
        .bind(db_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO account_fields (account_id, key, value) VALUES ($1, $2, $3)
        ON CONFLICT (account_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(db_id)
    .bind(key)
    .bind(value)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

impl AccountStore for PgAccountStore {
    fn get_account(&self, id: AccountId) -> BoxFuture<'_, Option<AccountRecord>> {
        Box::pin(async move { get_account(&self.pool, id).await.map(Some) })
    }

    fn find_by_subscriber<'a>(
        &'a self,
        subscriber_id: &'a SubscriberId,
    ) -> BoxFuture<'a, Option<AccountId>> {
        Box::pin(find_by_subscriber(&self.pool, subscriber_id))
    }

    fn set_membership_status(&self, id: AccountId, status: MembershipStatus) -> BoxFuture<'_, ()> {
        Box::pin(set_membership_status(&self.pool, id, status))
    }

    fn set_account_field<'a>(
        &'a self,
        id: AccountId,
        key: &'a str,
        value: Option<&'a str>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(set_account_field(&self.pool, id, key, value))
    }
}

#[derive(Clone)]
pub struct PgContentAccessStore {
    pool: PgPool,
}

impl PgContentAccessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn grant(&self, account: AccountId, content: ContentId) -> Result<bool, PipelineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_access (account_id, content_id) VALUES ($1, $2)
            ON CONFLICT (account_id, content_id) DO NOTHING
            "#,
        )
        .bind(to_db_id(account.get())?)
        .bind(to_db_id(content.get())?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke(&self, account: AccountId, content: ContentId) -> Result<bool, PipelineError> {
        let result =
            sqlx::query("DELETE FROM content_access WHERE account_id = $1 AND content_id = $2")
                .bind(to_db_id(account.get())?)
                .bind(to_db_id(content.get())?)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, account: AccountId) -> Result<BTreeSet<ContentId>, PipelineError> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT content_id FROM content_access WHERE account_id = $1")
                .bind(to_db_id(account.get())?)
                .fetch_all(&self.pool)
                .await?;

        ids.into_iter()
            .map(|id| from_db_id(id).map(ContentId::new))
            .collect()
    }
}

impl ContentAccessStore for PgContentAccessStore {
    fn grant_access(&self, account: AccountId, content: ContentId) -> BoxFuture<'_, bool> {
        Box::pin(self.grant(account, content))
    }

    fn revoke_access(&self, account: AccountId, content: ContentId) -> BoxFuture<'_, bool> {
        Box::pin(self.revoke(account, content))
    }

    fn list_access(&self, account: AccountId) -> BoxFuture<'_, BTreeSet<ContentId>> {
        Box::pin(self.list(account))
    }
}
