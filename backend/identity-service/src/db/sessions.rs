/// Session record persistence
///
/// [`SessionStore`] is the contract the token manager consumes. Filters are
/// conjunctions over the subject, a token digest and an expiry cutoff.
use crate::error::Result;
use crate::models::SessionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Which digest column a filter matches against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenHashMatch {
    Access(String),
    Refresh(String),
    /// Either column
    Any(String),
}

/// Conjunction of predicates; absent parts match everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFilter {
    pub subject: String,
    pub token_hash: Option<TokenHashMatch>,
    /// Matches records whose access and refresh tokens both expired at or before this instant
    pub expired_as_of: Option<DateTime<Utc>>,
}

impl SessionFilter {
    pub fn for_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            token_hash: None,
            expired_as_of: None,
        }
    }

    pub fn with_token_hash(mut self, token_hash: TokenHashMatch) -> Self {
        self.token_hash = Some(token_hash);
        self
    }

    pub fn expired_as_of(mut self, now: DateTime<Utc>) -> Self {
        self.expired_as_of = Some(now);
        self
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        if record.subject != self.subject {
            return false;
        }

        let hash_matches = match &self.token_hash {
            None => true,
            Some(TokenHashMatch::Access(hash)) => record.access_token_hash == *hash,
            Some(TokenHashMatch::Refresh(hash)) => record.refresh_token_hash == *hash,
            Some(TokenHashMatch::Any(hash)) => {
                record.access_token_hash == *hash || record.refresh_token_hash == *hash
            }
        };

        hash_matches
            && self
                .expired_as_of
                .map_or(true, |now| record.is_expired(now))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> Result<()>;

    async fn find_one(&self, filter: &SessionFilter) -> Result<Option<SessionRecord>>;

    /// Returns the number of deleted records
    async fn delete_where(&self, filter: &SessionFilter) -> Result<u64>;
}

/// PostgreSQL-backed store over the `jwt_tokens` table
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::IdentityError::Database(e.to_string()))?;
        Ok(())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &SessionFilter) {
    builder.push(" WHERE subject = ");
    builder.push_bind(filter.subject.clone());

    match &filter.token_hash {
        None => {}
        Some(TokenHashMatch::Access(hash)) => {
            builder.push(" AND access_token_hash = ");
            builder.push_bind(hash.clone());
        }
        Some(TokenHashMatch::Refresh(hash)) => {
            builder.push(" AND refresh_token_hash = ");
            builder.push_bind(hash.clone());
        }
        Some(TokenHashMatch::Any(hash)) => {
            builder.push(" AND (access_token_hash = ");
            builder.push_bind(hash.clone());
            builder.push(" OR refresh_token_hash = ");
            builder.push_bind(hash.clone());
            builder.push(")");
        }
    }

    if let Some(now) = filter.expired_as_of {
        builder.push(" AND access_token_expires_at <= ");
        builder.push_bind(now);
        builder.push(" AND refresh_token_expires_at <= ");
        builder.push_bind(now);
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jwt_tokens (
                id, subject, token_type, issued_at,
                access_token_hash, access_token_expires_at,
                refresh_token_hash, refresh_token_expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.subject)
        .bind(&record.token_type)
        .bind(record.issued_at)
        .bind(&record.access_token_hash)
        .bind(record.access_token_expires_at)
        .bind(&record.refresh_token_hash)
        .bind(record.refresh_token_expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_one(&self, filter: &SessionFilter) -> Result<Option<SessionRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            SELECT id, subject, token_type, issued_at,
                   access_token_hash, access_token_expires_at,
                   refresh_token_hash, refresh_token_expires_at
            FROM jwt_tokens
            "#,
        );
        push_filter(&mut builder, filter);
        builder.push(" LIMIT 1");

        let record = builder
            .build_query_as::<SessionRecord>()
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn delete_where(&self, filter: &SessionFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM jwt_tokens");
        push_filter(&mut builder, filter);

        let deleted = builder.build().execute(&self.pool).await?.rows_affected();
        debug!(subject = %filter.subject, deleted, "deleted session records");

        Ok(deleted)
    }
}
