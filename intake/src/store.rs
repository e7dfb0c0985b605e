//! Persistence adapter: wraps a connection pool to the external relational
//! database; offers `insert_payment` and `aggregate_summary`.

use crate::error::DbError;
use crate::payment::{Handler, PaymentSummary, ProcessorSummary};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio_postgres::NoTls;

pub struct Store {
    postgres_url: String,
    pool_size: usize,
    pool: RwLock<Option<Pool>>,
}

impl Store {
    pub fn new(postgres_url: String, pool_size: usize) -> Self {
        Self {
            postgres_url,
            pool_size,
            pool: RwLock::new(None),
        }
    }

    /// Lazily builds the pool on first use. A transient build failure is
    /// not cached: the next call tries again instead of failing forever.
    async fn pool(&self) -> Result<Pool, DbError> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }

        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pg_config = self
            .postgres_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| DbError::PoolInit(e.to_string()))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(self.pool_size)
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| DbError::PoolInit(e.to_string()))?;

        *guard = Some(pool.clone());
        Ok(pool)
    }

    pub async fn init_schema(&self) -> Result<(), DbError> {
        let pool = self.pool().await?;
        let client = pool
            .get()
            .await
            .map_err(|e| DbError::PoolExhausted(e.to_string()))?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS payments (
                    correlation_id TEXT PRIMARY KEY,
                    amount         NUMERIC NOT NULL,
                    handler        TEXT NOT NULL,
                    created_at     TIMESTAMP NOT NULL
                )",
            )
            .await
            .map_err(DbError::from_query_error)
    }

    /// Duplicate correlation ids are treated as success: the row already
    /// reflects prior work, whether from a restart or a duplicated
    /// upstream retry.
    pub async fn insert_payment(
        &self,
        correlation_id: &str,
        amount: Decimal,
        handler: Handler,
        created_at: OffsetDateTime,
    ) -> Result<(), DbError> {
        let pool = self.pool().await?;
        let client = pool
            .get()
            .await
            .map_err(|e| DbError::PoolExhausted(e.to_string()))?;

        let primitive = time::PrimitiveDateTime::new(created_at.date(), created_at.time());
        let result = client
            .execute(
                "INSERT INTO payments (correlation_id, amount, handler, created_at)
                 VALUES ($1, $2, $3, $4)",
                &[&correlation_id, &amount, &handler, &primitive],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => match DbError::from_query_error(e) {
                DbError::DuplicateKey => Ok(()),
                other => Err(other),
            },
        }
    }

    /// Wipes all rows. Not part of the original reference lineage; added
    /// as a test/reset convenience for load-testing harnesses, the way
    /// the reference gateway exposes an equivalent purge route.
    pub async fn purge(&self) -> Result<(), DbError> {
        let pool = self.pool().await?;
        let client = pool
            .get()
            .await
            .map_err(|e| DbError::PoolExhausted(e.to_string()))?;
        client
            .batch_execute("TRUNCATE TABLE payments")
            .await
            .map_err(DbError::from_query_error)
    }

    pub async fn aggregate_summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentSummary, DbError> {
        let pool = self.pool().await?;
        let client = pool
            .get()
            .await
            .map_err(|e| DbError::PoolExhausted(e.to_string()))?;

        let from = from.map(|t| time::PrimitiveDateTime::new(t.date(), t.time()));
        let to = to.map(|t| time::PrimitiveDateTime::new(t.date(), t.time()));

        // The `created_at` filter is applied only when both bounds are
        // given; a single bound runs the query unfiltered rather than
        // silently narrowing the result set (matches the reference
        // lineage's own `(from != nil && to != nil)` gate).
        let rows = match (from, to) {
            (Some(from), Some(to)) => {
                client
                    .query(
                        "SELECT handler, COUNT(*) AS total_requests, COALESCE(SUM(amount), 0) AS total_amount
                         FROM payments
                         WHERE created_at BETWEEN $1 AND $2
                         GROUP BY handler",
                        &[&from, &to],
                    )
                    .await
            }
            _ => {
                client
                    .query(
                        "SELECT handler, COUNT(*) AS total_requests, COALESCE(SUM(amount), 0) AS total_amount
                         FROM payments
                         GROUP BY handler",
                        &[],
                    )
                    .await
            }
        }
        .map_err(DbError::from_query_error)?;

        let mut summary = PaymentSummary::default();
        for row in rows {
            let handler: String = row.get("handler");
            let total_requests: i64 = row.get("total_requests");
            let total_amount: Decimal = row.get("total_amount");
            let sub = ProcessorSummary {
                total_requests,
                total_amount,
            };
            match handler.as_str() {
                "default" => summary.default = sub,
                "fallback" => summary.fallback = sub,
                _ => {}
            }
        }
        Ok(summary)
    }
}
