//! Database connection pool, migrations, and health check.
//!
//! One Postgres pool shared by the per-class store views in [`convert`] and
//! [`batch`].

pub mod batch;
pub mod convert;

pub use batch::BatchJobs;
pub use convert::ConvertJobs;

use crate::error::{Error, Result};
use crate::model::Status;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Store view over conversion jobs.
    pub fn conversions(&self) -> ConvertJobs {
        ConvertJobs::new(self.pool.clone())
    }

    /// Store view over batch jobs.
    pub fn batches(&self) -> BatchJobs {
        BatchJobs::new(self.pool.clone())
    }
}

/// Map a guarded `UPDATE ... WHERE status = 'queued'` that touched no row to
/// a transition error.
fn ensure_transitioned(rows_affected: u64, to: Status) -> Result<()> {
    if rows_affected == 0 {
        return Err(Error::InvalidTransition {
            from: "not queued".to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}
