use std::{str::FromStr, sync::Arc};

use crate::{
    connection::Connection,
    context::Context,
    driver::{DriverConn, DriverPool},
    pool::{PoolConnection, PoolOptions},
    query::{run_exec, run_query_row, run_simple, Rows},
    Error, Param, QueryResult, Result, Row,
};

/// Transaction isolation level, mapped onto the discrete SQL set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// The server default, `REPEATABLE READ`.
    #[default]
    Default,
    RepeatableRead,
    ReadCommitted,
    ReadUncommitted,
    Serializable,
}

impl IsolationLevel {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::Default | IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(IsolationLevel::Default),
            "repeatableRead" => Ok(IsolationLevel::RepeatableRead),
            "readCommitted" => Ok(IsolationLevel::ReadCommitted),
            "readUncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(Error::UnsupportedIsolation(other.to_owned())),
        }
    }
}

/// Options for beginning a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxnOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

enum TxnSource<'c> {
    /// The transaction owns a pool lease and disposes it when it ends.
    Pooled(Option<PoolConnection>),
    /// The transaction borrows a dedicated connection that outlives it.
    Shared(&'c mut Connection),
}

impl TxnSource<'_> {
    fn conn(&self) -> Result<Arc<dyn DriverConn>> {
        match self {
            TxnSource::Pooled(Some(lease)) => Ok(Arc::clone(lease.raw())),
            TxnSource::Pooled(None) => Err(Error::Closed("transaction")),
            TxnSource::Shared(connection) => connection.conn(),
        }
    }

    /// Return an owned lease to the pool; a borrowed connection is the
    /// caller's to keep.
    fn dispose(&mut self) {
        if let TxnSource::Pooled(lease) = self {
            if let Some(lease) = lease.take() {
                lease.release();
            }
        }
    }
}

/// An in-progress database transaction.
///
/// Starts with [`Pool::begin`] or [`Connection::begin`] and ends with a call
/// to [`commit`] or [`rollback`]. A transaction dropped while open starts a
/// best-effort rollback.
///
/// [`Pool::begin`]: crate::Pool::begin
/// [`Connection::begin`]: crate::Connection::begin
/// [`commit`]: Self::commit
/// [`rollback`]: Self::rollback
pub struct Transaction<'c> {
    source: TxnSource<'c>,
    driver: Arc<dyn DriverPool>,
    options: PoolOptions,
    open: bool,
}

impl Transaction<'static> {
    pub(crate) async fn begin_owned(
        lease: PoolConnection,
        driver: Arc<dyn DriverPool>,
        options: PoolOptions,
        ctx: &Context,
        txn_options: TxnOptions,
    ) -> Result<Self> {
        let mut txn = Transaction {
            source: TxnSource::Pooled(Some(lease)),
            driver,
            options,
            open: false,
        };
        txn.begin(ctx, txn_options).await?;
        Ok(txn)
    }
}

impl<'c> Transaction<'c> {
    pub(crate) async fn begin_shared(
        connection: &'c mut Connection,
        ctx: &Context,
        txn_options: TxnOptions,
    ) -> Result<Self> {
        let driver = Arc::clone(&connection.driver);
        let options = connection.options.clone();
        let mut txn = Transaction {
            source: TxnSource::Shared(connection),
            driver,
            options,
            open: false,
        };
        txn.begin(ctx, txn_options).await?;
        Ok(txn)
    }

    /// `SET TRANSACTION ISOLATION LEVEL ...`, then `START TRANSACTION READ
    /// {ONLY|WRITE}`. On failure an owned lease goes straight back to the
    /// pool.
    async fn begin(&mut self, ctx: &Context, options: TxnOptions) -> Result<()> {
        if let Err(error) = self.run_begin(ctx, options).await {
            self.source.dispose();
            return Err(error);
        }
        self.open = true;
        Ok(())
    }

    async fn run_begin(&mut self, ctx: &Context, options: TxnOptions) -> Result<()> {
        let set = format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            options.isolation.as_sql()
        );
        self.exec_raw(ctx, &set).await?;

        let start = if options.read_only {
            "START TRANSACTION READ ONLY"
        } else {
            "START TRANSACTION READ WRITE"
        };
        self.exec_raw(ctx, start).await?;
        Ok(())
    }

    /// Statement on the bound connection, bypassing the open-state guard.
    async fn exec_raw(&mut self, ctx: &Context, sql: &str) -> Result<QueryResult> {
        let conn = self.source.conn()?;
        let rows = Rows::start_shared(
            conn,
            Arc::clone(&self.driver),
            ctx.clone(),
            sql,
            Vec::new(),
            &self.options,
        );
        run_exec(rows).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Closed("transaction"))
        }
    }

    /// Run a row-returning statement inside the transaction.
    pub fn query(&mut self, ctx: &Context, sql: &str, params: Vec<Param>) -> Result<Rows> {
        self.ensure_open()?;
        let conn = self.source.conn()?;
        Ok(Rows::start_shared(
            conn,
            Arc::clone(&self.driver),
            ctx.clone(),
            sql,
            params,
            &self.options,
        ))
    }

    /// Run a statement and return its first row, if any.
    pub async fn query_row(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: Vec<Param>,
    ) -> Result<Option<Row>> {
        let rows = self.query(ctx, sql, params)?;
        run_query_row(rows).await
    }

    /// Run an update statement inside the transaction.
    pub async fn exec(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: Vec<Param>,
    ) -> Result<QueryResult> {
        let rows = self.query(ctx, sql, params)?;
        run_exec(rows).await
    }

    /// Commit the transaction. An owned lease returns to the pool even if
    /// the COMMIT itself fails.
    pub async fn commit(mut self) -> Result<()> {
        self.end_with("COMMIT").await
    }

    /// Roll the transaction back. An owned lease returns to the pool even if
    /// the ROLLBACK itself fails.
    pub async fn rollback(mut self) -> Result<()> {
        self.end_with("ROLLBACK").await
    }

    async fn end_with(&mut self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        self.open = false;

        // COMMIT/ROLLBACK run to completion regardless of the caller's
        // context.
        let ctx = Context::new();
        let result = self.exec_raw(&ctx, sql).await;
        self.source.dispose();
        result.map(|_| ())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let Ok(conn) = self.source.conn() else {
            return;
        };
        let lease = match &mut self.source {
            TxnSource::Pooled(lease) => lease.take(),
            TxnSource::Shared(_) => None,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = run_simple(&conn, "ROLLBACK").await {
                        tracing::warn!(error = %error, "rollback of dropped transaction failed");
                    }
                    if let Some(lease) = lease {
                        lease.release();
                    }
                });
            }
            Err(_) => {
                // No runtime to run the rollback on; destroying the
                // connection rolls back server-side.
                if let Some(lease) = lease {
                    lease.destroy();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_levels_map_to_their_sql() {
        assert_eq!(IsolationLevel::Default.as_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn isolation_tokens_parse() {
        assert_eq!(
            "repeatableRead".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "serializable".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Serializable
        );
        assert!(matches!(
            "snapshot".parse::<IsolationLevel>(),
            Err(Error::UnsupportedIsolation(level)) if level == "snapshot"
        ));
    }
}
