use std::sync::Arc;

use crate::{
    context::Context,
    driver::{DriverConn, DriverPool},
    pool::{PoolConnection, PoolOptions},
    query::{run_exec, run_query_row, Rows},
    transaction::{Transaction, TxnOptions},
    Error, Param, QueryResult, Result, Row,
};

/// A dedicated connection leased from the pool.
///
/// Streams produced here share the connection: closing them leaves the
/// lease in place, and cancellation goes out-of-band via `KILL QUERY` on a
/// separate pooled connection. A connection runs one statement at a time;
/// issuing another before the previous stream finished is a caller error.
pub struct Connection {
    pub(crate) lease: Option<PoolConnection>,
    pub(crate) driver: Arc<dyn DriverPool>,
    pub(crate) options: PoolOptions,
}

impl Connection {
    pub(crate) fn new(
        lease: PoolConnection,
        driver: Arc<dyn DriverPool>,
        options: PoolOptions,
    ) -> Self {
        Self {
            lease: Some(lease),
            driver,
            options,
        }
    }

    pub(crate) fn conn(&self) -> Result<Arc<dyn DriverConn>> {
        self.lease
            .as_ref()
            .map(|lease| Arc::clone(lease.raw()))
            .ok_or(Error::Closed("connection"))
    }

    /// Run a row-returning statement on this connection. The returned stream
    /// shares the connection, which outlives it.
    pub fn query(&mut self, ctx: &Context, sql: &str, params: Vec<Param>) -> Result<Rows> {
        let conn = self.conn()?;
        Ok(Rows::start_shared(
            conn,
            Arc::clone(&self.driver),
            ctx.clone(),
            sql,
            params,
            &self.options,
        ))
    }

    /// Run a statement and return its first row, cloned off the stream so it
    /// outlives the cursor. The stream is closed on every path.
    pub async fn query_row(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: Vec<Param>,
    ) -> Result<Option<Row>> {
        let rows = self.query(ctx, sql, params)?;
        run_query_row(rows).await
    }

    /// Run an update statement. Fails if the driver returns a row-bearing
    /// result.
    pub async fn exec(
        &mut self,
        ctx: &Context,
        sql: &str,
        params: Vec<Param>,
    ) -> Result<QueryResult> {
        let rows = self.query(ctx, sql, params)?;
        run_exec(rows).await
    }

    /// Begin a transaction bound to this connection. The connection stays
    /// leased after the transaction ends.
    pub async fn begin(&mut self, ctx: &Context, options: TxnOptions) -> Result<Transaction<'_>> {
        self.conn()?;
        Transaction::begin_shared(self, ctx, options).await
    }

    /// Release the connection back to the pool. Further calls on the wrapper
    /// fail with [`Error::Closed`]; closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }
}
