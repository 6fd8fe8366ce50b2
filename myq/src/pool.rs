use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    connection::Connection,
    context::Context,
    driver::{DriverConn, DriverPool},
    query::{run_exec, run_query_row, Rows, DEFAULT_HIGH_WATER, DEFAULT_LOW_WATER},
    transaction::{Transaction, TxnOptions},
    Error, Param, QueryResult, Result, Row,
};

/// Tuning for the streams a pool produces.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    high_water: usize,
    low_water: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_LOW_WATER,
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffered rows at which wire delivery is paused.
    pub fn buffer_high_water(mut self, rows: usize) -> Self {
        self.high_water = rows;
        self
    }

    /// Buffered rows at which a paused delivery is resumed.
    pub fn buffer_low_water(mut self, rows: usize) -> Self {
        self.low_water = rows;
        self
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water.max(1)
    }

    pub(crate) fn low_water(&self) -> usize {
        // The resume threshold must sit below the pause threshold.
        self.low_water.min(self.high_water() - 1)
    }
}

/// RAII lease of a driver connection.
///
/// Returned to the pool on drop unless explicitly released or destroyed, so
/// every call path gives the connection back exactly once, including under
/// errors at any await point.
pub(crate) struct PoolConnection {
    conn: Arc<dyn DriverConn>,
    disposed: bool,
}

impl PoolConnection {
    fn new(conn: Arc<dyn DriverConn>) -> Self {
        Self {
            conn,
            disposed: false,
        }
    }

    pub(crate) fn raw(&self) -> &Arc<dyn DriverConn> {
        &self.conn
    }

    /// Return the connection to the pool.
    pub(crate) fn release(mut self) {
        self.disposed = true;
        self.conn.release();
    }

    /// Hard-kill the connection; it leaves the pool.
    pub(crate) fn destroy(mut self) {
        self.disposed = true;
        self.conn.destroy();
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if !self.disposed {
            self.conn.release();
        }
    }
}

/// Lease a connection, honoring cancellation.
///
/// If the cancel fires first the acquire rejects with [`Error::Canceled`];
/// a connection the pool delivers afterwards is released immediately, never
/// leaked.
pub(crate) async fn acquire(driver: &Arc<dyn DriverPool>, ctx: &Context) -> Result<PoolConnection> {
    let mut pending = driver.get_connection();

    tokio::select! {
        conn = &mut pending => Ok(PoolConnection::new(conn.map_err(Error::Driver)?)),
        () = ctx.cancelled() => {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Ok(conn) = pending.await {
                        conn.release();
                    }
                });
            }
            Err(Error::Canceled)
        }
    }
}

/// Storage entry point over a driver pool.
///
/// One-shot statements (`query_row`, `exec`) lease a connection per call and
/// release it on every path. `query` leases a connection whose release
/// ownership transfers to the returned stream. `begin` holds its lease until
/// the transaction ends.
pub struct Pool {
    driver: Arc<dyn DriverPool>,
    options: PoolOptions,
    closed: AtomicBool,
}

impl Pool {
    pub fn new(driver: Arc<dyn DriverPool>) -> Self {
        Self::with_options(driver, PoolOptions::default())
    }

    pub fn with_options(driver: Arc<dyn DriverPool>, options: PoolOptions) -> Self {
        Self {
            driver,
            options,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }
        Ok(())
    }

    /// Lease a dedicated connection.
    pub async fn conn(&self, ctx: &Context) -> Result<Connection> {
        self.ensure_open()?;
        let lease = acquire(&self.driver, ctx).await?;
        Ok(Connection::new(
            lease,
            Arc::clone(&self.driver),
            self.options.clone(),
        ))
    }

    /// Run a row-returning statement. The leased connection is owned by the
    /// returned stream and goes back to the pool when the stream is closed.
    pub async fn query(&self, ctx: &Context, sql: &str, params: Vec<Param>) -> Result<Rows> {
        self.ensure_open()?;
        let lease = acquire(&self.driver, ctx).await?;
        Ok(Rows::start_owned(lease, ctx.clone(), sql, params, &self.options))
    }

    /// Run a statement and return its first row, if any.
    pub async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: Vec<Param>,
    ) -> Result<Option<Row>> {
        let rows = self.query(ctx, sql, params).await?;
        run_query_row(rows).await
    }

    /// Run an update statement. Fails if the statement produces rows.
    pub async fn exec(&self, ctx: &Context, sql: &str, params: Vec<Param>) -> Result<QueryResult> {
        let rows = self.query(ctx, sql, params).await?;
        run_exec(rows).await
    }

    /// Begin a transaction on a freshly leased connection.
    pub async fn begin(&self, ctx: &Context, options: TxnOptions) -> Result<Transaction<'static>> {
        self.ensure_open()?;
        let lease = acquire(&self.driver, ctx).await?;
        Transaction::begin_owned(
            lease,
            Arc::clone(&self.driver),
            self.options.clone(),
            ctx,
            options,
        )
        .await
    }

    /// Shut the pool down. Idempotent; every other surface call afterwards
    /// fails with [`Error::PoolClosed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.driver.end().await.map_err(Error::Driver)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
