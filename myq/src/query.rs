use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_core::stream::BoxStream;

use crate::{
    column::{decode_columns, Column},
    context::Context,
    driver::{DriverConn, DriverPool, FieldDef, QueryEventSink, ResultPacket},
    error::{DriverError, Error, CR_SERVER_LOST},
    pool::{PoolConnection, PoolOptions},
    promise::{self, Completer, Promise},
    value::{flatten_params, Param},
    HashMap, QueryResult, Result, Row,
};

/// Buffered rows at which delivery is paused.
pub(crate) const DEFAULT_HIGH_WATER: usize = 100;

/// Buffered rows at which a paused delivery is resumed.
///
/// Two thresholds rather than one: the hysteresis band guarantees at least
/// `HIGH - LOW` reads between wire-level toggles instead of oscillating
/// around a single limit.
pub(crate) const DEFAULT_LOW_WATER: usize = 75;

/// What a settled `next()` waiter observed.
enum NextSignal {
    Row(Row),
    End,
    Failed(Error),
}

#[derive(Default)]
struct StreamState {
    /// Field list or update result has been observed.
    ready: bool,
    /// Terminal event has been observed (or synthesized).
    done: bool,
    paused: bool,
    canceling: bool,
    is_exec: bool,
    /// Sticky stream error; redelivered on every later `next()`.
    err: Option<Error>,
    /// Error that settled the opening phase, including the expected
    /// interrupt of a cancelled query. Surfaced by `ready()` and the
    /// metadata accessors, not by `next()`.
    ready_err: Option<Error>,
    columns: Option<Arc<Vec<Column>>>,
    column_names: Option<Arc<HashMap<String, usize>>>,
    /// Raw row packets awaiting a `next()`. Wrapping into [`Row`] happens on
    /// the pop side so rows discarded by cancellation never pay projection.
    buffer: VecDeque<Vec<crate::Value>>,
    exec_result: Option<QueryResult>,
    wait_ready: Option<Completer<()>>,
    wait_next: Option<Completer<NextSignal>>,
    wait_close: Option<Completer<Result<()>>>,
}

/// Shared between the [`Rows`] handle and the driver's event task.
pub(crate) struct QueryShared {
    conn: Arc<dyn DriverConn>,
    high_water: usize,
    low_water: usize,
    state: Mutex<StreamState>,
}

impl QueryShared {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clean terminal transition: settle every waiter exactly once.
    fn finish_locked(&self, s: &mut StreamState) {
        s.done = true;
        if !s.ready {
            s.ready = true;
            if let Some(w) = s.wait_ready.take() {
                w.complete(());
            }
        }
        if let Some(w) = s.wait_next.take() {
            w.complete(NextSignal::End);
        }
        if let Some(w) = s.wait_close.take() {
            w.complete(Ok(()));
        }
    }

    /// Error terminal transition: the error becomes sticky and rejects every
    /// pending waiter.
    fn fail_locked(&self, s: &mut StreamState, error: Error) {
        s.done = true;
        s.err = Some(error.clone());
        if !s.ready {
            s.ready = true;
            s.ready_err = Some(error.clone());
            if let Some(w) = s.wait_ready.take() {
                w.complete(());
            }
        }
        if let Some(w) = s.wait_next.take() {
            w.complete(NextSignal::Failed(error.clone()));
        }
        if let Some(w) = s.wait_close.take() {
            w.complete(Err(error));
        }
    }
}

impl QueryEventSink for QueryShared {
    fn on_fields(&self, fields: Vec<FieldDef>) {
        let mut s = self.lock();
        if s.done || s.ready {
            return;
        }

        let columns = Arc::new(decode_columns(&fields));
        let mut names = HashMap::default();
        for (ordinal, column) in columns.iter().enumerate() {
            names.entry(column.name.clone()).or_insert(ordinal);
        }

        s.columns = Some(columns);
        s.column_names = Some(Arc::new(names));
        s.ready = true;
        if let Some(w) = s.wait_ready.take() {
            w.complete(());
        }
    }

    fn on_result(&self, packet: ResultPacket) {
        let mut s = self.lock();
        // Everything after cancellation is discarded; the terminal event is
        // what transitions state.
        if s.done || s.canceling {
            return;
        }

        match packet {
            ResultPacket::Row(values) => {
                if !s.ready {
                    self.fail_locked(&mut s, Error::InvalidState("row packet before field list"));
                    return;
                }
                if s.is_exec {
                    self.fail_locked(
                        &mut s,
                        Error::InvalidState("row packet for an update statement"),
                    );
                    return;
                }

                if let Some(w) = s.wait_next.take() {
                    // A pending reader takes delivery directly; the packet
                    // never enters the buffer.
                    let row = match (&s.columns, &s.column_names) {
                        (Some(columns), Some(names)) => Row::new(values, columns, names),
                        _ => return,
                    };
                    w.complete(NextSignal::Row(row));
                } else {
                    s.buffer.push_back(values);
                    if s.buffer.len() >= self.high_water && !s.paused {
                        s.paused = true;
                        self.conn.pause();
                    }
                }
            }

            ResultPacket::Exec(result) => {
                if s.ready {
                    self.fail_locked(
                        &mut s,
                        Error::InvalidState("update packet after the statement became ready"),
                    );
                    return;
                }

                s.is_exec = true;
                s.exec_result = Some(result);
                s.ready = true;
                if let Some(w) = s.wait_ready.take() {
                    w.complete(());
                }
                // An update statement has no rows: a pending reader is done.
                if let Some(w) = s.wait_next.take() {
                    w.complete(NextSignal::End);
                }
            }
        }
    }

    fn on_end(&self) {
        let mut s = self.lock();
        if s.done {
            return;
        }
        self.finish_locked(&mut s);
    }

    fn on_error(&self, error: DriverError) {
        let mut s = self.lock();
        if s.done {
            return;
        }

        if s.canceling && error.is_query_interrupted() {
            // Expected aftermath of our own KILL QUERY. If the field list
            // never arrived the interrupt still settles the opening phase;
            // either way the stream ends cleanly.
            if !s.ready {
                s.ready = true;
                s.ready_err = Some(Error::Driver(error));
                if let Some(w) = s.wait_ready.take() {
                    w.complete(());
                }
            }
            self.finish_locked(&mut s);
            return;
        }

        self.fail_locked(&mut s, Error::Driver(error));
    }
}

/// A streaming result set, driven row-by-row by the caller.
///
/// The driver pushes `fields`/`result`/`end`/`error` events; `Rows` adapts
/// them into a pull cursor with a bounded buffer. Delivery is paused on the
/// wire when the buffer reaches the high-water mark and resumed when the
/// caller drains it to the low-water mark.
///
/// A one-shot stream (from [`Pool::query`]) owns its leased connection and
/// releases it on [`close`]; a stream on a dedicated connection or inside a
/// transaction shares the connection and leaves it untouched.
///
/// [`Pool::query`]: crate::Pool::query
/// [`close`]: Rows::close
pub struct Rows {
    shared: Arc<QueryShared>,
    ctx: Context,
    /// Held when the stream owns its connection (single-shot lease).
    lease: Option<PoolConnection>,
    /// Pool handle for the sideband cancel of a shared connection.
    pool: Option<Arc<dyn DriverPool>>,
    keep_open: bool,
    current: Option<Row>,
    // Metadata mirrored out of the shared state once ready.
    meta_seen: bool,
    is_exec: bool,
    columns: Option<Arc<Vec<Column>>>,
    exec_result: Option<QueryResult>,
    ready_err: Option<Error>,
    closed: bool,
    cancel_requested: bool,
}

impl Rows {
    fn start(
        conn: Arc<dyn DriverConn>,
        lease: Option<PoolConnection>,
        pool: Option<Arc<dyn DriverPool>>,
        ctx: Context,
        sql: &str,
        params: Vec<Param>,
        options: &PoolOptions,
    ) -> Self {
        let keep_open = lease.is_none();
        let shared = Arc::new(QueryShared {
            conn: Arc::clone(&conn),
            high_water: options.high_water(),
            low_water: options.low_water(),
            state: Mutex::new(StreamState::default()),
        });

        let sink: Arc<dyn QueryEventSink> = shared.clone() as Arc<dyn QueryEventSink>;
        conn.query(sql, flatten_params(params), sink);

        Self {
            shared,
            ctx,
            lease,
            pool,
            keep_open,
            current: None,
            meta_seen: false,
            is_exec: false,
            columns: None,
            exec_result: None,
            ready_err: None,
            closed: false,
            cancel_requested: false,
        }
    }

    /// The stream owns `lease` and releases it on close (destroys it on
    /// cancel).
    pub(crate) fn start_owned(
        lease: PoolConnection,
        ctx: Context,
        sql: &str,
        params: Vec<Param>,
        options: &PoolOptions,
    ) -> Self {
        let conn = Arc::clone(lease.raw());
        Self::start(conn, Some(lease), None, ctx, sql, params, options)
    }

    /// The connection is shared with the caller and survives the stream;
    /// cancellation goes out-of-band through `pool`.
    pub(crate) fn start_shared(
        conn: Arc<dyn DriverConn>,
        pool: Arc<dyn DriverPool>,
        ctx: Context,
        sql: &str,
        params: Vec<Param>,
        options: &PoolOptions,
    ) -> Self {
        Self::start(conn, None, Some(pool), ctx, sql, params, options)
    }

    fn cache_meta(&mut self, s: &StreamState) {
        if self.meta_seen || !s.ready {
            return;
        }
        self.meta_seen = true;
        self.is_exec = s.is_exec;
        self.columns = s.columns.clone();
        self.exec_result = s.exec_result;
        self.ready_err = s.ready_err.clone();
    }

    /// Await a waiter, observing context cancellation.
    ///
    /// Cancellation does not abandon the wait: it triggers the cancel
    /// sequence and then keeps waiting for the terminal transition, which is
    /// what ultimately settles the promise.
    async fn settle<T>(&mut self, mut promise: Promise<T>) -> Option<T> {
        if !self.cancel_requested {
            tokio::select! {
                value = &mut promise => return value,
                () = self.ctx.cancelled() => {
                    self.start_cancel().await;
                }
            }
        }
        promise.await
    }

    async fn start_cancel(&mut self) {
        self.cancel_requested = true;

        let engaged = {
            let shared = Arc::clone(&self.shared);
            let mut s = shared.lock();
            if s.done {
                false
            } else {
                s.canceling = true;
                true
            }
        };
        if !engaged {
            return;
        }

        if self.keep_open {
            // The connection is shared: it must survive. MySQL's only
            // out-of-band cancel is a KILL QUERY from another connection.
            if let Some(pool) = self.pool.clone() {
                kill_query(&pool, self.shared.conn.thread_id()).await;
            }
        } else {
            // The stream owns the connection: hard-kill it, which terminates
            // the query on the wire, and synthesize the terminal end.
            if let Some(lease) = self.lease.take() {
                lease.destroy();
            }
            let shared = Arc::clone(&self.shared);
            let mut s = shared.lock();
            shared.finish_locked(&mut s);
        }
    }

    /// Resolves once the field list (or an update result) has been observed.
    ///
    /// A ready-phase driver error is the *return value* here; it is also
    /// re-raised by the metadata accessors ([`columns`][Self::columns],
    /// [`column_types`][Self::column_types], [`result`][Self::result]),
    /// while `close()` remains usable for teardown.
    pub async fn ready(&mut self) -> Result<()> {
        loop {
            let promise = {
                let shared = Arc::clone(&self.shared);
                let mut s = shared.lock();
                if s.ready {
                    self.cache_meta(&s);
                    return match &self.ready_err {
                        Some(error) => Err(error.clone()),
                        None => Ok(()),
                    };
                }
                if s.wait_ready.is_some() {
                    return Err(Error::InvalidState("ready() is already pending"));
                }
                let (completer, promise) = promise::channel();
                s.wait_ready = Some(completer);
                promise
            };

            self.settle(promise).await;
        }
    }

    /// Column names, in ordinal order. Available once [`ready`][Self::ready]
    /// has resolved; update statements have none.
    pub fn columns(&self) -> Result<Vec<&str>> {
        Ok(self
            .column_types()?
            .iter()
            .map(|column| column.name.as_str())
            .collect())
    }

    /// Column metadata, in ordinal order. Gated like
    /// [`columns`][Self::columns].
    pub fn column_types(&self) -> Result<&[Column]> {
        if !self.meta_seen || self.is_exec {
            return Err(Error::NotReady);
        }
        if let Some(error) = &self.ready_err {
            return Err(error.clone());
        }
        match &self.columns {
            Some(columns) => Ok(columns),
            None => Err(Error::NotReady),
        }
    }

    /// Advance the cursor.
    ///
    /// Resolves `true` when a row became current, `false` at end of stream
    /// (idempotently), and with the stream error if one occurred. For update
    /// statements this always resolves `false`. Cancellation surfaces as a
    /// clean `false`, never an error.
    pub async fn next(&mut self) -> Result<bool> {
        self.current = None;

        let promise = {
            let shared = Arc::clone(&self.shared);
            let mut s = shared.lock();
            self.cache_meta(&s);

            if let Some(error) = &s.err {
                return Err(error.clone());
            }

            if let Some(values) = s.buffer.pop_front() {
                if s.paused && s.buffer.len() <= shared.low_water {
                    s.paused = false;
                    shared.conn.resume();
                }
                let row = match (&s.columns, &s.column_names) {
                    (Some(columns), Some(names)) => Row::new(values, columns, names),
                    _ => return Err(Error::InvalidState("buffered row without a field list")),
                };
                self.current = Some(row);
                return Ok(true);
            }

            if s.done || s.is_exec {
                return Ok(false);
            }
            if s.wait_next.is_some() {
                return Err(Error::InvalidState("next() is already pending"));
            }

            let (completer, promise) = promise::channel();
            s.wait_next = Some(completer);
            promise
        };

        match self.settle(promise).await {
            Some(NextSignal::Row(row)) => {
                if !self.meta_seen {
                    let shared = Arc::clone(&self.shared);
                    let s = shared.lock();
                    self.cache_meta(&s);
                }
                self.current = Some(row);
                Ok(true)
            }
            Some(NextSignal::End) => Ok(false),
            Some(NextSignal::Failed(error)) => Err(error),
            None => Err(Error::Driver(DriverError::new(
                CR_SERVER_LOST,
                "driver abandoned the statement without a terminal event",
            ))),
        }
    }

    /// The current row.
    pub fn row(&self) -> Result<&Row> {
        self.current.as_ref().ok_or(Error::NoRow)
    }

    /// The update result of an exec statement.
    pub fn result(&self) -> Result<QueryResult> {
        if !self.meta_seen {
            return Err(Error::NotReady);
        }
        if let Some(error) = &self.ready_err {
            return Err(error.clone());
        }
        if !self.is_exec {
            return Err(Error::InvalidState(
                "statement produced a result set where an update result was expected",
            ));
        }
        self.exec_result
            .ok_or(Error::InvalidState("update statement without a result packet"))
    }

    /// Release the stream, cancelling the underlying query if it is still
    /// running and discarding any buffered rows. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let pending = {
            let shared = Arc::clone(&self.shared);
            let mut s = shared.lock();
            self.cache_meta(&s);
            if s.done {
                None
            } else {
                if s.wait_close.is_some() {
                    return Err(Error::InvalidState("close() is already pending"));
                }
                let (completer, promise) = promise::channel();
                s.wait_close = Some(completer);
                Some(promise)
            }
        };

        let result = match pending {
            None => Ok(()),
            Some(promise) => {
                if !self.cancel_requested {
                    self.start_cancel().await;
                }
                promise.await.unwrap_or(Ok(()))
            }
        };

        self.teardown();
        self.closed = true;
        result
    }

    fn teardown(&mut self) {
        {
            let mut s = self.shared.lock();
            s.buffer.clear();
        }
        self.current = None;
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    /// Consume the cursor as a stream of rows. The underlying query is
    /// closed on exhaustion or error.
    pub fn into_stream(self) -> BoxStream<'static, Result<Row>> {
        Box::pin(futures_util::stream::try_unfold(self, |mut rows| async move {
            match rows.next().await {
                Ok(true) => {
                    let row = rows.row()?.clone();
                    Ok(Some((row, rows)))
                }
                Ok(false) => {
                    rows.close().await?;
                    Ok(None)
                }
                Err(error) => {
                    if let Err(close_error) = rows.close().await {
                        tracing::debug!(error = %close_error, "close failed after stream error");
                    }
                    Err(error)
                }
            }
        }))
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let lease = self.lease.take();

        {
            let mut s = shared.lock();
            s.buffer.clear();
            if s.done {
                drop(s);
                if let Some(lease) = lease {
                    lease.release();
                }
                return;
            }
            s.canceling = true;
        }

        if self.keep_open {
            // Shared connection: fire the sideband kill from a task.
            if let (Some(pool), Ok(handle)) =
                (self.pool.clone(), tokio::runtime::Handle::try_current())
            {
                let thread_id = shared.conn.thread_id();
                handle.spawn(async move {
                    kill_query(&pool, thread_id).await;
                });
            }
        } else if let Some(lease) = lease {
            lease.destroy();
            let mut s = shared.lock();
            shared.finish_locked(&mut s);
        }
    }
}

/// Issue `KILL QUERY <thread_id>` over a separate pooled connection.
///
/// Best-effort: the primary query's terminal event is what transitions
/// state, so failures here are logged and swallowed.
pub(crate) async fn kill_query(pool: &Arc<dyn DriverPool>, thread_id: u64) {
    let conn = match pool.get_connection().await {
        Ok(conn) => conn,
        Err(error) => {
            tracing::warn!(error = %error, thread_id, "could not acquire a connection for KILL QUERY");
            return;
        }
    };

    if let Err(error) = run_simple(&conn, &format!("KILL QUERY {thread_id}")).await {
        tracing::warn!(error = %error, thread_id, "KILL QUERY failed");
    }
    conn.release();
}

/// Run a statement for its side effect only, waiting for the terminal event.
pub(crate) async fn run_simple(
    conn: &Arc<dyn DriverConn>,
    sql: &str,
) -> Result<(), DriverError> {
    struct SimpleSink {
        done: Mutex<Option<Completer<Result<(), DriverError>>>>,
    }

    impl QueryEventSink for SimpleSink {
        fn on_fields(&self, _fields: Vec<FieldDef>) {}
        fn on_result(&self, _packet: ResultPacket) {}

        fn on_end(&self) {
            if let Some(completer) = self.done.lock().unwrap_or_else(PoisonError::into_inner).take()
            {
                completer.complete(Ok(()));
            }
        }

        fn on_error(&self, error: DriverError) {
            if let Some(completer) = self.done.lock().unwrap_or_else(PoisonError::into_inner).take()
            {
                completer.complete(Err(error));
            }
        }
    }

    let (completer, promise) = promise::channel();
    let sink = Arc::new(SimpleSink {
        done: Mutex::new(Some(completer)),
    });
    conn.query(sql, Vec::new(), sink);

    promise.await.unwrap_or_else(|| {
        Err(DriverError::new(
            CR_SERVER_LOST,
            "driver abandoned the statement without a terminal event",
        ))
    })
}

async fn finish_with<T>(mut rows: Rows, result: Result<T>) -> Result<T> {
    let closed = rows.close().await;
    match result {
        Ok(value) => closed.map(|()| value),
        Err(error) => {
            if let Err(close_error) = closed {
                tracing::debug!(error = %close_error, "close failed after query error");
            }
            Err(error)
        }
    }
}

/// Advance once, clone the row off the cursor, and close on every path.
pub(crate) async fn run_query_row(mut rows: Rows) -> Result<Option<Row>> {
    let fetched = match rows.next().await {
        Ok(true) => rows.row().map(|row| Some(row.clone())),
        Ok(false) => Ok(None),
        Err(error) => Err(error),
    };
    finish_with(rows, fetched).await
}

/// Await readiness, take the update result, and close on every path.
pub(crate) async fn run_exec(mut rows: Rows) -> Result<QueryResult> {
    let result = match rows.ready().await {
        Ok(()) => rows.result(),
        Err(error) => Err(error),
    };
    finish_with(rows, result).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures_core::future::BoxFuture;

    use super::*;
    use crate::{driver::type_code, error::ER_QUERY_INTERRUPTED, Value};

    #[derive(Default)]
    struct StubConn {
        end_immediately: bool,
        pause_calls: AtomicUsize,
        resume_calls: AtomicUsize,
        destroyed: AtomicBool,
    }

    impl DriverConn for StubConn {
        fn thread_id(&self) -> u64 {
            1
        }

        fn query(&self, _sql: &str, _params: Vec<Value>, sink: Arc<dyn QueryEventSink>) {
            if self.end_immediately {
                sink.on_result(ResultPacket::Exec(QueryResult::default()));
                sink.on_end();
            }
        }

        fn pause(&self) {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {}

        fn end(&self) -> BoxFuture<'static, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    struct StubPool;

    impl DriverPool for StubPool {
        fn get_connection(&self) -> BoxFuture<'static, Result<Arc<dyn DriverConn>, DriverError>> {
            Box::pin(async {
                Ok(Arc::new(StubConn {
                    end_immediately: true,
                    ..StubConn::default()
                }) as Arc<dyn DriverConn>)
            })
        }

        fn end(&self) -> BoxFuture<'static, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn shared_rows() -> Rows {
        Rows::start_shared(
            Arc::new(StubConn::default()),
            Arc::new(StubPool),
            Context::new(),
            "SELECT 1",
            Vec::new(),
            &PoolOptions::default(),
        )
    }

    fn int_field(name: &str) -> FieldDef {
        FieldDef {
            name: name.into(),
            type_code: type_code::LONG,
            flags: 0,
            column_length: 11,
            decimals: 0,
        }
    }

    #[tokio::test]
    async fn interrupt_before_fields_settles_ready_with_the_error() -> anyhow::Result<()> {
        let mut rows = shared_rows();
        rows.ctx.cancel();

        let shared = Arc::clone(&rows.shared);
        tokio::spawn(async move {
            // The interrupt arrives only once the cancel has gone out.
            while !shared.lock().canceling {
                tokio::task::yield_now().await;
            }
            shared.on_error(DriverError::new(
                ER_QUERY_INTERRUPTED,
                "Query execution was interrupted",
            ));
        });

        let ready = rows.ready().await;
        match ready {
            Err(Error::Driver(error)) => assert!(error.is_query_interrupted()),
            other => panic!("expected the interrupt as the ready value, got {other:?}"),
        }

        // The stream still ends cleanly: no sticky error.
        assert!(!rows.next().await?);
        rows.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn close_racing_the_terminal_end_settles_once() -> anyhow::Result<()> {
        let mut rows = shared_rows();
        let shared = Arc::clone(&rows.shared);

        tokio::spawn(async move {
            while !shared.lock().canceling {
                tokio::task::yield_now().await;
            }
            shared.on_fields(vec![int_field("n")]);
            shared.on_end();
        });

        rows.close().await?;
        rows.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn row_before_fields_is_a_protocol_error() {
        let rows = shared_rows();
        rows.shared.on_result(ResultPacket::Row(vec![Value::Int(1)]));

        let s = rows.shared.lock();
        assert!(matches!(s.err, Some(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn cancel_while_next_is_waiting_resolves_false() -> anyhow::Result<()> {
        let mut rows = shared_rows();
        rows.shared.on_fields(vec![int_field("n")]);

        let ctx = rows.ctx.clone();
        let shared = Arc::clone(&rows.shared);
        tokio::spawn(async move {
            while shared.lock().wait_next.is_none() {
                tokio::task::yield_now().await;
            }
            ctx.cancel();
            while !shared.lock().canceling {
                tokio::task::yield_now().await;
            }
            shared.on_error(DriverError::new(
                ER_QUERY_INTERRUPTED,
                "Query execution was interrupted",
            ));
        });

        // The waiting next() observes the cancel and then the synthesized
        // end; it must not reject.
        assert!(!rows.next().await?);
        rows.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn waiter_path_bypasses_the_buffer() -> anyhow::Result<()> {
        let mut rows = shared_rows();
        let shared = Arc::clone(&rows.shared);

        tokio::spawn(async move {
            while shared.lock().wait_next.is_none() {
                tokio::task::yield_now().await;
            }
            shared.on_fields(vec![int_field("n")]);
            shared.on_result(ResultPacket::Row(vec![Value::Int(5)]));
            shared.on_end();
        });

        assert!(rows.next().await?);
        assert_eq!(rows.row()?.get("n")?, &Value::Int(5));
        assert!(rows.shared.lock().buffer.is_empty());
        assert!(!rows.next().await?);
        rows.close().await?;
        Ok(())
    }
}
