//! Test support for myq: a scripted in-process driver implementing the wire
//! contract.
//!
//! The driver honors `pause`/`resume` between row packets, routes
//! `KILL QUERY <id>` to the targeted in-flight statement, and keeps counters
//! for leases, pause/resume calls, and destroyed connections so tests can
//! assert on resource behavior.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures_core::future::BoxFuture;
use myq::{
    driver::{
        field_flag, type_code, DriverConn, DriverPool, FieldDef, QueryEventSink, ResultPacket,
    },
    DriverError, Pool, PoolOptions, QueryResult, Value,
};
use tokio::sync::Notify;

const ER_QUERY_INTERRUPTED: u16 = 1317;

/// Script for one statement, matched by exact SQL text.
///
/// Unscripted update-style statements (`INSERT`, `SET`, `COMMIT`, ...) fall
/// back to an empty exec result; anything else fails with a parse error so a
/// missing script is loud.
#[derive(Clone)]
pub enum Script {
    /// Field packets, then row packets, then a clean end.
    Rows {
        fields: Vec<FieldDef>,
        rows: Vec<Vec<Value>>,
    },
    /// Rows followed by a mid-stream error instead of the end.
    RowsThenError {
        fields: Vec<FieldDef>,
        rows: Vec<Vec<Value>>,
        error: DriverError,
    },
    /// A single update packet, then end.
    Exec(QueryResult),
    /// Immediate failure.
    Error(DriverError),
}

pub fn int_field(name: &str) -> FieldDef {
    FieldDef {
        name: name.into(),
        type_code: type_code::LONG,
        flags: field_flag::NOT_NULL,
        column_length: 11,
        decimals: 0,
    }
}

pub fn varchar_field(name: &str) -> FieldDef {
    FieldDef {
        name: name.into(),
        type_code: type_code::VAR_STRING,
        flags: 0,
        column_length: 1020,
        decimals: 0,
    }
}

/// A one-column integer result set.
pub fn int_rows(name: &str, values: impl IntoIterator<Item = i64>) -> Script {
    Script::Rows {
        fields: vec![int_field(name)],
        rows: values.into_iter().map(|v| vec![Value::Int(v)]).collect(),
    }
}

fn interrupt_error() -> DriverError {
    DriverError::new(ER_QUERY_INTERRUPTED, "Query execution was interrupted")
}

fn default_script(sql: &str) -> Script {
    let head = sql
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    match head.as_str() {
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "SET" | "START" | "BEGIN" | "COMMIT"
        | "ROLLBACK" | "CREATE" | "DROP" | "TRUNCATE" => Script::Exec(QueryResult::default()),
        _ => Script::Error(DriverError::new(
            1064,
            format!("no script for statement: {sql}"),
        )),
    }
}

/// Delivery control for one in-flight statement.
struct QueryRun {
    paused: AtomicBool,
    interrupted: AtomicBool,
    halted: AtomicBool,
    wake: Notify,
}

struct DriverState {
    scripts: Mutex<HashMap<String, Script>>,
    statements: Mutex<Vec<String>>,
    pause_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    destroyed: AtomicUsize,
    rows_emitted: AtomicUsize,
    next_thread_id: AtomicU64,
    running: Mutex<HashMap<u64, Arc<QueryRun>>>,
    hold_acquires: AtomicBool,
    hold_changed: Notify,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted stand-in for the wire driver's pool.
///
/// Clones share state: hand [`pool`][TestDriver::pool] to the code under
/// test and keep a clone for scripting and inspection.
#[derive(Clone)]
pub struct TestDriver {
    state: Arc<DriverState>,
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(DriverState {
                scripts: Mutex::new(HashMap::new()),
                statements: Mutex::new(Vec::new()),
                pause_calls: AtomicUsize::new(0),
                resume_calls: AtomicUsize::new(0),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
                rows_emitted: AtomicUsize::new(0),
                next_thread_id: AtomicU64::new(1),
                running: Mutex::new(HashMap::new()),
                hold_acquires: AtomicBool::new(false),
                hold_changed: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A myq pool backed by this driver.
    pub fn pool(&self) -> Pool {
        Pool::new(Arc::new(self.clone()))
    }

    pub fn pool_with_options(&self, options: PoolOptions) -> Pool {
        Pool::with_options(Arc::new(self.clone()), options)
    }

    /// Register the script for an exact SQL text.
    pub fn script(&self, sql: &str, script: Script) {
        lock(&self.state.scripts).insert(sql.to_owned(), script);
    }

    /// Every statement issued so far, in order, across all connections.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state.statements).clone()
    }

    pub fn pause_count(&self) -> usize {
        self.state.pause_calls.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.state.resume_calls.load(Ordering::SeqCst)
    }

    pub fn acquired_count(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn destroyed_count(&self) -> usize {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    /// Total row packets pushed so far.
    pub fn rows_emitted(&self) -> usize {
        self.state.rows_emitted.load(Ordering::SeqCst)
    }

    /// Leases currently held: acquired minus released and destroyed.
    pub fn outstanding(&self) -> usize {
        let acquired = self.state.acquired.load(Ordering::SeqCst);
        let returned = self.state.released.load(Ordering::SeqCst)
            + self.state.destroyed.load(Ordering::SeqCst);
        acquired.saturating_sub(returned)
    }

    /// While held, `get_connection` blocks; releasing the hold lets pending
    /// acquires complete.
    pub fn hold_acquires(&self, hold: bool) {
        self.state.hold_acquires.store(hold, Ordering::SeqCst);
        self.state.hold_changed.notify_waiters();
    }
}

/// Await a condition that another task establishes asynchronously.
///
/// # Panics
///
/// Panics if the condition does not hold within two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for {what}");
}

impl DriverPool for TestDriver {
    fn get_connection(&self) -> BoxFuture<'static, Result<Arc<dyn DriverConn>, DriverError>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            loop {
                let unheld = state.hold_changed.notified();
                if !state.hold_acquires.load(Ordering::SeqCst) {
                    break;
                }
                unheld.await;
            }

            if state.closed.load(Ordering::SeqCst) {
                return Err(DriverError::new(2006, "driver pool is closed"));
            }

            state.acquired.fetch_add(1, Ordering::SeqCst);
            let thread_id = state.next_thread_id.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TestConn {
                state,
                thread_id,
                run: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }) as Arc<dyn DriverConn>)
        })
    }

    fn end(&self) -> BoxFuture<'static, Result<(), DriverError>> {
        self.state.closed.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

pub struct TestConn {
    state: Arc<DriverState>,
    thread_id: u64,
    run: Mutex<Option<Arc<QueryRun>>>,
    destroyed: AtomicBool,
}

impl DriverConn for TestConn {
    fn thread_id(&self) -> u64 {
        self.thread_id
    }

    fn query(&self, sql: &str, _params: Vec<Value>, sink: Arc<dyn QueryEventSink>) {
        lock(&self.state.statements).push(sql.to_owned());

        // KILL QUERY is routed to the targeted in-flight statement.
        if let Some(target) = sql.strip_prefix("KILL QUERY ") {
            let target = target.trim().parse::<u64>().ok();
            if let Some(run) = target.and_then(|id| lock(&self.state.running).get(&id).cloned()) {
                run.interrupted.store(true, Ordering::SeqCst);
                run.wake.notify_one();
            }
            tokio::spawn(async move {
                sink.on_result(ResultPacket::Exec(QueryResult::default()));
                sink.on_end();
            });
            return;
        }

        let script = lock(&self.state.scripts)
            .get(sql)
            .cloned()
            .unwrap_or_else(|| default_script(sql));

        let run = Arc::new(QueryRun {
            paused: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            halted: AtomicBool::new(self.destroyed.load(Ordering::SeqCst)),
            wake: Notify::new(),
        });
        *lock(&self.run) = Some(Arc::clone(&run));
        lock(&self.state.running).insert(self.thread_id, Arc::clone(&run));

        let state = Arc::clone(&self.state);
        let thread_id = self.thread_id;
        tokio::spawn(async move {
            emit(&state, &run, script, sink).await;
            let mut running = lock(&state.running);
            if let Some(current) = running.get(&thread_id) {
                if Arc::ptr_eq(current, &run) {
                    running.remove(&thread_id);
                }
            }
        });
    }

    fn pause(&self) {
        self.state.pause_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = lock(&self.run).as_ref() {
            run.paused.store(true, Ordering::SeqCst);
        }
    }

    fn resume(&self) {
        self.state.resume_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = lock(&self.run).as_ref() {
            run.paused.store(false, Ordering::SeqCst);
            run.wake.notify_one();
        }
    }

    fn release(&self) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) -> BoxFuture<'static, Result<(), DriverError>> {
        self.state.released.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.state.destroyed.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = lock(&self.run).as_ref() {
            run.halted.store(true, Ordering::SeqCst);
            run.wake.notify_one();
        }
    }
}

async fn emit(
    state: &Arc<DriverState>,
    run: &Arc<QueryRun>,
    script: Script,
    sink: Arc<dyn QueryEventSink>,
) {
    match script {
        Script::Exec(result) => {
            if run.halted.load(Ordering::SeqCst) {
                return;
            }
            sink.on_result(ResultPacket::Exec(result));
            sink.on_end();
        }
        Script::Error(error) => {
            if run.halted.load(Ordering::SeqCst) {
                return;
            }
            sink.on_error(error);
        }
        Script::Rows { fields, rows } => {
            if emit_rows(state, run, fields, rows, &sink).await {
                sink.on_end();
            }
        }
        Script::RowsThenError {
            fields,
            rows,
            error,
        } => {
            if emit_rows(state, run, fields, rows, &sink).await {
                sink.on_error(error);
            }
        }
    }
}

/// Push field and row packets, honoring pause, interrupt, and destroy.
/// Returns `false` if the statement was cut short (the terminal event, if
/// any, has already been emitted).
async fn emit_rows(
    state: &Arc<DriverState>,
    run: &Arc<QueryRun>,
    fields: Vec<FieldDef>,
    rows: Vec<Vec<Value>>,
    sink: &Arc<dyn QueryEventSink>,
) -> bool {
    if run.halted.load(Ordering::SeqCst) {
        return false;
    }
    if run.interrupted.load(Ordering::SeqCst) {
        sink.on_error(interrupt_error());
        return false;
    }

    sink.on_fields(fields);

    for row in rows {
        loop {
            if run.halted.load(Ordering::SeqCst) {
                // Destroyed socket: nothing further arrives.
                return false;
            }
            if run.interrupted.load(Ordering::SeqCst) {
                sink.on_error(interrupt_error());
                return false;
            }
            if !run.paused.load(Ordering::SeqCst) {
                break;
            }
            run.wake.notified().await;
        }

        state.rows_emitted.fetch_add(1, Ordering::SeqCst);
        sink.on_result(ResultPacket::Row(row));
    }

    if run.halted.load(Ordering::SeqCst) {
        return false;
    }
    if run.interrupted.load(Ordering::SeqCst) {
        sink.on_error(interrupt_error());
        return false;
    }
    true
}
