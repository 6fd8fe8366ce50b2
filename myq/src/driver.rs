//! The contract the physical MySQL wire client must satisfy.
//!
//! myq never speaks the wire itself. It drives a driver through the traits
//! below: a pool that leases connections, connections that run one statement
//! at a time, and a push-style event sink the driver feeds from its own
//! task. The `myq-test` crate provides a scripted in-process implementation;
//! a production binding adapts a socket-level client.

use std::sync::Arc;

use futures_core::future::BoxFuture;

use crate::{error::DriverError, QueryResult, Value};

/// Wire type codes from the MySQL column definition packet.
pub mod type_code {
    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const ENUM: u8 = 247;
    pub const SET: u8 = 248;
    pub const TINY_BLOB: u8 = 249;
    pub const MEDIUM_BLOB: u8 = 250;
    pub const LONG_BLOB: u8 = 251;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
    pub const GEOMETRY: u8 = 255;
}

/// Column definition flags.
pub mod field_flag {
    pub const NOT_NULL: u16 = 1;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const SET: u16 = 2048;
}

/// A raw field packet as read off the wire.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub type_code: u8,
    pub flags: u16,
    /// Column display length in bytes.
    pub column_length: u32,
    pub decimals: u8,
}

/// One `result` event: a data row (in field order) or the single update
/// packet of an exec statement.
#[derive(Debug, Clone)]
pub enum ResultPacket {
    Row(Vec<Value>),
    Exec(QueryResult),
}

/// The push side of a statement.
///
/// For a row-returning statement the driver emits `on_fields` once, then
/// zero or more `on_result(Row)` packets, then exactly one of `on_end` /
/// `on_error`. For an exec statement it emits a single `on_result(Exec)`
/// followed by `on_end`, with no field list. After the terminal event the
/// sink must not be called again.
///
/// Calls are made from the driver's own task and must not re-enter the
/// driver; `pause`/`resume` issued from inside a sink callback only set
/// delivery state.
pub trait QueryEventSink: Send + Sync {
    fn on_fields(&self, fields: Vec<FieldDef>);
    fn on_result(&self, packet: ResultPacket);
    fn on_end(&self);
    fn on_error(&self, error: DriverError);
}

/// A pooled wire connection.
///
/// A connection runs at most one statement at a time; issuing a second
/// `query` before the previous one reached its terminal event is a caller
/// error and the driver may fail or interleave events arbitrarily.
pub trait DriverConn: Send + Sync + 'static {
    /// Server-assigned connection id, the target of `KILL QUERY`.
    fn thread_id(&self) -> u64;

    /// Issue a statement. Events arrive on `sink` asynchronously.
    fn query(&self, sql: &str, params: Vec<Value>, sink: Arc<dyn QueryEventSink>);

    /// Stop delivering further `result` events until `resume`.
    fn pause(&self);
    fn resume(&self);

    /// Return the connection to its pool.
    fn release(&self);

    /// Graceful close; the connection leaves the pool.
    fn end(&self) -> BoxFuture<'static, Result<(), DriverError>>;

    /// Hard kill: drop the socket, terminating any in-flight statement.
    fn destroy(&self);
}

/// The driver's connection pool.
pub trait DriverPool: Send + Sync + 'static {
    /// Lease a connection. The returned future is `'static` so an abandoned
    /// acquire can still be driven to completion and the late connection
    /// released rather than leaked.
    fn get_connection(&self) -> BoxFuture<'static, Result<Arc<dyn DriverConn>, DriverError>>;

    /// Shut the pool down.
    fn end(&self) -> BoxFuture<'static, Result<(), DriverError>>;
}
