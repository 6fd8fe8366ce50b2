mod column;
mod connection;
mod context;
pub mod driver;
mod error;
mod pool;
mod promise;
mod query;
mod query_result;
mod row;
mod transaction;
mod value;

/// myq uses ahash for column-name lookup, at the cost of reduced DoS
/// resistance.
use ahash::AHashMap as HashMap;
pub use indexmap::IndexMap;

pub use crate::{
    column::{Column, DecimalSize, TypeInfo},
    connection::Connection,
    context::{run_transaction, Context, Transactable},
    error::{DriverError, Error, Result},
    pool::{Pool, PoolOptions},
    query::Rows,
    query_result::QueryResult,
    row::{ColumnIndex, Row},
    transaction::{IsolationLevel, Transaction, TxnOptions},
    value::{Param, Value},
};
