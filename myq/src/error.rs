//! Types for working with errors produced by myq.

use std::fmt;

/// A specialized `Result` type for myq.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Server errno raised on the victim connection when its query is killed.
pub(crate) const ER_QUERY_INTERRUPTED: u16 = 1317;

/// Errno used when the driver abandons a statement without a terminal event.
pub(crate) const CR_SERVER_LOST: u16 = 2013;

/// An error reported by the wire driver or the MySQL server.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverError {
    /// MySQL errno (server errors) or client errno (CR_* range).
    pub code: u16,
    pub message: String,
}

impl DriverError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `true` for `ER_QUERY_INTERRUPTED`, the expected outcome of a
    /// `KILL QUERY` issued against the connection.
    pub fn is_query_interrupted(&self) -> bool {
        self.code == ER_QUERY_INTERRUPTED
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.message, self.code)
    }
}

impl std::error::Error for DriverError {}

/// Represents all the ways a method can fail within myq.
///
/// The enum is `Clone` because a stream error is sticky: it is redelivered
/// on every `next()` call after the one that first observed it.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error returned from the database.
    #[error("error returned from database: {0}")]
    Driver(#[source] DriverError),

    /// The context carried by the call was cancelled.
    #[error("operation canceled")]
    Canceled,

    /// Result metadata was read before the query became ready.
    #[error("result metadata is not available before the query is ready")]
    NotReady,

    /// The current row was read without a preceding successful `next()`.
    #[error("no current row; next() must have returned true")]
    NoRow,

    /// A surface method was called on a closed connection or transaction.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// [`Pool::close`] was called before this operation started.
    ///
    /// [`Pool::close`]: crate::Pool::close
    #[error("attempted to acquire a connection on a closed pool")]
    PoolClosed,

    /// The driver violated the event protocol, or an update-statement
    /// accessor was used on a row stream (or vice versa).
    #[error("invalid query state: {0}")]
    InvalidState(&'static str),

    /// An isolation level outside the supported set was requested.
    #[error("unsupported isolation level: {0}")]
    UnsupportedIsolation(String),

    /// Column index was out of bounds.
    #[error("column index out of bounds: the len is {len}, but the index is {index}")]
    ColumnIndexOutOfBounds { index: usize, len: usize },

    /// No column found for the given name.
    #[error("no column found for name: {0}")]
    ColumnNotFound(String),
}

impl From<DriverError> for Error {
    fn from(error: DriverError) -> Self {
        Error::Driver(error)
    }
}
