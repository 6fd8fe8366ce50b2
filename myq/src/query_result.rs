/// The outcome of an update (exec) statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryResult {
    /// Number of rows changed by the statement.
    pub rows_affected: u64,

    /// Auto-increment id assigned by an `INSERT`, zero otherwise.
    pub last_insert_id: u64,
}
