use std::sync::Arc;

use indexmap::IndexMap;

use crate::{column::Column, error::Error, value::Value, HashMap};

/// One row of a result set.
///
/// A `Row` owns its values; it stays valid after the cursor advances and can
/// be cloned cheaply (column metadata is shared).
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) values: Box<[Value]>,
    pub(crate) columns: Arc<Vec<Column>>,
    pub(crate) column_names: Arc<HashMap<String, usize>>,
}

/// Index into a row: a `usize` ordinal or a `&str` column name.
pub trait ColumnIndex {
    fn index(&self, row: &Row) -> Result<usize, Error>;
}

impl ColumnIndex for usize {
    fn index(&self, row: &Row) -> Result<usize, Error> {
        let len = row.len();

        if *self >= len {
            return Err(Error::ColumnIndexOutOfBounds { len, index: *self });
        }

        Ok(*self)
    }
}

impl ColumnIndex for &'_ str {
    fn index(&self, row: &Row) -> Result<usize, Error> {
        row.column_names
            .get(*self)
            .copied()
            .ok_or_else(|| Error::ColumnNotFound((*self).into()))
    }
}

impl Row {
    pub(crate) fn new(
        values: Vec<Value>,
        columns: &Arc<Vec<Column>>,
        column_names: &Arc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            values: values.into_boxed_slice(),
            columns: Arc::clone(columns),
            column_names: Arc::clone(column_names),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns `true` if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Index into the row and return the value.
    ///
    /// A string index accesses a column by name and a `usize` index accesses
    /// a column by position.
    ///
    /// # Errors
    ///
    ///  * [`ColumnNotFound`] if no column has the given name.
    ///  * [`ColumnIndexOutOfBounds`] if the `usize` index is past the end.
    ///
    /// [`ColumnNotFound`]: Error::ColumnNotFound
    /// [`ColumnIndexOutOfBounds`]: Error::ColumnIndexOutOfBounds
    pub fn get<I>(&self, index: I) -> Result<&Value, Error>
    where
        I: ColumnIndex,
    {
        Ok(&self.values[index.index(self)?])
    }

    /// Snapshot of the row as a name → value map, in column order.
    pub fn to_object(&self) -> IndexMap<String, Value> {
        self.columns
            .iter()
            .zip(self.values.iter())
            .map(|(column, value)| (column.name.clone(), value.clone()))
            .collect()
    }

    /// Snapshot of the row values in ordinal order.
    pub fn to_array(&self) -> Vec<Value> {
        self.values.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::TypeInfo;

    fn row() -> Row {
        let columns = Arc::new(vec![
            Column {
                name: "id".into(),
                type_info: TypeInfo {
                    type_name: "BIGINT",
                    nullable: false,
                    length: None,
                    decimal: None,
                },
            },
            Column {
                name: "label".into(),
                type_info: TypeInfo {
                    type_name: "VARCHAR",
                    nullable: true,
                    length: Some(32),
                    decimal: None,
                },
            },
        ]);
        let mut names = HashMap::default();
        names.insert("id".to_owned(), 0);
        names.insert("label".to_owned(), 1);

        Row::new(
            vec![Value::Int(7), Value::Text("seven".into())],
            &columns,
            &Arc::new(names),
        )
    }

    #[test]
    fn ordinal_and_named_access_agree() {
        let row = row();
        assert_eq!(row.get(0).unwrap(), row.get("id").unwrap());
        assert_eq!(row.get(1).unwrap(), &Value::Text("seven".into()));
    }

    #[test]
    fn bad_indexes_error() {
        let row = row();
        assert!(matches!(
            row.get(2),
            Err(Error::ColumnIndexOutOfBounds { index: 2, len: 2 })
        ));
        assert!(matches!(row.get("missing"), Err(Error::ColumnNotFound(_))));
    }

    #[test]
    fn snapshots_preserve_column_order() {
        let row = row();
        assert_eq!(row.to_array(), vec![Value::Int(7), Value::Text("seven".into())]);

        let object = row.to_object();
        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        assert_eq!(keys, ["id", "label"]);
        assert_eq!(object["label"], Value::Text("seven".into()));
    }
}
