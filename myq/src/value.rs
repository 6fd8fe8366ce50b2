/// An owned scalar as delivered by the driver or bound as a parameter.
///
/// Integer-typed columns arrive as [`Value::Int`] (or [`Value::UInt`] for
/// unsigned columns that do not fit `i64`); textual and temporal columns
/// arrive as [`Value::Text`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(0) | Value::UInt(0) => Some(false),
            Value::Int(1) | Value::UInt(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Bool(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            Value::Text(v) => Some(v.as_bytes()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// A statement parameter: a raw value or a named pair.
///
/// SQL placeholders are positional `?`; named pairs are flattened to their
/// value in positional order before the driver sees them, this layer does
/// not rebind `:name` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    Named { name: String, value: Value },
}

impl Param {
    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Param::Named {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The parameter name, if this is a named pair.
    pub fn name(&self) -> Option<&str> {
        match self {
            Param::Named { name, .. } => Some(name),
            Param::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Param::Value(value) | Param::Named { value, .. } => value,
        }
    }
}

impl<T: Into<Value>> From<T> for Param {
    fn from(v: T) -> Self {
        Param::Value(v.into())
    }
}

pub(crate) fn flatten_params(params: Vec<Param>) -> Vec<Value> {
    params.into_iter().map(Param::into_value).collect()
}

/// Build a `Vec<Param>` from a list of bindable values.
///
/// ```
/// # use myq::params;
/// let params = params![42, "text", Option::<i64>::None];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Param>::new()
    };
    ($($value:expr),+ $(,)?) => {
        <[_]>::into_vec(::std::boxed::Box::new([$($crate::Param::from($value)),+]))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_params_flatten_in_positional_order() {
        let params = vec![
            Param::from(1i64),
            Param::named("b", "two"),
            Param::from(3.0f64),
        ];

        assert_eq!(
            flatten_params(params),
            vec![
                Value::Int(1),
                Value::Text("two".into()),
                Value::Double(3.0)
            ],
        );
    }

    #[test]
    fn option_binds_as_null() {
        assert_eq!(Value::from(Option::<i64>::None), Value::Null);
        assert_eq!(Value::from(Some(7i64)), Value::Int(7));
    }

    #[test]
    fn params_macro() {
        let params = params![1i64, "x"];
        assert_eq!(params.len(), 2);
        assert_eq!(params[1], Param::Value(Value::Text("x".into())));
        assert!(params!().is_empty());
    }
}
