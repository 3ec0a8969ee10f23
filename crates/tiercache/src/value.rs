//! Stored value representation and conversion to requested shapes.
//!
//! Both tiers and the request scope hold [`CacheValue`]s. Callers ask for a
//! concrete type through [`Cacheable`]; the conversion is total: an absent value
//! yields `T::default()`, widening is allowed, lossy narrowing and incompatible
//! shapes fail with [`CacheError::Conversion`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Dynamic shape of a cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<CacheValue>),
    Json(serde_json::Value),
}

impl CacheValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::Null => "null",
            CacheValue::Bool(_) => "bool",
            CacheValue::Int(_) => "int",
            CacheValue::UInt(_) => "uint",
            CacheValue::Float(_) => "float",
            CacheValue::Text(_) => "text",
            CacheValue::List(_) => "list",
            CacheValue::Json(_) => "json",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CacheValue::Null | CacheValue::Json(serde_json::Value::Null))
    }

    /// Lossless projection into JSON, used for display and `Json<T>` decoding.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            CacheValue::Null => Value::Null,
            CacheValue::Bool(b) => Value::Bool(*b),
            CacheValue::Int(i) => Value::from(*i),
            CacheValue::UInt(u) => Value::from(*u),
            CacheValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CacheValue::Text(s) => Value::String(s.clone()),
            CacheValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            CacheValue::Json(v) => v.clone(),
        }
    }
}

/// Types that can be stored in and resolved from the cache.
pub trait Cacheable: Default + Sized {
    /// Name used in conversion errors.
    const SHAPE: &'static str;

    fn into_cache_value(self) -> CacheValue;

    fn from_cache_value(value: CacheValue) -> Result<Self>;
}

/// Convert a possibly-absent stored value into `T`.
///
/// Absent and null values become `T::default()`.
pub fn convert<T: Cacheable>(value: Option<CacheValue>) -> Result<T> {
    match value {
        None => Ok(T::default()),
        Some(v) if v.is_null() => Ok(T::default()),
        Some(v) => T::from_cache_value(v),
    }
}

fn mismatch<T: Cacheable>(found: &CacheValue) -> CacheError {
    CacheError::conversion(T::SHAPE, found.kind())
}

impl Cacheable for bool {
    const SHAPE: &'static str = "bool";

    fn into_cache_value(self) -> CacheValue {
        CacheValue::Bool(self)
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        match value {
            CacheValue::Bool(b) => Ok(b),
            CacheValue::Json(serde_json::Value::Bool(b)) => Ok(b),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

fn json_integer(value: &serde_json::Value) -> Option<CacheValue> {
    let n = value.as_number()?;
    if let Some(u) = n.as_u64() {
        Some(CacheValue::UInt(u))
    } else {
        n.as_i64().map(CacheValue::Int)
    }
}

macro_rules! signed_cacheable {
    ($($t:ty),*) => {$(
        impl Cacheable for $t {
            const SHAPE: &'static str = stringify!($t);

            fn into_cache_value(self) -> CacheValue {
                CacheValue::Int(self as i64)
            }

            fn from_cache_value(value: CacheValue) -> Result<Self> {
                let value = match value {
                    CacheValue::Json(json) => json_integer(&json).unwrap_or(CacheValue::Json(json)),
                    other => other,
                };
                match value {
                    CacheValue::Int(i) => <$t>::try_from(i).map_err(|_| mismatch::<Self>(&value)),
                    CacheValue::UInt(u) => <$t>::try_from(u).map_err(|_| mismatch::<Self>(&value)),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    )*};
}

macro_rules! unsigned_cacheable {
    ($($t:ty),*) => {$(
        impl Cacheable for $t {
            const SHAPE: &'static str = stringify!($t);

            fn into_cache_value(self) -> CacheValue {
                CacheValue::UInt(self as u64)
            }

            fn from_cache_value(value: CacheValue) -> Result<Self> {
                let value = match value {
                    CacheValue::Json(json) => json_integer(&json).unwrap_or(CacheValue::Json(json)),
                    other => other,
                };
                match value {
                    CacheValue::Int(i) => <$t>::try_from(i).map_err(|_| mismatch::<Self>(&value)),
                    CacheValue::UInt(u) => <$t>::try_from(u).map_err(|_| mismatch::<Self>(&value)),
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    )*};
}

signed_cacheable!(i8, i16, i32, i64);
unsigned_cacheable!(u8, u16, u32, u64);

/// Largest integer magnitude an f64 holds exactly.
const F64_EXACT_INT: u64 = 1 << 53;

impl Cacheable for f64 {
    const SHAPE: &'static str = "f64";

    fn into_cache_value(self) -> CacheValue {
        CacheValue::Float(self)
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        match value {
            CacheValue::Float(f) => Ok(f),
            CacheValue::Int(i) if i.unsigned_abs() <= F64_EXACT_INT => Ok(i as f64),
            CacheValue::UInt(u) if u <= F64_EXACT_INT => Ok(u as f64),
            CacheValue::Json(serde_json::Value::Number(n)) => {
                if let Some(u) = n.as_u64() {
                    Self::from_cache_value(CacheValue::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Self::from_cache_value(CacheValue::Int(i))
                } else {
                    n.as_f64()
                        .ok_or_else(|| CacheError::conversion(Self::SHAPE, "json"))
                }
            }
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Cacheable for f32 {
    const SHAPE: &'static str = "f32";

    fn into_cache_value(self) -> CacheValue {
        CacheValue::Float(self as f64)
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        let found = value.kind();
        let wide = f64::from_cache_value(value)?;
        let narrow = wide as f32;
        if (narrow as f64) == wide || wide.is_nan() {
            Ok(narrow)
        } else {
            Err(CacheError::conversion(Self::SHAPE, found))
        }
    }
}

impl Cacheable for String {
    const SHAPE: &'static str = "string";

    fn into_cache_value(self) -> CacheValue {
        CacheValue::Text(self)
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        match value {
            CacheValue::Text(s) => Ok(s),
            CacheValue::Json(serde_json::Value::String(s)) => Ok(s),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl<T: Cacheable> Cacheable for Option<T> {
    const SHAPE: &'static str = "option";

    fn into_cache_value(self) -> CacheValue {
        match self {
            Some(inner) => inner.into_cache_value(),
            None => CacheValue::Null,
        }
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_cache_value(value).map(Some)
        }
    }
}

impl<T: Cacheable> Cacheable for Vec<T> {
    const SHAPE: &'static str = "list";

    fn into_cache_value(self) -> CacheValue {
        CacheValue::List(self.into_iter().map(Cacheable::into_cache_value).collect())
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        match value {
            CacheValue::List(items) => items.into_iter().map(T::from_cache_value).collect(),
            CacheValue::Json(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(|item| T::from_cache_value(CacheValue::Json(item)))
                .collect(),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Cacheable for serde_json::Value {
    const SHAPE: &'static str = "json";

    fn into_cache_value(self) -> CacheValue {
        CacheValue::Json(self)
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        Ok(match value {
            CacheValue::Json(v) => v,
            other => other.to_json(),
        })
    }
}

impl Cacheable for CacheValue {
    const SHAPE: &'static str = "value";

    fn into_cache_value(self) -> CacheValue {
        self
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        Ok(value)
    }
}

impl Default for CacheValue {
    fn default() -> Self {
        CacheValue::Null
    }
}

/// Wrapper caching any serde type as JSON.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tiercache::{Cacheable, Json};
///
/// #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
/// struct Customer { name: String }
///
/// let value = Json(Customer { name: "alice".into() }).into_cache_value();
/// let back = Json::<Customer>::from_cache_value(value).unwrap();
/// assert_eq!(back.0.name, "alice");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Cacheable for Json<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    const SHAPE: &'static str = "json object";

    fn into_cache_value(self) -> CacheValue {
        match serde_json::to_value(&self.0) {
            Ok(v) => CacheValue::Json(v),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize value to JSON, caching null");
                CacheValue::Null
            }
        }
    }

    fn from_cache_value(value: CacheValue) -> Result<Self> {
        let found = value.kind();
        serde_json::from_value(value.to_json())
            .map(Json)
            .map_err(|_| CacheError::conversion(Self::SHAPE, found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_converts_to_default() {
        assert_eq!(convert::<i32>(None).unwrap(), 0);
        assert_eq!(convert::<String>(None).unwrap(), "");
        assert_eq!(convert::<Option<u8>>(Some(CacheValue::Null)).unwrap(), None);
        assert_eq!(convert::<bool>(Some(CacheValue::Json(json!(null)))).unwrap(), false);
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(i64::from_cache_value(CacheValue::Int(7)).unwrap(), 7);
        assert_eq!(i64::from_cache_value(CacheValue::UInt(7)).unwrap(), 7);
        assert_eq!(f64::from_cache_value(CacheValue::Int(-3)).unwrap(), -3.0);
        assert_eq!(u16::from_cache_value(CacheValue::Json(json!(512))).unwrap(), 512);
    }

    #[test]
    fn test_narrowing_fails_loudly() {
        let err = i8::from_cache_value(CacheValue::Int(300)).unwrap_err();
        assert!(matches!(err, CacheError::Conversion { expected: "i8", .. }));

        assert!(u32::from_cache_value(CacheValue::Int(-1)).is_err());
        assert!(f32::from_cache_value(CacheValue::Float(0.1)).is_err());
        assert_eq!(f32::from_cache_value(CacheValue::Float(0.5)).unwrap(), 0.5);
        assert!(f64::from_cache_value(CacheValue::UInt(u64::MAX)).is_err());
    }

    #[test]
    fn test_incompatible_shapes() {
        assert!(bool::from_cache_value(CacheValue::Int(1)).is_err());
        assert!(String::from_cache_value(CacheValue::Int(1)).is_err());
        assert!(i32::from_cache_value(CacheValue::Text("1".into())).is_err());
        assert!(i32::from_cache_value(CacheValue::Float(1.0)).is_err());
    }

    #[test]
    fn test_option_wrapping() {
        assert_eq!(
            Option::<i32>::from_cache_value(CacheValue::Int(5)).unwrap(),
            Some(5)
        );
        assert_eq!(Some(5i32).into_cache_value(), CacheValue::Int(5));
        assert_eq!(None::<i32>.into_cache_value(), CacheValue::Null);
    }

    #[test]
    fn test_lists() {
        let stored = vec!["a".to_string(), "b".to_string()].into_cache_value();
        assert_eq!(
            Vec::<String>::from_cache_value(stored).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            Vec::<u8>::from_cache_value(CacheValue::Json(json!([1, 2]))).unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_json_value_accepts_everything() {
        let v = serde_json::Value::from_cache_value(CacheValue::List(vec![
            CacheValue::Int(1),
            CacheValue::Text("x".into()),
        ]))
        .unwrap();
        assert_eq!(v, json!([1, "x"]));
    }

    #[test]
    fn test_json_wrapper() {
        #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
        struct Status {
            status: String,
        }

        let stored = CacheValue::Json(json!({"status": "ok"}));
        let Json(status) = Json::<Status>::from_cache_value(stored).unwrap();
        assert_eq!(status.status, "ok");

        assert!(Json::<Status>::from_cache_value(CacheValue::Int(1)).is_err());
    }
}
