pub mod record;
pub mod value;

use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use record::filters_from_record;
pub use value::to_filter_value;

pub const CATEGORY_FILTER: &str = "category";

/// Closed set of values a filter can carry. Serializes as plain JSON;
/// NaN and infinite floats have no JSON form and fail to serialize.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<FilterValue>),
    Map(BTreeMap<String, FilterValue>),
}

impl Serialize for FilterValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FilterValue::Null => serializer.serialize_unit(),
            FilterValue::Bool(b) => serializer.serialize_bool(*b),
            FilterValue::Int(i) => serializer.serialize_i64(*i),
            FilterValue::UInt(u) => serializer.serialize_u64(*u),
            FilterValue::Float(f) if !f.is_finite() => {
                Err(S::Error::custom(format!("unsupported value: {}", f)))
            }
            FilterValue::Float(f) => serializer.serialize_f64(*f),
            FilterValue::Text(s) => serializer.serialize_str(s),
            FilterValue::List(items) => serializer.collect_seq(items),
            FilterValue::Map(map) => serializer.collect_map(map),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Int(v.into())
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<u64> for FilterValue {
    fn from(v: u64) -> Self {
        FilterValue::UInt(v)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Float(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Text(v)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(v: Vec<T>) -> Self {
        FilterValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

impl From<serde_json::Value> for FilterValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;

        match v {
            Value::Null => FilterValue::Null,
            Value::Bool(b) => FilterValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FilterValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    FilterValue::UInt(u)
                } else {
                    // as_f64 only fails for arbitrary precision numbers
                    FilterValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => FilterValue::Text(s),
            Value::Array(items) => FilterValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                FilterValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// A single query parameter sent to the public card endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: FilterValue,
    pub target: FilterValue,
}

impl Filter {
    /// Template tag name this filter binds to, when the target has the
    /// `["variable", ["template-tag", name]]` shape
    pub fn tag_name(&self) -> Option<&str> {
        match &self.target {
            FilterValue::List(outer) => match outer.as_slice() {
                [FilterValue::Text(variable), FilterValue::List(inner)]
                    if variable == "variable" =>
                {
                    match inner.as_slice() {
                        [FilterValue::Text(tag), FilterValue::Text(name)]
                            if tag == "template-tag" =>
                        {
                            Some(name.as_str())
                        }
                        _ => None,
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }
}

/// Build a category filter bound to the template tag `tag_name`
pub fn new_category_filter(tag_name: &str, value: impl Into<FilterValue>) -> Filter {
    Filter {
        kind: CATEGORY_FILTER.to_string(),
        value: value.into(),
        target: FilterValue::List(vec![
            FilterValue::from("variable"),
            FilterValue::List(vec![
                FilterValue::from("template-tag"),
                FilterValue::from(tag_name),
            ]),
        ]),
    }
}
