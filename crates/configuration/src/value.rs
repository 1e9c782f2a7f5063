//! Loosely-typed settings values
//!
//! Settings and metadata come from a loosely-typed document format, so they are
//! carried as a small sum type instead of boxed dynamic objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key used by older producers to mark a map that is really a sequence
const TREAT_AS_ARRAY: &str = "treatAsArray";

/// An ordered string-keyed map of values
pub type ValueMap = BTreeMap<String, Value>;

/// A settings value
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(ValueMap),
}

/// A scalar the value model cannot hold (floats, tagged nodes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedValue(pub String);

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::String(_) => "string",
            Self::List(_) => "sequence",
            Self::Map(_) => "map",
        }
    }

    /// Rewrite `treatAsArray` marker maps into lists, recursively.
    ///
    /// A marker map holds `treatAsArray: true` plus entries keyed `"0"`,
    /// `"1"`, ... Entries are ordered by their numeric key; non-numeric keys
    /// are dropped.
    pub fn normalize(self) -> Self {
        match self {
            Self::Map(map) => {
                if map.get(TREAT_AS_ARRAY) == Some(&Value::Bool(true)) {
                    let mut indexed: Vec<(usize, Value)> = map
                        .into_iter()
                        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v.normalize())))
                        .collect();
                    indexed.sort_by_key(|(i, _)| *i);
                    Self::List(indexed.into_iter().map(|(_, v)| v).collect())
                } else {
                    Self::Map(normalize_map(map))
                }
            }
            Self::List(items) => Self::List(items.into_iter().map(Value::normalize).collect()),
            other => other,
        }
    }
}

/// Normalize every value of a map
pub fn normalize_map(map: ValueMap) -> ValueMap {
    map.into_iter().map(|(k, v)| (k, v.normalize())).collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Map(map)
    }
}

impl TryFrom<serde_yaml::Value> for Value {
    type Error = UnsupportedValue;

    fn try_from(node: serde_yaml::Value) -> Result<Self, Self::Error> {
        use serde_yaml::Value as Yaml;

        match node {
            Yaml::Null => Ok(Self::Null),
            Yaml::Bool(b) => Ok(Self::Bool(b)),
            Yaml::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| UnsupportedValue(n.to_string())),
            Yaml::String(s) => Ok(Self::String(s)),
            Yaml::Sequence(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Yaml::Mapping(mapping) => {
                let mut map = ValueMap::new();
                for (k, v) in mapping {
                    let key = match k {
                        Yaml::String(s) => s,
                        Yaml::Bool(b) => b.to_string(),
                        Yaml::Number(n) => n.to_string(),
                        other => return Err(UnsupportedValue(format!("{other:?}"))),
                    };
                    map.insert(key, Value::try_from(v)?);
                }
                Ok(Self::Map(map))
            }
            Yaml::Tagged(tagged) => Err(UnsupportedValue(tagged.tag.to_string())),
        }
    }
}

impl From<&Value> for serde_yaml::Value {
    fn from(value: &Value) -> Self {
        use serde_yaml::Value as Yaml;

        match value {
            Value::Null => Yaml::Null,
            Value::Bool(b) => Yaml::Bool(*b),
            Value::Int(i) => Yaml::Number((*i).into()),
            Value::String(s) => Yaml::String(s.clone()),
            Value::List(items) => Yaml::Sequence(items.iter().map(Yaml::from).collect()),
            Value::Map(map) => Yaml::Mapping(
                map.iter()
                    .map(|(k, v)| (Yaml::String(k.clone()), Yaml::from(v)))
                    .collect(),
            ),
        }
    }
}
