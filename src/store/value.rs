//! value.rs
//! Dynamically typed payload carried by parameter and result slots.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// The atomic unit of data flowing through the graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Names the variant of a [`Value`]; the unit of a type constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    None,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::None => ValueType::None,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::None => "none",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::List => "list",
            ValueType::Map => "map",
        };
        f.write_str(name)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Str(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::Str(v) }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self { Value::List(v) }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self { Value::Map(v) }
}

/// The set of value types a slot accepts.
///
/// `Any` admits every value and is compatible with every other constraint.
/// `OneOf` enumerates acceptable types; two constraints are compatible when
/// their sets intersect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeConstraint {
    #[default]
    Any,
    OneOf(SmallVec<[ValueType; 2]>),
}

impl TypeConstraint {
    pub fn any() -> Self {
        TypeConstraint::Any
    }

    pub fn one_of(types: impl IntoIterator<Item = ValueType>) -> Self {
        let mut set: SmallVec<[ValueType; 2]> = types.into_iter().collect();
        set.sort();
        set.dedup();
        if set.is_empty() {
            TypeConstraint::Any
        } else {
            TypeConstraint::OneOf(set)
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TypeConstraint::Any)
    }

    pub fn admits(&self, value: &Value) -> bool {
        match self {
            TypeConstraint::Any => true,
            TypeConstraint::OneOf(types) => types.contains(&value.value_type()),
        }
    }

    pub fn compatible_with(&self, other: &TypeConstraint) -> bool {
        match (self, other) {
            (TypeConstraint::Any, _) | (_, TypeConstraint::Any) => true,
            (TypeConstraint::OneOf(a), TypeConstraint::OneOf(b)) => a.iter().any(|t| b.contains(t)),
        }
    }
}

impl From<ValueType> for TypeConstraint {
    fn from(t: ValueType) -> Self {
        TypeConstraint::one_of([t])
    }
}

impl<const N: usize> From<[ValueType; N]> for TypeConstraint {
    fn from(types: [ValueType; N]) -> Self {
        TypeConstraint::one_of(types)
    }
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeConstraint::Any => f.write_str("any"),
            TypeConstraint::OneOf(types) => {
                let names: Vec<String> = types.iter().map(|t| t.to_string()).collect();
                f.write_str(&names.join(" | "))
            }
        }
    }
}
