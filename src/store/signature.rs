//! signature.rs
//! Type descriptors: the immutable signature and callable behind every node.

use super::value::{TypeConstraint, Value, ValueType};
use crate::graph::GraphError;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The callable bound to a node type. Errors are reported as plain messages
/// and surface from evaluation as [`GraphError::Execution`].
pub type NodeFn = dyn Fn(&Args) -> Result<Value, String> + Send + Sync;

/// How a parameter's value is delivered to the callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrNamed,
    NamedOnly,
    /// Value is a `List` spread into the positional arguments.
    VariadicPositional,
    /// Value is a `Map` merged into the named arguments.
    VariadicNamed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub constraint: TypeConstraint,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::PositionalOrNamed,
            constraint: TypeConstraint::Any,
            default: None,
        }
    }

    pub fn kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn typed(mut self, constraint: impl Into<TypeConstraint>) -> Self {
        self.constraint = constraint.into();
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The literal a freshly created slot starts with.
    pub fn initial_value(&self) -> Value {
        match (&self.default, self.kind) {
            (Some(v), _) => v.clone(),
            (None, ParamKind::VariadicPositional) => Value::List(Vec::new()),
            (None, ParamKind::VariadicNamed) => Value::Map(BTreeMap::new()),
            (None, _) => Value::None,
        }
    }
}

/// Arguments assembled from a node's parameter slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub named: BTreeMap<String, Value>,
}

impl Args {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    pub fn at(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Fetches a named float argument, for callables with numeric signatures.
    pub fn float(&self, name: &str) -> Result<f64, String> {
        match self.named.get(name) {
            Some(Value::Float(f)) => Ok(*f),
            Some(other) => Err(format!("argument '{}' must be float, not {}", name, other.value_type())),
            None => Err(format!("missing argument '{}'", name)),
        }
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for v in &self.positional {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", v)?;
        }
        for (k, v) in &self.named {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Immutable metadata and behaviour shared by every node of one type.
pub struct TypeDescriptor {
    name: String,
    params: Vec<ParamSpec>,
    returns: TypeConstraint,
    func: Arc<NodeFn>,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

impl TypeDescriptor {
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            params: Vec::new(),
            returns: TypeConstraint::Any,
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn params(&self) -> &[ParamSpec] { &self.params }
    pub fn returns(&self) -> &TypeConstraint { &self.returns }
    pub fn func(&self) -> Arc<NodeFn> { Arc::clone(&self.func) }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    /// Distributes slot values into positional and named arguments by kind.
    /// `values` must be in parameter order. A variadic slot fed anything but
    /// a list (positional) or a map (named) is an error.
    pub fn assemble<'v>(&self, values: impl IntoIterator<Item = &'v Value>) -> Result<Args, String> {
        let mut args = Args::default();
        for (spec, value) in self.params.iter().zip(values) {
            match spec.kind {
                ParamKind::PositionalOnly => args.positional.push(value.clone()),
                ParamKind::PositionalOrNamed | ParamKind::NamedOnly => {
                    args.named.insert(spec.name.clone(), value.clone());
                }
                ParamKind::VariadicPositional => match value {
                    Value::List(items) => args.positional.extend(items.iter().cloned()),
                    other => {
                        return Err(format!("'*{}' must be a list, not {}", spec.name, other.value_type()))
                    }
                },
                ParamKind::VariadicNamed => match value {
                    Value::Map(entries) => {
                        args.named.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                    other => {
                        return Err(format!("'**{}' must be a map, not {}", spec.name, other.value_type()))
                    }
                },
            }
        }
        Ok(args)
    }
}

pub struct DescriptorBuilder {
    name: String,
    params: Vec<ParamSpec>,
    returns: TypeConstraint,
}

impl DescriptorBuilder {
    /// Adds a positional-or-named parameter without a default.
    pub fn param(mut self, name: impl Into<String>, constraint: impl Into<TypeConstraint>) -> Self {
        self.params.push(ParamSpec::new(name).typed(constraint));
        self
    }

    pub fn with_param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn returns(mut self, constraint: impl Into<TypeConstraint>) -> Self {
        self.returns = constraint.into();
        self
    }

    pub fn build<F>(self, func: F) -> Result<TypeDescriptor, GraphError>
    where
        F: Fn(&Args) -> Result<Value, String> + Send + Sync + 'static,
    {
        let invalid = |reason: String| GraphError::InvalidSignature { name: self.name.clone(), reason };

        let mut seen = HashSet::new();
        let mut variadic_positional = false;
        let mut variadic_named = false;
        let mut params = Vec::with_capacity(self.params.len());

        for mut spec in self.params.iter().cloned() {
            if !seen.insert(spec.name.clone()) {
                return Err(invalid(format!("duplicate parameter '{}'", spec.name)));
            }
            if spec.name == "result" {
                return Err(invalid("'result' is reserved for the result slot".to_string()));
            }
            match spec.kind {
                ParamKind::VariadicPositional => {
                    if std::mem::replace(&mut variadic_positional, true) {
                        return Err(invalid("more than one variadic positional parameter".to_string()));
                    }
                    spec.constraint = ValueType::List.into();
                }
                ParamKind::VariadicNamed => {
                    if std::mem::replace(&mut variadic_named, true) {
                        return Err(invalid("more than one variadic named parameter".to_string()));
                    }
                    spec.constraint = ValueType::Map.into();
                }
                _ => {}
            }
            if let Some(default) = &spec.default {
                if !spec.constraint.admits(default) {
                    return Err(invalid(format!(
                        "default of '{}' must be {}, not {}",
                        spec.name,
                        spec.constraint,
                        default.value_type()
                    )));
                }
            }
            params.push(spec);
        }

        Ok(TypeDescriptor {
            name: self.name,
            params,
            returns: self.returns,
            func: Arc::new(func),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[Value]) -> Vec<&Value> {
        items.iter().collect()
    }

    #[test]
    fn test_assemble_by_kind() {
        let desc = TypeDescriptor::builder("mixed")
            .with_param(ParamSpec::new("x").kind(ParamKind::PositionalOnly))
            .with_param(ParamSpec::new("rest").kind(ParamKind::VariadicPositional))
            .with_param(ParamSpec::new("y"))
            .with_param(ParamSpec::new("z").kind(ParamKind::NamedOnly))
            .with_param(ParamSpec::new("extra").kind(ParamKind::VariadicNamed))
            .build(|_| Ok(Value::None))
            .unwrap();

        let mut extra = BTreeMap::new();
        extra.insert("w".to_string(), Value::Int(9));
        let slots = vec![
            Value::Int(1),
            Value::List(vec![Value::Int(2), Value::Int(3)]),
            Value::Int(4),
            Value::Int(5),
            Value::Map(extra),
        ];

        let args = desc.assemble(values(&slots)).unwrap();
        assert_eq!(args.positional, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(args.get("y"), Some(&Value::Int(4)));
        assert_eq!(args.get("z"), Some(&Value::Int(5)));
        assert_eq!(args.get("w"), Some(&Value::Int(9)));
        assert_eq!(args.get("x"), None);
        assert_eq!(args.to_string(), "1, 2, 3, w=9, y=4, z=5");
    }

    #[test]
    fn test_assemble_rejects_non_collection_variadics() {
        let desc = TypeDescriptor::builder("spread")
            .with_param(ParamSpec::new("items").kind(ParamKind::VariadicPositional))
            .with_param(ParamSpec::new("options").kind(ParamKind::VariadicNamed))
            .build(|_| Ok(Value::None))
            .unwrap();

        let err = desc.assemble(values(&[Value::Float(7.0), Value::Map(BTreeMap::new())])).unwrap_err();
        assert_eq!(err, "'*items' must be a list, not float");

        let err = desc.assemble(values(&[Value::List(vec![]), Value::Int(1)])).unwrap_err();
        assert_eq!(err, "'**options' must be a map, not int");
    }

    #[test]
    fn test_variadic_slots_are_constrained() {
        let desc = TypeDescriptor::builder("v")
            .with_param(ParamSpec::new("items").kind(ParamKind::VariadicPositional))
            .build(|_| Ok(Value::None))
            .unwrap();
        assert_eq!(desc.params()[0].constraint, TypeConstraint::from(ValueType::List));
        assert_eq!(desc.params()[0].initial_value(), Value::List(vec![]));
    }

    #[test]
    fn test_invalid_signatures() {
        let dup = TypeDescriptor::builder("dup")
            .param("a", ValueType::Float)
            .param("a", ValueType::Float)
            .build(|_| Ok(Value::None));
        assert!(matches!(dup, Err(GraphError::InvalidSignature { .. })));

        let bad_default = TypeDescriptor::builder("bad")
            .with_param(ParamSpec::new("a").typed(ValueType::Float).default("text"))
            .build(|_| Ok(Value::None));
        assert!(matches!(bad_default, Err(GraphError::InvalidSignature { .. })));

        let two_varargs = TypeDescriptor::builder("two")
            .with_param(ParamSpec::new("a").kind(ParamKind::VariadicPositional))
            .with_param(ParamSpec::new("b").kind(ParamKind::VariadicPositional))
            .build(|_| Ok(Value::None));
        assert!(two_varargs.is_err());
    }

    #[test]
    fn test_float_accessor() {
        let mut args = Args::default();
        args.named.insert("a".into(), Value::Float(1.5));
        args.named.insert("b".into(), Value::Int(1));
        assert_eq!(args.float("a"), Ok(1.5));
        assert!(args.float("b").unwrap_err().contains("must be float"));
        assert!(args.float("c").unwrap_err().contains("missing"));
    }
}
