//! Type-level building blocks: values, constraints, signatures and the registry.
pub mod registry;
pub mod signature;
pub mod value;

pub use registry::TypeRegistry;
pub use signature::{Args, DescriptorBuilder, NodeFn, ParamKind, ParamSpec, TypeDescriptor};
pub use value::{TypeConstraint, Value, ValueType};
