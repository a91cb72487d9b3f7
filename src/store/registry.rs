//! registry.rs
//! Name-keyed store of type descriptors. Graphs hold it behind an `Arc`.

use super::signature::TypeDescriptor;
use crate::graph::GraphError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn count(&self) -> usize { self.types.len() }

    /// Registers a descriptor under its name. Names are never overwritten.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<Arc<TypeDescriptor>, GraphError> {
        if self.types.contains_key(descriptor.name()) {
            return Err(GraphError::DuplicateName { name: descriptor.name().to_string() });
        }
        let descriptor = Arc::new(descriptor);
        self.types.insert(descriptor.name().to_string(), Arc::clone(&descriptor));
        tracing::debug!(node_type = descriptor.name(), "registered node type");
        Ok(descriptor)
    }

    /// Removes a type. Nodes already created keep their descriptor handle.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<TypeDescriptor>, GraphError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownType { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
