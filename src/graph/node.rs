//! Defines the `Node`, its slots, and the handles used to address them.

use crate::store::{TypeConstraint, TypeDescriptor, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A unique, stable identifier for a node within its graph.
///
/// Ids are handed out in creation order and never reused, so ordering by id
/// is ordering by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses one parameter slot: the owning node and the parameter's position
/// in the node's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamRef {
    pub node: NodeId,
    pub index: u32,
}

/// Addresses the result slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultRef {
    pub node: NodeId,
}

impl ResultRef {
    pub fn of(node: NodeId) -> Self { Self { node } }
}

/// Either kind of slot, for APIs that accept slots addressed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    Param(ParamRef),
    Result(ResultRef),
}

impl SlotRef {
    pub fn node(&self) -> NodeId {
        match self {
            SlotRef::Param(p) => p.node,
            SlotRef::Result(r) => r.node,
        }
    }
}

impl From<ParamRef> for SlotRef {
    fn from(p: ParamRef) -> Self { SlotRef::Param(p) }
}

impl From<ResultRef> for SlotRef {
    fn from(r: ResultRef) -> Self { SlotRef::Result(r) }
}

/// A connection from a result slot to a parameter slot. Used whole as the key
/// of the graph's connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub source: ResultRef,
    pub dest: ParamRef,
}

impl Edge {
    pub fn new(source: ResultRef, dest: ParamRef) -> Self {
        Self { source, dest }
    }
}

/// An input slot. The literal is only read while `incoming` is unset.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSlot {
    pub(crate) literal: Value,
    pub(crate) incoming: Option<ResultRef>,
}

impl ParameterSlot {
    pub fn literal(&self) -> &Value { &self.literal }
    pub fn incoming(&self) -> Option<ResultRef> { self.incoming }
}

/// The output slot. `value` is empty until the first successful evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSlot {
    pub(crate) value: Option<Value>,
    pub(crate) outgoing: BTreeSet<ParamRef>,
}

impl ResultSlot {
    pub fn value(&self) -> Option<&Value> { self.value.as_ref() }
    pub fn outgoing(&self) -> &BTreeSet<ParamRef> { &self.outgoing }
}

/// A computation instance: one slot per declared parameter plus a result.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) descriptor: Arc<TypeDescriptor>,
    pub(crate) params: Vec<ParameterSlot>,
    pub(crate) result: ResultSlot,
}

impl Node {
    /// Instantiates the slots a descriptor declares, literals set to defaults.
    pub(crate) fn new(id: NodeId, name: String, descriptor: Arc<TypeDescriptor>) -> Self {
        let params = descriptor
            .params()
            .iter()
            .map(|spec| ParameterSlot { literal: spec.initial_value(), incoming: None })
            .collect();
        Self { id, name, descriptor, params, result: ResultSlot::default() }
    }

    pub fn id(&self) -> NodeId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn type_name(&self) -> &str { self.descriptor.name() }
    pub fn descriptor(&self) -> &Arc<TypeDescriptor> { &self.descriptor }
    pub fn params(&self) -> &[ParameterSlot] { &self.params }
    pub fn result(&self) -> &ResultSlot { &self.result }

    pub fn param_name(&self, index: u32) -> &str {
        &self.descriptor.params()[index as usize].name
    }

    pub fn param_constraint(&self, index: u32) -> &TypeConstraint {
        &self.descriptor.params()[index as usize].constraint
    }

    /// Display path of a parameter, e.g. `add1.a`.
    pub fn param_path(&self, index: u32) -> String {
        format!("{}.{}", self.name, self.param_name(index))
    }

    /// Display path of the result, e.g. `add1.result`.
    pub fn result_path(&self) -> String {
        format!("{}.result", self.name)
    }
}
