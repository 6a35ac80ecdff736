//! Interface descriptors (spec.md §6 "Interface descriptor"): the
//! minimal, hand-written-trait shape an operation needs to be dispatched
//! and marshaled, standing in for a Slice-compiler-generated skeleton.

use std::sync::Arc;

use crate::encoding::Format;

/// Static description of one operation on an interface: enough for the
/// dispatch pipeline to route a request and for either side to pick a
/// sensible default tagged-member [`Format`] when a Slice-style interface
/// definition language isn't present (spec.md §6).
#[derive(Clone, Debug)]
pub struct OperationDescriptor {
    pub name: Arc<str>,
    pub is_idempotent: bool,
    /// Default format used for tagged return members when the operation's
    /// own definition doesn't request one explicitly (spec.md §4.1).
    pub default_format: Format,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            is_idempotent: false,
            default_format: Format::VSize,
        }
    }

    pub fn idempotent(mut self) -> Self {
        self.is_idempotent = true;
        self
    }

    pub fn with_default_format(mut self, format: Format) -> Self {
        self.default_format = format;
        self
    }
}

/// Static description of an interface: its most-derived type-id plus the
/// chain of base type-ids a `ice_isA` check or exception unwind may walk
/// (spec.md §6, §7).
#[derive(Clone, Debug)]
pub struct InterfaceDescriptor {
    pub type_id: Arc<str>,
    pub base_type_ids: Arc<[Arc<str>]>,
    pub operations: Arc<[OperationDescriptor]>,
}

impl InterfaceDescriptor {
    pub fn new(type_id: impl Into<Arc<str>>) -> Self {
        Self {
            type_id: type_id.into(),
            base_type_ids: Arc::from([]),
            operations: Arc::from([]),
        }
    }

    pub fn supports(&self, type_id: &str) -> bool {
        &*self.type_id == type_id || self.base_type_ids.iter().any(|id| &**id == type_id)
    }

    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| &*op.name == name)
    }
}
