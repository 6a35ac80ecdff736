//! Class-instance graph codec (spec.md §4.1 "Class instance graph", §9
//! design note on arena-indexed handles) and user-exception slicing
//! (spec.md §4.1 "User exception").
//!
//! Both class instances and user exceptions are marshaled as a chain of
//! *slices*, most-derived first, each framed with its own type-id and an
//! `FSize`-style 4-byte length prefix (spec.md §4.1 per-slice
//! `has-slice-size`) so that a receiver without a factory for the
//! most-derived (or any) type can still skip the payload and fall back to
//! a known base type, or to an entirely opaque placeholder (spec.md §4.1,
//! §7). Critically, that length prefix frames the bytes without requiring
//! them to be decoded from a detached buffer: a slice whose type-id *is*
//! known is decoded directly off the live [`InputStream`] via
//! [`InputStream::read_fsize_scoped`], so a class reference nested inside
//! one of its members shares the enclosing stream's instance arena and
//! depth counter exactly as a top-level sibling would (spec.md §9: "the
//! arena is scoped to the InputStream"). Only a slice whose type-id has no
//! registered factory is captured as an opaque byte blob, since nothing in
//! this process understands its internal structure well enough to resolve
//! a class reference inside it anyway.
//!
//! Class instances additionally support cycles and diamond sharing: the
//! wire format assigns each first-seen instance a small integer id, and
//! later references to the same `Arc` rewrite as a back-reference to that
//! id (see [`OutputStream::write_class_ref`]). Decoding a cyclic graph
//! requires a slot to exist *before* the instance it will hold is fully
//! decoded (the classic tree-adjacent cycle: A references B which
//! references A). [`InstanceArena`] reserves a `OnceLock` slot per id up
//! front so a nested back-reference encountered while decoding that very
//! instance's own slices can clone the handle and resolve it once the
//! outer decode finishes. [`InputStream::enter_class_graph`] additionally
//! rejects recursion past `class_graph_depth_max` (spec.md §4.1 "Class
//! graph depth limit") before any further allocation happens; a
//! back-reference never recurses, so only genuinely nested (not merely
//! shared or cyclic) instances count against the limit.
//!
//! User exceptions never cycle and are always keyed by their type-id
//! string rather than a compact class id, so [`decode_user_error`] reuses
//! the same FSize-framed slice-chain shape without the arena or
//! back-reference marker, walking down the chain until it finds a slice
//! whose type-id has a registered [`crate::error::UserErrorFactory`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::encoding::stream::{InputStream, OutputStream};
use crate::error::{LocalError, MarshalError, OpaqueUserError, UserError, UserErrorRegistry};

/// A decodable/encodable class instance (spec.md §4.1 "Class instance
/// graph"). Mirrors [`crate::error::UserError`] but for values rather than
/// exceptions, and supports `Any` downcasting so dispatch code can recover
/// a concrete type after passing through the opaque wire representation.
pub trait ClassValue: fmt::Debug + Send + Sync + Any + 'static {
    /// Most-derived Slice type-id, e.g. `"::Demo::Widget"`.
    fn type_id(&self) -> &str;

    /// Encode the full slice chain (most-derived first) into `os`. Each
    /// slice is `type-id string | FSize-framed body | has-more bool`,
    /// mirroring what [`decode_instance`] expects: `os.write_string(type_id)`,
    /// then `os.write_fsize_scoped(|os| ...)` around that slice's own
    /// members, then `os.write_bool(...)` for whether a base slice follows.
    /// This workspace's declared types carry exactly one slice, so
    /// `has-more` is always `false` for them; see [`OpaqueClassValue`] for
    /// an implementation that preserves a longer chain byte-for-byte.
    fn encode_slices(&self, os: &mut OutputStream);

    fn as_any(&self) -> &dyn Any;
}

/// Fallback representation for a class instance whose most-derived type-id
/// has no registered factory: the slices are kept as opaque bytes so the
/// instance can still be stored, forwarded and re-marshaled unchanged
/// (spec.md §4.1, §7: unknown types are preserved, not dropped).
#[derive(Clone, Debug)]
pub struct OpaqueClassValue {
    pub type_id: Arc<str>,
    pub slices: Arc<[SliceBytes]>,
}

/// One decoded-but-not-understood slice: its type-id and raw framed body,
/// kept around so an opaque instance can be re-encoded byte-for-byte.
#[derive(Clone, Debug)]
pub struct SliceBytes {
    pub type_id: Arc<str>,
    pub body: Arc<[u8]>,
}

impl ClassValue for OpaqueClassValue {
    fn type_id(&self) -> &str {
        &self.type_id
    }

    fn encode_slices(&self, os: &mut OutputStream) {
        let last = self.slices.len().saturating_sub(1);
        for (i, slice) in self.slices.iter().enumerate() {
            os.write_string(&slice.type_id);
            let body = slice.body.clone();
            os.write_fsize_scoped(move |os| os.write_raw(&body));
            os.write_bool(i < last);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A factory that reconstructs a concrete [`ClassValue`] from the live
/// stream, keyed by the instance's most-derived type-id. `decode_body` is
/// handed `is` already positioned at the first member of this type's own
/// (single) slice, framed by the caller via [`InputStream::read_fsize_scoped`]
/// so nested class references share `is`'s arena (spec.md §9). This
/// workspace's declared types each carry exactly one slice — schema
/// evolution across a multi-slice inheritance chain is out of scope per
/// spec.md §1 Non-goals — so `decode_instance` rejects a registered type
/// whose wire data claims a further (base) slice follows.
pub trait ClassFactory: Send + Sync {
    fn type_id(&self) -> &str;
    fn decode_body(&self, is: &mut InputStream) -> Result<Arc<dyn ClassValue>, LocalError>;
}

/// Registry of known factories, consulted once per freshly-decoded
/// instance. A type-id with no registered factory decodes to an
/// [`OpaqueClassValue`] rather than failing the whole graph (spec.md §4.1:
/// an unrecognized most-derived type does not prevent the rest of the
/// graph from decoding).
#[derive(Default)]
pub struct ClassFactoryRegistry {
    factories: HashMap<String, Arc<dyn ClassFactory>>,
}

impl ClassFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ClassFactory>) {
        self.factories.insert(factory.type_id().to_string(), factory);
    }

    pub fn get(&self, type_id: &str) -> Option<&Arc<dyn ClassFactory>> {
        self.factories.get(type_id)
    }
}

/// Slots for in-progress and completed class-instance decodes, keyed by
/// the wire-assigned instance id. A slot is reserved (as an empty
/// `OnceLock`) before its instance starts decoding, so a cyclic reference
/// encountered while decoding that very instance's slices can clone the
/// `Arc<OnceLock<_>>` handle and defer resolution until the outer decode
/// finishes and fills it in.
#[derive(Default)]
pub struct InstanceArena {
    slots: HashMap<i32, Arc<OnceLock<Arc<dyn ClassValue>>>>,
    next_id: i32,
}

impl InstanceArena {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn get(&self, id: i32) -> Option<Arc<dyn ClassValue>> {
        self.slots.get(&id).and_then(|slot| slot.get().cloned())
    }

    fn reserve_next(&mut self) -> (i32, Arc<OnceLock<Arc<dyn ClassValue>>>) {
        let id = self.next_id;
        self.next_id += 1;
        let slot = self.slots.entry(id).or_insert_with(|| Arc::new(OnceLock::new())).clone();
        (id, slot)
    }
}

/// Decodes the slice chain for a freshly-seen (not back-referenced)
/// instance: reserves its arena slot first so a self-referential cycle
/// inside its own slices resolves correctly, then either decodes the
/// first slice directly (if its type-id has a registered factory) or
/// falls back to capturing the whole chain as opaque bytes (spec.md §4.1,
/// §7). Guarded by [`InputStream::enter_class_graph`] so a hostile peer's
/// deeply nested graph is rejected rather than blowing the stack or
/// allocating without bound (spec.md §4.1 "Class graph depth limit", §8).
pub(crate) fn decode_instance(input: &mut InputStream) -> Result<Option<Arc<dyn ClassValue>>, LocalError> {
    input.enter_class_graph()?;
    let result = decode_instance_body(input);
    input.exit_class_graph();
    result
}

fn decode_instance_body(input: &mut InputStream) -> Result<Option<Arc<dyn ClassValue>>, LocalError> {
    let (_id, slot) = input.arena_mut().reserve_next();

    let type_id = input.read_string()?;
    let factories = input.class_factories().clone();

    let instance: Arc<dyn ClassValue> = if let Some(factory) = factories.get(&type_id).cloned() {
        let value = input.read_fsize_scoped(|is| factory.decode_body(is))?;
        let has_more = input.read_bool()?;
        if has_more {
            return Err(LocalError::Marshal(MarshalError::Other(format!(
                "class `{type_id}` factory does not support multi-slice inheritance chains"
            ))));
        }
        value
    } else {
        let mut slices = Vec::new();
        let mut current_type_id: Arc<str> = Arc::from(type_id.as_str());
        loop {
            let body = input.read_fsize_region()?;
            let has_more = input.read_bool()?;
            slices.push(SliceBytes {
                type_id: current_type_id.clone(),
                body: Arc::from(body.to_vec().into_boxed_slice()),
            });
            if !has_more {
                break;
            }
            current_type_id = Arc::from(input.read_string()?.as_str());
        }
        Arc::new(OpaqueClassValue {
            type_id: slices[0].type_id.clone(),
            slices: Arc::from(slices.into_boxed_slice()),
        })
    };

    let _ = slot.set(instance.clone());
    Ok(Some(instance))
}

/// Encodes a declared user exception (spec.md §4.1 "User exception"):
/// always keyed by type-id string, never cyclic, so no arena or
/// back-reference marker is needed, but still `FSize`-framed like a class
/// slice so a receiver without a factory for the type can skip it.
pub fn encode_user_error(os: &mut OutputStream, error: &dyn UserError) {
    os.write_string(error.type_id());
    os.write_fsize_scoped(|os| error.encode_body(os));
    os.write_bool(false);
}

/// Outcome of decoding a user exception's slice chain: either a concrete
/// type the caller's registry knew how to reconstruct, or an opaque
/// placeholder carrying just the type-id, matching spec.md §4.1/§7
/// ("readers with no factory for the thrown type unwind through base
/// slices and throw the closest known base; if none are known, they
/// surface a synthetic 'unknown user exception'").
pub enum DecodedUserError {
    Known(Arc<dyn UserError>),
    Unknown(OpaqueUserError),
}

/// Decodes a user exception's slice chain against `registry`, walking
/// down from the most-derived slice until one's type-id matches a known
/// factory (spec.md §4.1, §7). A matched slice is decoded directly off
/// `input` via [`InputStream::read_fsize_scoped`] — sharing `input`'s
/// arena exactly like a class instance's known slice — so any class
/// reference nested in the exception's own members round-trips
/// correctly; any further (more-base) slices beyond the matched one are
/// simply skipped, since the caller only needs the closest known type.
pub fn decode_user_error(
    input: &mut InputStream,
    registry: &UserErrorRegistry,
) -> Result<DecodedUserError, LocalError> {
    let mut most_derived_type_id: Option<Arc<str>> = None;
    loop {
        let type_id = input.read_string()?;
        if most_derived_type_id.is_none() {
            most_derived_type_id = Some(Arc::from(type_id.as_str()));
        }

        if let Some(factory) = registry.get(&type_id).cloned() {
            let value = input.read_fsize_scoped(|is| factory.decode_body(is))?;
            let mut has_more = input.read_bool()?;
            while has_more {
                input.read_string()?;
                input.read_fsize_region()?;
                has_more = input.read_bool()?;
            }
            return Ok(DecodedUserError::Known(value));
        }

        let body = input.read_fsize_region()?;
        let has_more = input.read_bool()?;
        if !has_more {
            return Ok(DecodedUserError::Unknown(OpaqueUserError {
                type_id: most_derived_type_id.expect("set on first iteration"),
                known_slices: Arc::from(body.to_vec().into_boxed_slice()),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::format::ENCODING_VERSION;

    #[derive(Debug)]
    struct NodeValue {
        label: String,
        next: std::sync::RwLock<Option<Arc<dyn ClassValue>>>,
    }

    impl ClassValue for NodeValue {
        fn type_id(&self) -> &str {
            "::Test::Node"
        }

        fn encode_slices(&self, os: &mut OutputStream) {
            os.write_string(self.type_id());
            os.write_fsize_scoped(|os| {
                os.write_string(&self.label);
                os.write_class_ref(self.next.read().unwrap().as_ref());
            });
            os.write_bool(false);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct NodeFactory;

    impl ClassFactory for NodeFactory {
        fn type_id(&self) -> &str {
            "::Test::Node"
        }

        fn decode_body(&self, is: &mut InputStream) -> Result<Arc<dyn ClassValue>, LocalError> {
            let label = is.read_string()?;
            let next = is.read_class_ref()?;
            Ok(Arc::new(NodeValue {
                label,
                next: std::sync::RwLock::new(next),
            }))
        }
    }

    fn node(label: &str) -> Arc<NodeValue> {
        Arc::new(NodeValue {
            label: label.to_string(),
            next: std::sync::RwLock::new(None),
        })
    }

    fn registry() -> Arc<ClassFactoryRegistry> {
        let mut registry = ClassFactoryRegistry::new();
        registry.register(Arc::new(NodeFactory));
        Arc::new(registry)
    }

    #[test]
    fn a_two_node_cycle_decodes_to_an_isomorphic_shared_graph() {
        let a = node("a");
        let b = node("b");
        *a.next.write().unwrap() = Some(b.clone() as Arc<dyn ClassValue>);
        *b.next.write().unwrap() = Some(a.clone() as Arc<dyn ClassValue>);

        let mut os = OutputStream::with_default_encoding();
        os.write_class_ref(Some(&(a.clone() as Arc<dyn ClassValue>)));
        let bytes = os.into_bytes();

        let mut is = InputStream::new(bytes, ENCODING_VERSION, 1 << 20, registry());
        let decoded_a = is.read_class_ref().unwrap().unwrap();
        let decoded_a_node = decoded_a.as_any().downcast_ref::<NodeValue>().unwrap();
        assert_eq!(decoded_a_node.label, "a");

        let decoded_b = decoded_a_node.next.read().unwrap().clone().unwrap();
        let decoded_b_node = decoded_b.as_any().downcast_ref::<NodeValue>().unwrap();
        assert_eq!(decoded_b_node.label, "b");

        let back_to_a = decoded_b_node.next.read().unwrap().clone().unwrap();
        assert!(Arc::ptr_eq(&back_to_a, &decoded_a));
    }

    #[test]
    fn a_chain_deeper_than_the_limit_is_rejected() {
        let mut os = OutputStream::with_default_encoding();
        let mut innermost = node("leaf");
        for i in 0..200 {
            let current = node(&format!("n{i}"));
            *current.next.write().unwrap() = Some(innermost.clone() as Arc<dyn ClassValue>);
            innermost = current;
        }
        os.write_class_ref(Some(&(innermost as Arc<dyn ClassValue>)));
        let bytes = os.into_bytes();

        let mut is = InputStream::new(bytes, ENCODING_VERSION, 1 << 20, registry());
        let err = is.read_class_ref().unwrap_err();
        assert!(matches!(
            err,
            LocalError::Marshal(MarshalError::ClassGraphTooDeep { .. })
        ));
    }

    #[test]
    fn an_unknown_type_id_falls_back_to_an_opaque_value() {
        let mut os = OutputStream::with_default_encoding();
        os.write_size(1);
        os.write_string("::Test::Mystery");
        os.write_fsize_scoped(|os| os.write_string("payload"));
        os.write_bool(false);
        let bytes = os.into_bytes();

        let mut is = InputStream::new(bytes, ENCODING_VERSION, 1 << 20, registry());
        let decoded = is.read_class_ref().unwrap().unwrap();
        let opaque = decoded.as_any().downcast_ref::<OpaqueClassValue>().unwrap();
        assert_eq!(&*opaque.type_id, "::Test::Mystery");
        assert_eq!(opaque.slices.len(), 1);
    }
}
