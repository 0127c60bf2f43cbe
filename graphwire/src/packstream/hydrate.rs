//! Dehydration/hydration hooks (§4.A): a seam that lets callers register custom
//! structure-tag handlers (temporal types, spatial points, graph entities) without the codec
//! itself knowing about them.
//!
//! The decode side is naturally dynamic (a tag arrives at runtime), so it is modeled as a
//! `HashMap<u8, HydrationFn>` the way the spec describes. The encode side is naturally static in
//! a typed language — a caller who wants `MyType -> Structure` just implements `ToValue` for
//! `MyType` — which gives the same "the codec need not be modified" property the dynamic Python
//! map gives, so no runtime `type -> transform` map is needed there; `DehydrationFn` is kept as a
//! named alias for the rare case a caller wants to plug in a dynamic dehydrator anyway (e.g. a
//! generic driver shim dispatching on a runtime type tag from a higher-level language binding).

use std::collections::HashMap;
use std::sync::Arc;

use super::{Structure, Value};
use crate::error::Result;

pub type HydrationFn = Arc<dyn Fn(Structure) -> Result<Value> + Send + Sync>;
pub type DehydrationFn = Arc<dyn Fn(&Value) -> Option<Structure> + Send + Sync>;

/// Maps a structure tag to a hydration transform. Looked up once per decoded `Structure`; an
/// unregistered tag simply stays a generic `Value::Structure`.
#[derive(Clone, Default)]
pub struct HydrationRegistry {
    hooks: HashMap<u8, HydrationFn>,
}

impl HydrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: u8, hook: HydrationFn) {
        self.hooks.insert(tag, hook);
    }

    /// Hydrates a decoded structure, falling back to the generic `Value::Structure` form when no
    /// hook is registered for its tag.
    pub fn hydrate(&self, structure: Structure) -> Result<Value> {
        match self.hooks.get(&structure.tag) {
            Some(hook) => hook(structure.clone()).or_else(|_| Ok(Value::Structure(structure))),
            None => Ok(Value::Structure(structure)),
        }
    }
}

/// Static dehydration: a Rust type that knows how to turn itself into a wire `Value`. Implemented
/// per domain type (node, relationship, path, temporal, spatial) in the `record` module.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}
