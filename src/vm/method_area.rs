use crate::vm::classes::{ArrayClass, RuntimeClass, OBJECT_CLASS};
use crate::vm::constant_pool::RuntimeConstantPool;
use crate::vm::error::VmError;
use crate::vm::memory::ObjectRef;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registries of everything loaded into one VM. Each registry is guarded by
/// its own lock and only ever grows through insert-if-absent.
#[derive(Default)]
pub struct MethodArea {
    classes: RwLock<HashMap<String, Arc<RuntimeClass>>>,
    array_classes: RwLock<HashMap<String, Arc<ArrayClass>>>,
    constant_pools: RwLock<HashMap<String, Arc<RuntimeConstantPool>>>,
    primitive_mirrors: RwLock<HashMap<String, ObjectRef>>,
}

impl MethodArea {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns true when this call inserted the class; the caller then owns
    /// its one-time initialization.
    pub fn register_class(&self, class: Arc<RuntimeClass>) -> bool {
        let mut classes = self.classes.write();
        if classes.contains_key(&class.name) {
            return false;
        }
        debug!("Register class {}", class.name);
        classes.insert(class.name.clone(), class);
        true
    }

    pub fn lookup_class(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.read().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// Array classes are synthesized on first lookup; only the root class
    /// must already be loaded.
    pub fn lookup_array_class(&self, name: &str) -> Result<Arc<ArrayClass>, VmError> {
        if let Some(array) = self.array_classes.read().get(name) {
            return Ok(Arc::clone(array));
        }
        let root = self.lookup_class(OBJECT_CLASS).ok_or_else(|| {
            VmError::illegal(format!("{} must be loaded before {}", OBJECT_CLASS, name))
        })?;
        let synthesized = Arc::new(ArrayClass::synthesize(name, root)?);
        let mut arrays = self.array_classes.write();
        let array = arrays
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Synthesize array class {}", name);
                synthesized
            })
            .clone();
        Ok(array)
    }

    pub fn register_constant_pool(&self, pool: Arc<RuntimeConstantPool>) -> bool {
        let mut pools = self.constant_pools.write();
        if pools.contains_key(pool.class_name()) {
            return false;
        }
        pools.insert(pool.class_name().to_string(), pool);
        true
    }

    pub fn lookup_constant_pool(&self, class_name: &str) -> Option<Arc<RuntimeConstantPool>> {
        self.constant_pools.read().get(class_name).cloned()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.read().keys().cloned().collect()
    }

    pub(crate) fn primitive_mirror<F>(&self, name: &str, create: F) -> Result<ObjectRef, VmError>
    where
        F: FnOnce() -> Result<ObjectRef, VmError>,
    {
        if let Some(mirror) = self.primitive_mirrors.read().get(name) {
            return Ok(Arc::clone(mirror));
        }
        let created = create()?;
        Ok(self
            .primitive_mirrors
            .write()
            .entry(name.to_string())
            .or_insert(created)
            .clone())
    }

    pub fn is_primitive_mirror(&self, object: &ObjectRef) -> bool {
        self.primitive_mirrors
            .read()
            .values()
            .any(|m| Arc::ptr_eq(m, object))
    }
}
