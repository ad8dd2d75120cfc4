use crate::vm::class_path::ClassPath;
use crate::vm::classes::{
    ArrayClass, ClassState, RuntimeClass, Type, AccessFlags, CLASS_CLASS, OBJECT_CLASS,
    STATIC_INITIALIZER,
};
use crate::vm::classfile::{ClassDescriptor, Constant};
use crate::vm::constant_pool::RuntimeConstantPool;
use crate::vm::error::VmError;
use crate::vm::interpreter::Interpreter;
use crate::vm::memory::Value;
use crate::vm::vm::Vm;
use log::{debug, trace};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub enum LoadedClass {
    Class(Arc<RuntimeClass>),
    Array(Arc<ArrayClass>),
}

#[derive(Default)]
struct LoaderState {
    loading: HashSet<String>,
    descriptors: HashMap<String, Arc<ClassDescriptor>>,
}

/// Turns class names into registered, initialized classes.
///
/// Loading runs under one reentrant lock: the loading thread may re-enter
/// (a static initializer touching its own class sees it linked but not yet
/// initialized) while other threads wait until initialization finishes.
pub struct ClassLoader {
    class_path: Box<dyn ClassPath>,
    state: ReentrantMutex<RefCell<LoaderState>>,
}

impl ClassLoader {
    pub fn new(class_path: Box<dyn ClassPath>) -> Self {
        ClassLoader {
            class_path,
            state: ReentrantMutex::new(RefCell::new(LoaderState::default())),
        }
    }

    pub fn load(&self, vm: &Vm, name: &str) -> Result<LoadedClass, VmError> {
        if name.starts_with('[') {
            return Ok(LoadedClass::Array(vm.method_area().lookup_array_class(name)?));
        }
        if let Some(class) = vm.method_area().lookup_class(name) {
            if class.state() == ClassState::Initialized {
                return Ok(LoadedClass::Class(class));
            }
        }

        let guard = self.state.lock();
        if let Some(class) = vm.method_area().lookup_class(name) {
            return match class.state() {
                ClassState::Erroneous => Err(VmError::illegal(format!(
                    "initialization of {} failed earlier",
                    name
                ))),
                _ => Ok(LoadedClass::Class(class)),
            };
        }
        if !guard.borrow_mut().loading.insert(name.to_string()) {
            return Err(VmError::malformed(format!("class circularity at {}", name)));
        }
        let result = self.define(vm, name);
        guard.borrow_mut().loading.remove(name);
        result.map(LoadedClass::Class)
    }

    /// Parsed descriptor for `name`, read from the classpath once.
    fn descriptor(&self, name: &str) -> Result<Arc<ClassDescriptor>, VmError> {
        let guard = self.state.lock();
        if let Some(descriptor) = guard.borrow().descriptors.get(name) {
            return Ok(Arc::clone(descriptor));
        }
        let bytes = self.class_path.find_class(name)?;
        let descriptor = Arc::new(ClassDescriptor::parse(&bytes)?);
        if descriptor.name != name {
            return Err(VmError::malformed(format!(
                "{} declares itself as {}",
                name, descriptor.name
            )));
        }
        guard
            .borrow_mut()
            .descriptors
            .insert(name.to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    fn define(&self, vm: &Vm, name: &str) -> Result<Arc<RuntimeClass>, VmError> {
        debug!("Loading class {}", name);
        let descriptor = self.descriptor(name)?;

        let parent = match &descriptor.super_name {
            Some(super_name) if name != OBJECT_CLASS => Some(vm.load_class(super_name)?),
            None if name == OBJECT_CLASS => None,
            _ => {
                return Err(VmError::malformed(format!(
                    "{} has a bad superclass {:?}",
                    name, descriptor.super_name
                )))
            }
        };
        if let Some(parent) = &parent {
            if parent.is_interface() {
                return Err(VmError::illegal(format!(
                    "{} extends interface {}",
                    name, parent.name
                )));
            }
        }
        let mut interfaces = Vec::with_capacity(descriptor.interfaces.len());
        for interface_name in &descriptor.interfaces {
            let interface = vm.load_class(interface_name)?;
            if !interface.is_interface() {
                return Err(VmError::illegal(format!(
                    "{} implements class {}",
                    name, interface.name
                )));
            }
            interfaces.push(interface);
        }

        let class = RuntimeClass::link(Arc::clone(&descriptor), parent, interfaces)?;
        vm.method_area()
            .register_constant_pool(Arc::new(RuntimeConstantPool::new(descriptor)));
        if !vm.method_area().register_class(Arc::clone(&class)) {
            return vm
                .method_area()
                .lookup_class(name)
                .ok_or_else(|| VmError::illegal(format!("{} vanished after registration", name)));
        }

        if vm.method_area().is_registered(CLASS_CLASS) {
            vm.mirror_of_class(&class)?;
        }
        match self.initialize(vm, &class) {
            Ok(()) => {
                class.set_state(ClassState::Initialized);
                debug!("Initialized {}", name);
                Ok(class)
            }
            Err(err) => {
                class.set_state(ClassState::Erroneous);
                Err(err)
            }
        }
    }

    fn initialize(&self, vm: &Vm, class: &Arc<RuntimeClass>) -> Result<(), VmError> {
        let pool = vm
            .method_area()
            .lookup_constant_pool(&class.name)
            .ok_or_else(|| VmError::illegal(format!("no constant pool for {}", class.name)))?;

        for field in &class.static_fields {
            let index = match field.constant_value {
                Some(index) if field.flags.contains(AccessFlags::FINAL) => index,
                _ => continue,
            };
            let value = match (pool.constant(index)?, field.value_type) {
                (Constant::Integer(i), Type::Int)
                | (Constant::Integer(i), Type::Short)
                | (Constant::Integer(i), Type::Char)
                | (Constant::Integer(i), Type::Byte)
                | (Constant::Integer(i), Type::Boolean) => Value::Int(*i),
                (Constant::Long(l), Type::Long) => Value::Long(*l),
                (Constant::Float(f), Type::Float) => Value::Float(*f),
                (Constant::Double(d), Type::Double) => Value::Double(*d),
                (Constant::String(utf8), Type::Reference) => {
                    Value::Ref(Some(vm.new_string(pool.utf8(*utf8)?)?))
                }
                (constant, _) => {
                    return Err(VmError::malformed(format!(
                        "constant {:?} does not fit field {}.{}:{}",
                        constant, class.name, field.name, field.descriptor
                    )))
                }
            };
            trace!("Constant {}.{} = {:?}", class.name, field.name, value);
            field.set(value);
        }

        if let Some(initializer) = class.declared_method(STATIC_INITIALIZER, "()V") {
            debug!("Run {}", initializer);
            Interpreter::new(vm).invoke(initializer, &[])?;
        }
        Ok(())
    }
}
