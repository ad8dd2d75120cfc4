use crate::vm::class_loader::{ClassLoader, LoadedClass};
use crate::vm::class_path::{ClassPath, SearchPath};
use crate::vm::classes::{
    ArrayClass, RuntimeClass, CLASS_CLASS, OBJECT_CLASS, STRING_CLASS,
};
use crate::vm::error::VmError;
use crate::vm::interpreter::Interpreter;
use crate::vm::java_lang::{self, NativeBridge, NativeMethod};
use crate::vm::memory::{ArrayStore, Object, ObjectRef, Value};
use crate::vm::method_area::MethodArea;
use log::{debug, info};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

pub const MAIN_METHOD: &str = "main";
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

pub const PRIMITIVE_TYPES: [&str; 9] = [
    "void", "boolean", "byte", "char", "short", "int", "long", "float", "double",
];

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub class_path: Vec<PathBuf>,
    pub main_class: String,
    pub args: Vec<String>,
    pub max_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            class_path: vec![PathBuf::from(".")],
            main_class: String::new(),
            args: Vec::new(),
            max_stack_depth: 1024,
        }
    }
}

/// One independent virtual machine: its registries, loader, native table
/// and output stream. Threads share it by reference; each interpreter run
/// owns its own java stack.
pub struct Vm {
    config: VmConfig,
    method_area: MethodArea,
    class_loader: ClassLoader,
    natives: NativeBridge,
    out: Mutex<Box<dyn Write + Send>>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let class_path = SearchPath::new(config.class_path.clone());
        Self::with_class_path(config, Box::new(class_path))
    }

    pub fn with_class_path(config: VmConfig, class_path: Box<dyn ClassPath>) -> Self {
        Vm {
            config,
            method_area: MethodArea::new(),
            class_loader: ClassLoader::new(class_path),
            natives: NativeBridge::new(),
            out: Mutex::new(Box::new(io::stdout())),
        }
    }

    /// Redirects what the print hook writes.
    pub fn with_output(self, out: Box<dyn Write + Send>) -> Self {
        Vm {
            out: Mutex::new(out),
            ..self
        }
    }

    pub fn register_native(&mut self, class_name: &str, method_name: &str, native: NativeMethod) {
        self.natives.register(class_name, method_name, native);
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn method_area(&self) -> &MethodArea {
        &self.method_area
    }

    pub fn natives(&self) -> &NativeBridge {
        &self.natives
    }

    pub fn load(&self, name: &str) -> Result<LoadedClass, VmError> {
        self.class_loader.load(self, name)
    }

    pub fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>, VmError> {
        match self.load(name)? {
            LoadedClass::Class(class) => Ok(class),
            LoadedClass::Array(array) => Err(VmError::illegal(format!(
                "{} is an array type",
                array.name
            ))),
        }
    }

    pub fn array_class(&self, name: &str) -> Result<Arc<ArrayClass>, VmError> {
        match self.load(name)? {
            LoadedClass::Array(array) => Ok(array),
            LoadedClass::Class(class) => Err(VmError::illegal(format!(
                "{} is not an array type",
                class.name
            ))),
        }
    }

    /// Loads the core classes the classpath provides and gives every loaded
    /// class its mirror once `java/lang/Class` is available.
    pub fn bootstrap(&self) -> Result<(), VmError> {
        self.load_class(OBJECT_CLASS)?;
        for optional in [STRING_CLASS, CLASS_CLASS] {
            match self.load_class(optional) {
                Ok(_) => {}
                Err(VmError::ClassNotFound(name)) => debug!("Bootstrap without {}", name),
                Err(err) => return Err(err),
            }
        }
        if self.method_area.is_registered(CLASS_CLASS) {
            for name in self.method_area.class_names() {
                if let Some(class) = self.method_area.lookup_class(&name) {
                    self.mirror_of_class(&class)?;
                }
            }
        }
        Ok(())
    }

    /// Runs `main(String[])` of the configured main class.
    pub fn start(&self) -> Result<(), VmError> {
        let main_class = self.config.main_class.replace('.', "/");
        info!("Start {} with {:?}", main_class, self.config.args);
        self.bootstrap()?;
        let class = self.load_class(&main_class)?;
        let main = class
            .declared_method(MAIN_METHOD, MAIN_DESCRIPTOR)
            .filter(|m| m.is_static())
            .ok_or_else(|| {
                VmError::UnresolvedSymbol(format!(
                    "static {}{} in {}",
                    MAIN_METHOD, MAIN_DESCRIPTOR, main_class
                ))
            })?;

        let args = self.new_array("[Ljava/lang/String;", self.config.args.len() as i32)?;
        for (i, arg) in self.config.args.iter().enumerate() {
            let string = self.new_string(arg)?;
            args.as_array()?.store(i as i32, Value::Ref(Some(string)))?;
        }
        Interpreter::new(self).invoke(main, &[Value::Ref(Some(args))])?;
        self.out.lock().flush()?;
        info!("Finished {}", main_class);
        Ok(())
    }

    /// Runs a static method to completion on a fresh java stack.
    pub fn invoke_static(
        &self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Result<Option<Value>, VmError> {
        let class = self.load_class(class_name)?;
        let method = class.find_method(name, descriptor).ok_or_else(|| {
            VmError::UnresolvedSymbol(format!("method {}.{}{}", class_name, name, descriptor))
        })?;
        if !method.is_static() {
            return Err(VmError::illegal(format!("{} is not static", method)));
        }
        Interpreter::new(self).invoke(method, args)
    }

    pub fn new_object(&self, class: &Arc<RuntimeClass>) -> ObjectRef {
        Arc::new(Object::Instance(class.make_instance()))
    }

    pub fn new_array(&self, name: &str, length: i32) -> Result<ObjectRef, VmError> {
        let array = self.array_class(name)?.make_instance(length)?;
        Ok(Arc::new(Object::Array(array)))
    }

    /// Nested arrays for `multianewarray`; `counts` starts with the outermost dimension.
    pub fn new_multi_array(&self, name: &str, counts: &[i32]) -> Result<ObjectRef, VmError> {
        if let Some(negative) = counts.iter().find(|c| **c < 0) {
            return Err(VmError::NegativeArraySize(*negative));
        }
        let (length, inner) = counts
            .split_first()
            .ok_or_else(|| VmError::malformed("multianewarray without dimensions"))?;
        let class = self.array_class(name)?;
        let array = class.make_instance(*length)?;
        if !inner.is_empty() {
            for i in 0..*length {
                let element = self.new_multi_array(class.component_descriptor(), inner)?;
                array.store(i, Value::Ref(Some(element)))?;
            }
        }
        Ok(Arc::new(Object::Array(array)))
    }

    /// Builds a `java/lang/String` whose `value` field holds `text`.
    pub fn new_string(&self, text: &str) -> Result<ObjectRef, VmError> {
        let class = self.load_class(STRING_CLASS)?;
        let instance = class.make_instance();
        let units: Vec<u16> = text.encode_utf16().collect();
        let value_field = instance.find_field_named("value").ok_or_else(|| {
            VmError::UnresolvedSymbol(format!("field value in {}", STRING_CLASS))
        })?;

        let (store, coder) = match value_field.descriptor.as_str() {
            "[C" => (ArrayStore::Chars(units.clone()), None),
            "[B" if units.iter().all(|u| *u < 0x100) => (
                ArrayStore::Bytes(units.iter().map(|u| *u as u8 as i8).collect()),
                Some(java_lang::LATIN1),
            ),
            "[B" => (
                ArrayStore::Bytes(
                    units
                        .iter()
                        .flat_map(|u| u.to_be_bytes())
                        .map(|b| b as i8)
                        .collect(),
                ),
                Some(java_lang::UTF16),
            ),
            other => {
                return Err(VmError::illegal(format!(
                    "unsupported String.value type {}",
                    other
                )))
            }
        };
        let array = self
            .array_class(&value_field.descriptor)?
            .make_instance(store.len() as i32)?;
        array.replace(store)?;
        value_field.set(Value::Ref(Some(Arc::new(Object::Array(array)))));

        if let (Some(coder), Ok(field)) = (coder, instance.find_field("coder", "B")) {
            field.set(Value::Int(coder));
        }
        if let Ok(field) = instance.find_field("hash", "I") {
            field.set(Value::Int(java_lang::string_hash(&units)));
        }
        Ok(Arc::new(Object::Instance(instance)))
    }

    fn make_mirror(&self, name: &str) -> Result<ObjectRef, VmError> {
        let class_class = self.load_class(CLASS_CLASS)?;
        let mirror = class_class.make_instance().into_mirror(name);
        Ok(Arc::new(Object::Instance(mirror)))
    }

    pub fn mirror_of_class(&self, class: &RuntimeClass) -> Result<ObjectRef, VmError> {
        class.reflected_or_init(|| self.make_mirror(&class.name))
    }

    pub fn primitive_mirror(&self, name: &str) -> Result<ObjectRef, VmError> {
        if !PRIMITIVE_TYPES.contains(&name) {
            return Err(VmError::UnresolvedSymbol(format!("primitive type {}", name)));
        }
        self.method_area
            .primitive_mirror(name, || self.make_mirror(name))
    }

    /// The `java/lang/Class` instance for a class, array or primitive type name.
    pub fn mirror_of(&self, name: &str) -> Result<ObjectRef, VmError> {
        if PRIMITIVE_TYPES.contains(&name) {
            return self.primitive_mirror(name);
        }
        match self.load(name)? {
            LoadedClass::Class(class) => self.mirror_of_class(&class),
            LoadedClass::Array(array) => array.reflected_or_init(|| self.make_mirror(&array.name)),
        }
    }

    pub(crate) fn write_out(&self, text: &str) -> Result<(), VmError> {
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}
