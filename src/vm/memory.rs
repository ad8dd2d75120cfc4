use crate::vm::classes::{ArrayClass, ElementKind, Field, RuntimeClass, Type};
use crate::vm::error::VmError;
use derive_more::TryInto;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub type ObjectRef = Arc<Object>;
/// `None` is the null reference.
pub type Reference = Option<ObjectRef>;

/// Typed value as held by fields, array elements and host-facing APIs.
/// Operand stacks and locals use the untyped `Slot` representation instead.
#[derive(TryInto, Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(Reference),
}

impl Value {
    pub fn null() -> Self {
        Value::Ref(None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Ref(_) => "reference",
        }
    }

    /// Payload of the variant `T` is stored in; any other variant is an
    /// illegal state.
    pub fn typed<T>(self) -> Result<T, VmError>
    where
        T: TryFrom<Value, Error = &'static str>,
    {
        let kind = self.kind();
        T::try_from(self).map_err(|err| VmError::illegal(format!("{}, found {}", err, kind)))
    }
}

impl Type {
    pub(crate) fn default_value(&self) -> Value {
        match self {
            Type::Byte | Type::Short | Type::Int | Type::Char | Type::Boolean => Value::Int(0),
            Type::Long => Value::Long(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            Type::Reference | Type::Void => Value::Ref(None),
        }
    }
}

pub enum Object {
    Instance(Instance),
    Array(ArrayInstance),
}

impl Object {
    pub fn class_name(&self) -> &str {
        match self {
            Object::Instance(instance) => &instance.class().name,
            Object::Array(array) => &array.class().name,
        }
    }

    pub fn as_instance(&self) -> Result<&Instance, VmError> {
        match self {
            Object::Instance(instance) => Ok(instance),
            Object::Array(array) => Err(VmError::illegal(format!(
                "expected an object, found array {}",
                array.class().name
            ))),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayInstance, VmError> {
        match self {
            Object::Array(array) => Ok(array),
            Object::Instance(instance) => Err(VmError::illegal(format!(
                "expected an array, found {}",
                instance.class().name
            ))),
        }
    }

    /// Address-derived hash, stable for the object's lifetime.
    pub fn identity_hash(&self) -> i32 {
        let addr = self as *const Object as usize as u64;
        ((addr >> 3) ^ (addr >> 35)) as i32
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.class_name(), self.identity_hash())
    }
}

/// One level of an object's field layout. The most-derived level is the
/// outermost record; `parent` holds the fields declared by the superclass.
pub struct Instance {
    class: Arc<RuntimeClass>,
    fields: Vec<Field>,
    parent: Option<Box<Instance>>,
    mirror_of: Option<String>,
}

impl Instance {
    pub(crate) fn new(
        class: Arc<RuntimeClass>,
        fields: Vec<Field>,
        parent: Option<Box<Instance>>,
    ) -> Self {
        Instance {
            class,
            fields,
            parent,
            mirror_of: None,
        }
    }

    /// Marks this `java/lang/Class` instance as the mirror of `name`.
    pub(crate) fn into_mirror(mut self, name: &str) -> Self {
        self.mirror_of = Some(name.to_string());
        self
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn parent(&self) -> Option<&Instance> {
        self.parent.as_deref()
    }

    pub fn mirror_of(&self) -> Option<&str> {
        self.mirror_of.as_deref()
    }

    pub fn declared_fields(&self) -> &[Field] {
        &self.fields
    }

    /// Exact name and descriptor match, most-derived level first.
    pub fn find_field(&self, name: &str, descriptor: &str) -> Result<&Field, VmError> {
        let mut level = Some(self);
        while let Some(instance) = level {
            if let Some(field) = instance.fields.iter().find(|f| f.matches(name, descriptor)) {
                return Ok(field);
            }
            level = instance.parent();
        }
        Err(VmError::UnresolvedSymbol(format!(
            "field {}:{} in {}",
            name, descriptor, self.class.name
        )))
    }

    /// Level holding the fields declared by `class_name`.
    pub fn level_of(&self, class_name: &str) -> Option<&Instance> {
        let mut level = Some(self);
        while let Some(instance) = level {
            if instance.class.name == class_name {
                return Some(instance);
            }
            level = instance.parent();
        }
        None
    }

    pub fn find_field_named(&self, name: &str) -> Option<&Field> {
        let mut level = Some(self);
        while let Some(instance) = level {
            if let Some(field) = instance.fields.iter().find(|f| f.name == name) {
                return Some(field);
            }
            level = instance.parent();
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayStore {
    Bytes(Vec<i8>),
    Chars(Vec<u16>),
    Shorts(Vec<i16>),
    Ints(Vec<i32>),
    Longs(Vec<i64>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
    Refs(Vec<Reference>),
}

impl ArrayStore {
    pub fn zeroed(element: ElementKind, len: usize) -> Self {
        match element {
            ElementKind::Boolean | ElementKind::Byte => ArrayStore::Bytes(vec![0; len]),
            ElementKind::Char => ArrayStore::Chars(vec![0; len]),
            ElementKind::Short => ArrayStore::Shorts(vec![0; len]),
            ElementKind::Int => ArrayStore::Ints(vec![0; len]),
            ElementKind::Long => ArrayStore::Longs(vec![0; len]),
            ElementKind::Float => ArrayStore::Floats(vec![0.0; len]),
            ElementKind::Double => ArrayStore::Doubles(vec![0.0; len]),
            ElementKind::Reference => ArrayStore::Refs(vec![None; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayStore::Bytes(v) => v.len(),
            ArrayStore::Chars(v) => v.len(),
            ArrayStore::Shorts(v) => v.len(),
            ArrayStore::Ints(v) => v.len(),
            ArrayStore::Longs(v) => v.len(),
            ArrayStore::Floats(v) => v.len(),
            ArrayStore::Doubles(v) => v.len(),
            ArrayStore::Refs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize) -> Value {
        match self {
            ArrayStore::Bytes(v) => Value::Int(v[index] as i32),
            ArrayStore::Chars(v) => Value::Int(v[index] as i32),
            ArrayStore::Shorts(v) => Value::Int(v[index] as i32),
            ArrayStore::Ints(v) => Value::Int(v[index]),
            ArrayStore::Longs(v) => Value::Long(v[index]),
            ArrayStore::Floats(v) => Value::Float(v[index]),
            ArrayStore::Doubles(v) => Value::Double(v[index]),
            ArrayStore::Refs(v) => Value::Ref(v[index].clone()),
        }
    }

    /// Int values are narrowed to the element width.
    fn store(&mut self, index: usize, value: Value) -> Result<(), VmError> {
        let element = self.kind();
        let into_array = |err: VmError| VmError::illegal(format!("{} array store: {}", element, err));
        match self {
            ArrayStore::Bytes(v) => v[index] = value.typed::<i32>().map_err(into_array)? as i8,
            ArrayStore::Chars(v) => v[index] = value.typed::<i32>().map_err(into_array)? as u16,
            ArrayStore::Shorts(v) => v[index] = value.typed::<i32>().map_err(into_array)? as i16,
            ArrayStore::Ints(v) => v[index] = value.typed().map_err(into_array)?,
            ArrayStore::Longs(v) => v[index] = value.typed().map_err(into_array)?,
            ArrayStore::Floats(v) => v[index] = value.typed().map_err(into_array)?,
            ArrayStore::Doubles(v) => v[index] = value.typed().map_err(into_array)?,
            ArrayStore::Refs(v) => v[index] = value.typed().map_err(into_array)?,
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        match self {
            ArrayStore::Bytes(_) => "byte",
            ArrayStore::Chars(_) => "char",
            ArrayStore::Shorts(_) => "short",
            ArrayStore::Ints(_) => "int",
            ArrayStore::Longs(_) => "long",
            ArrayStore::Floats(_) => "float",
            ArrayStore::Doubles(_) => "double",
            ArrayStore::Refs(_) => "reference",
        }
    }

    fn copy_from(&mut self, dest_pos: usize, src: &ArrayStore, src_pos: usize, len: usize) -> bool {
        let (d, s) = (dest_pos..dest_pos + len, src_pos..src_pos + len);
        match (self, src) {
            (ArrayStore::Bytes(a), ArrayStore::Bytes(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Chars(a), ArrayStore::Chars(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Shorts(a), ArrayStore::Shorts(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Ints(a), ArrayStore::Ints(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Longs(a), ArrayStore::Longs(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Floats(a), ArrayStore::Floats(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Doubles(a), ArrayStore::Doubles(b)) => a[d].copy_from_slice(&b[s]),
            (ArrayStore::Refs(a), ArrayStore::Refs(b)) => a[d].clone_from_slice(&b[s]),
            _ => return false,
        }
        true
    }

    fn copy_within(&mut self, src_pos: usize, dest_pos: usize, len: usize) {
        let s = src_pos..src_pos + len;
        match self {
            ArrayStore::Bytes(v) => v.copy_within(s, dest_pos),
            ArrayStore::Chars(v) => v.copy_within(s, dest_pos),
            ArrayStore::Shorts(v) => v.copy_within(s, dest_pos),
            ArrayStore::Ints(v) => v.copy_within(s, dest_pos),
            ArrayStore::Longs(v) => v.copy_within(s, dest_pos),
            ArrayStore::Floats(v) => v.copy_within(s, dest_pos),
            ArrayStore::Doubles(v) => v.copy_within(s, dest_pos),
            ArrayStore::Refs(v) => {
                let moved: Vec<Reference> = v[s].to_vec();
                v[dest_pos..dest_pos + len].clone_from_slice(&moved);
            }
        }
    }
}

pub struct ArrayInstance {
    class: Arc<ArrayClass>,
    length: usize,
    store: Mutex<ArrayStore>,
}

impl ArrayInstance {
    pub(crate) fn new(class: Arc<ArrayClass>, length: usize) -> Self {
        let store = ArrayStore::zeroed(class.element, length);
        ArrayInstance {
            class,
            length,
            store: Mutex::new(store),
        }
    }

    pub fn class(&self) -> &Arc<ArrayClass> {
        &self.class
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn check_index(&self, index: i32) -> Result<usize, VmError> {
        if index < 0 || index as usize >= self.length {
            return Err(VmError::ArrayIndexOutOfBounds {
                index,
                length: self.length,
            });
        }
        Ok(index as usize)
    }

    pub fn load(&self, index: i32) -> Result<Value, VmError> {
        let index = self.check_index(index)?;
        Ok(self.store.lock().load(index))
    }

    pub fn store(&self, index: i32, value: Value) -> Result<(), VmError> {
        let index = self.check_index(index)?;
        self.store.lock().store(index, value)
    }

    pub fn snapshot(&self) -> ArrayStore {
        self.store.lock().clone()
    }

    pub(crate) fn replace(&self, store: ArrayStore) -> Result<(), VmError> {
        if store.len() != self.length {
            return Err(VmError::illegal("array length cannot change"));
        }
        *self.store.lock() = store;
        Ok(())
    }

    /// `System.arraycopy` semantics for a non-null source and destination.
    pub fn copy_to(
        &self,
        src_pos: i32,
        dest: &ArrayInstance,
        dest_pos: i32,
        len: i32,
    ) -> Result<(), VmError> {
        if src_pos < 0 || dest_pos < 0 || len < 0 {
            return Err(VmError::ArrayIndexOutOfBounds {
                index: src_pos.min(dest_pos).min(len),
                length: self.length,
            });
        }
        let (src_pos, dest_pos, count) = (src_pos as usize, dest_pos as usize, len as usize);
        if src_pos + count > self.length {
            return Err(VmError::ArrayIndexOutOfBounds {
                index: (src_pos + count) as i32,
                length: self.length,
            });
        }
        if dest_pos + count > dest.length {
            return Err(VmError::ArrayIndexOutOfBounds {
                index: (dest_pos + count) as i32,
                length: dest.length,
            });
        }
        if std::ptr::eq(self, dest) {
            self.store.lock().copy_within(src_pos, dest_pos, count);
            return Ok(());
        }
        let src = self.store.lock().clone();
        let copied = dest.store.lock().copy_from(dest_pos, &src, src_pos, count);
        if !copied {
            return Err(VmError::illegal(format!(
                "arraycopy from {} to {}",
                self.class.name, dest.class.name
            )));
        }
        Ok(())
    }
}
