use crate::vm::classfile::{ClassDescriptor, ExceptionTableEntry, MemberInfo};
use crate::vm::error::VmError;
use crate::vm::memory::{ArrayInstance, Instance, ObjectRef, Value};
use crate::vm::method_area::MethodArea;
use bitflags::bitflags;
use log::trace;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const CLASS_CLASS: &str = "java/lang/Class";
pub const STRING_CLASS: &str = "java/lang/String";
pub const CLONEABLE: &str = "java/lang/Cloneable";
pub const SERIALIZABLE: &str = "java/io/Serializable";

pub const CONSTRUCTOR: &str = "<init>";
pub const STATIC_INITIALIZER: &str = "<clinit>";

bitflags! {
    #[derive(Default)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const SUPER = 0x0020;
        const BRIDGE = 0x0040;
        const VOLATILE = 0x0040;
        const VARARGS = 0x0080;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
pub enum Type {
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
    Boolean,
    Reference,
    #[default]
    Void,
}

impl Type {
    /// Type of a field descriptor such as `I`, `[J` or `Ljava/lang/String;`.
    pub fn of_field(descriptor: &str) -> Result<Type, VmError> {
        let (ty, rest) = parse_type(descriptor)?;
        if !rest.is_empty() || ty == Type::Void {
            return Err(VmError::malformed(format!(
                "bad field descriptor {}",
                descriptor
            )));
        }
        Ok(ty)
    }

    pub fn slots(&self) -> usize {
        match self {
            Type::Long | Type::Double => 2,
            Type::Void => 0,
            _ => 1,
        }
    }
}

/// Reads one type off the front of a descriptor, returning the remainder.
fn parse_type(descriptor: &str) -> Result<(Type, &str), VmError> {
    let bad = || VmError::malformed(format!("bad type descriptor {}", descriptor));
    let first = descriptor.chars().next().ok_or_else(bad)?;
    let ty = match first {
        'B' => Type::Byte,
        'C' => Type::Char,
        'D' => Type::Double,
        'F' => Type::Float,
        'I' => Type::Int,
        'J' => Type::Long,
        'S' => Type::Short,
        'Z' => Type::Boolean,
        'V' => Type::Void,
        'L' => {
            let end = descriptor.find(';').ok_or_else(bad)?;
            return Ok((Type::Reference, &descriptor[end + 1..]));
        }
        '[' => {
            let mut dims = 0;
            while descriptor[dims..].starts_with('[') {
                dims += 1;
            }
            let (element, rest) = parse_type(&descriptor[dims..])?;
            if element == Type::Void {
                return Err(bad());
            }
            return Ok((Type::Reference, rest));
        }
        _ => return Err(bad()),
    };
    Ok((ty, &descriptor[1..]))
}

#[derive(Eq, PartialEq, Clone, Default, Debug)]
pub struct Signature {
    pub return_type: Type,
    pub arguments: Vec<Type>,
}

impl Signature {
    pub fn parse(descriptor: &str) -> Result<Signature, VmError> {
        let bad = || VmError::malformed(format!("bad method descriptor {}", descriptor));
        let mut rest = descriptor.strip_prefix('(').ok_or_else(bad)?;
        let mut arguments = Vec::new();
        while !rest.starts_with(')') {
            let (ty, tail) = parse_type(rest)?;
            if ty == Type::Void {
                return Err(bad());
            }
            arguments.push(ty);
            rest = tail;
        }
        let (return_type, tail) = parse_type(&rest[1..])?;
        if !tail.is_empty() {
            return Err(bad());
        }
        Ok(Signature {
            return_type,
            arguments,
        })
    }

    /// Operand slots taken by the arguments, receiver excluded.
    pub fn arg_slots(&self) -> usize {
        self.arguments.iter().map(Type::slots).sum()
    }
}

pub struct Field {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
    pub flags: AccessFlags,
    pub value_type: Type,
    pub constant_value: Option<u16>,
    value: Mutex<Value>,
}

impl Field {
    fn from_member(class_name: &str, member: &MemberInfo) -> Result<Field, VmError> {
        let value_type = Type::of_field(&member.descriptor)?;
        Ok(Field {
            class_name: class_name.to_string(),
            name: member.name.clone(),
            descriptor: member.descriptor.clone(),
            flags: member.access_flags,
            value_type,
            constant_value: member.constant_value(),
            value: Mutex::new(value_type.default_value()),
        })
    }

    /// Zero-valued copy of this field's metadata, used to lay out a new instance.
    pub(crate) fn fresh(&self) -> Field {
        Field {
            class_name: self.class_name.clone(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
            flags: self.flags,
            value_type: self.value_type,
            constant_value: self.constant_value,
            value: Mutex::new(self.value_type.default_value()),
        }
    }

    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor == descriptor
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    pub fn get(&self) -> Value {
        self.value.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.value.lock() = value;
    }
}

pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub flags: AccessFlags,
    pub signature: Signature,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    class_name: String,
    class: Weak<RuntimeClass>,
}

impl Method {
    fn from_member(class_name: &str, member: &MemberInfo) -> Result<Method, VmError> {
        let signature = Signature::parse(&member.descriptor)?;
        let flags = member.access_flags;
        let (max_stack, max_locals, code, exception_table) = match member.code() {
            Some(code) => (
                code.max_stack,
                code.max_locals,
                code.code.clone(),
                code.exception_table.clone(),
            ),
            None if flags.intersects(AccessFlags::NATIVE | AccessFlags::ABSTRACT) => {
                (0, 0, Vec::new(), Vec::new())
            }
            None => {
                return Err(VmError::malformed(format!(
                    "method {}.{}{} has no Code attribute",
                    class_name, member.name, member.descriptor
                )))
            }
        };
        Ok(Method {
            name: member.name.clone(),
            descriptor: member.descriptor.clone(),
            flags,
            signature,
            max_stack,
            max_locals,
            code,
            exception_table,
            class_name: class_name.to_string(),
            class: Weak::new(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn class(&self) -> Result<Arc<RuntimeClass>, VmError> {
        self.class.upgrade().ok_or_else(|| {
            VmError::illegal(format!("class {} of {} was discarded", self.class_name, self.name))
        })
    }

    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor == descriptor
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(AccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.flags.contains(AccessFlags::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(AccessFlags::ABSTRACT)
    }

    /// Slots popped off the caller's stack, receiver included.
    pub fn arg_slots(&self) -> usize {
        let receiver = if self.is_static() { 0 } else { 1 };
        self.signature.arg_slots() + receiver
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    Linked,
    Initialized,
    Erroneous,
}

pub struct RuntimeClass {
    pub name: String,
    pub flags: AccessFlags,
    pub parent: Option<Arc<RuntimeClass>>,
    pub interfaces: Vec<Arc<RuntimeClass>>,
    pub static_fields: Vec<Field>,
    pub instance_fields: Vec<Field>,
    pub methods: Vec<Arc<Method>>,
    pub descriptor: Arc<ClassDescriptor>,
    reflected: OnceCell<ObjectRef>,
    state: Mutex<ClassState>,
}

impl RuntimeClass {
    /// Builds the runtime form of a descriptor whose ancestors are already registered.
    pub fn link(
        descriptor: Arc<ClassDescriptor>,
        parent: Option<Arc<RuntimeClass>>,
        interfaces: Vec<Arc<RuntimeClass>>,
    ) -> Result<Arc<RuntimeClass>, VmError> {
        let name = descriptor.name.clone();
        let mut static_fields = Vec::new();
        let mut instance_fields = Vec::new();
        for member in &descriptor.fields {
            let field = Field::from_member(&name, member)?;
            if field.is_static() {
                static_fields.push(field);
            } else {
                instance_fields.push(field);
            }
        }
        let methods = descriptor
            .methods
            .iter()
            .map(|m| Method::from_member(&name, m))
            .collect::<Result<Vec<_>, _>>()?;
        trace!(
            "Link {}: {} static fields, {} instance fields, {} methods",
            name,
            static_fields.len(),
            instance_fields.len(),
            methods.len()
        );

        Ok(Arc::new_cyclic(|weak| RuntimeClass {
            name,
            flags: descriptor.access_flags,
            parent,
            interfaces,
            static_fields,
            instance_fields,
            methods: methods
                .into_iter()
                .map(|mut m| {
                    m.class = weak.clone();
                    Arc::new(m)
                })
                .collect(),
            descriptor,
            reflected: OnceCell::new(),
            state: Mutex::new(ClassState::Linked),
        }))
    }

    pub fn state(&self) -> ClassState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ClassState) {
        *self.state.lock() = state;
    }

    pub fn is_interface(&self) -> bool {
        self.flags.contains(AccessFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(AccessFlags::ABSTRACT)
    }

    /// Prefers superclass binding for `invokespecial`.
    pub fn has_super_flag(&self) -> bool {
        self.flags.contains(AccessFlags::SUPER)
    }

    /// Self, then each superclass up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &RuntimeClass> {
        std::iter::successors(Some(self), |c| c.parent.as_deref())
    }

    pub fn declared_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        self.methods
            .iter()
            .find(|m| m.matches(name, descriptor))
            .cloned()
    }

    /// Static field by exact name and descriptor, searching ancestors and then
    /// interfaces for constants.
    pub fn find_field(&self, name: &str, descriptor: &str) -> Result<&Field, VmError> {
        for class in self.ancestors() {
            if let Some(field) = class
                .static_fields
                .iter()
                .find(|f| f.matches(name, descriptor))
            {
                return Ok(field);
            }
        }
        for class in self.ancestors() {
            for interface in &class.interfaces {
                if let Ok(field) = interface.find_field(name, descriptor) {
                    return Ok(field);
                }
            }
        }
        Err(VmError::UnresolvedSymbol(format!(
            "field {}.{}:{}",
            self.name, name, descriptor
        )))
    }

    /// Late-bound lookup: self, then superclasses, then interfaces.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        self.ancestors()
            .find_map(|c| c.declared_method(name, descriptor))
            .or_else(|| self.find_interface_method(name, descriptor))
    }

    pub fn find_interface_method(&self, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        if let Some(method) = self.declared_method(name, descriptor) {
            return Some(method);
        }
        for class in self.ancestors() {
            for interface in &class.interfaces {
                if let Some(method) = interface.find_interface_method(name, descriptor) {
                    return Some(method);
                }
            }
        }
        None
    }

    /// Assignability to `other`: implementation for interfaces, identity or
    /// strict ancestry for classes.
    pub fn look_like(&self, other: &RuntimeClass) -> bool {
        if other.is_interface() {
            self.implements(other)
        } else {
            self.name == other.name || self.is_subclass_of(other)
        }
    }

    /// `other` is a strict ancestor of this class.
    pub fn is_subclass_of(&self, other: &RuntimeClass) -> bool {
        self.ancestors().skip(1).any(|c| c.name == other.name)
    }

    pub fn implements(&self, interface: &RuntimeClass) -> bool {
        if self.name == interface.name {
            return true;
        }
        self.ancestors().any(|class| {
            class
                .interfaces
                .iter()
                .any(|i| i.name == interface.name || i.implements(interface))
        })
    }

    pub fn make_instance(self: &Arc<Self>) -> Instance {
        let parent = self
            .parent
            .as_ref()
            .map(|parent| Box::new(parent.make_instance()));
        Instance::new(
            Arc::clone(self),
            self.instance_fields.iter().map(Field::fresh).collect(),
            parent,
        )
    }

    pub fn reflected(&self) -> Option<&ObjectRef> {
        self.reflected.get()
    }

    pub(crate) fn reflected_or_init<F>(&self, init: F) -> Result<ObjectRef, VmError>
    where
        F: FnOnce() -> Result<ObjectRef, VmError>,
    {
        if let Some(mirror) = self.reflected.get() {
            return Ok(Arc::clone(mirror));
        }
        let created = init()?;
        Ok(Arc::clone(self.reflected.get_or_init(|| created)))
    }
}

impl std::fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClass")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| &p.name))
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

impl ElementKind {
    pub fn of_component(component: &str) -> Result<ElementKind, VmError> {
        Ok(match component.as_bytes().first() {
            Some(b'Z') => ElementKind::Boolean,
            Some(b'B') => ElementKind::Byte,
            Some(b'C') => ElementKind::Char,
            Some(b'S') => ElementKind::Short,
            Some(b'I') => ElementKind::Int,
            Some(b'J') => ElementKind::Long,
            Some(b'F') => ElementKind::Float,
            Some(b'D') => ElementKind::Double,
            Some(b'L') | Some(b'[') => ElementKind::Reference,
            _ => {
                return Err(VmError::malformed(format!(
                    "bad array component {}",
                    component
                )))
            }
        })
    }

    /// `newarray` type codes.
    pub fn of_atype(atype: u8) -> Result<ElementKind, VmError> {
        Ok(match atype {
            4 => ElementKind::Boolean,
            5 => ElementKind::Char,
            6 => ElementKind::Float,
            7 => ElementKind::Double,
            8 => ElementKind::Byte,
            9 => ElementKind::Short,
            10 => ElementKind::Int,
            11 => ElementKind::Long,
            _ => return Err(VmError::malformed(format!("bad newarray type {}", atype))),
        })
    }

    /// Bytes per element, as `Unsafe.arrayIndexScale0` reports it.
    pub fn width(&self) -> i32 {
        match self {
            ElementKind::Boolean | ElementKind::Byte => 1,
            ElementKind::Char | ElementKind::Short => 2,
            ElementKind::Int | ElementKind::Float | ElementKind::Reference => 4,
            ElementKind::Long | ElementKind::Double => 8,
        }
    }

    pub fn descriptor(&self) -> &'static str {
        match self {
            ElementKind::Boolean => "Z",
            ElementKind::Byte => "B",
            ElementKind::Char => "C",
            ElementKind::Short => "S",
            ElementKind::Int => "I",
            ElementKind::Long => "J",
            ElementKind::Float => "F",
            ElementKind::Double => "D",
            ElementKind::Reference => "L",
        }
    }
}

/// Synthesized class of one array type, e.g. `[I` or `[[Ljava/lang/String;`.
pub struct ArrayClass {
    pub name: String,
    pub element: ElementKind,
    pub parent: Arc<RuntimeClass>,
    pub interfaces: [&'static str; 2],
    reflected: OnceCell<ObjectRef>,
}

impl ArrayClass {
    pub fn synthesize(name: &str, root: Arc<RuntimeClass>) -> Result<ArrayClass, VmError> {
        let component = name
            .strip_prefix('[')
            .ok_or_else(|| VmError::malformed(format!("{} is not an array type", name)))?;
        let element = ElementKind::of_component(component)?;
        if element == ElementKind::Reference {
            Type::of_field(component)?;
        } else if component.len() != 1 {
            return Err(VmError::malformed(format!("bad array type {}", name)));
        }
        Ok(ArrayClass {
            name: name.to_string(),
            element,
            parent: root,
            interfaces: [CLONEABLE, SERIALIZABLE],
            reflected: OnceCell::new(),
        })
    }

    /// Descriptor of one element: `I`, `Ljava/lang/String;`, `[J`...
    pub fn component_descriptor(&self) -> &str {
        &self.name[1..]
    }

    /// Element class name with the `L...;` wrapper removed.
    pub fn component_name(&self) -> &str {
        let component = self.component_descriptor();
        component
            .strip_prefix('L')
            .and_then(|c| c.strip_suffix(';'))
            .unwrap_or(component)
    }

    pub fn make_instance(self: &Arc<Self>, size: i32) -> Result<ArrayInstance, VmError> {
        if size < 0 {
            return Err(VmError::NegativeArraySize(size));
        }
        Ok(ArrayInstance::new(Arc::clone(self), size as usize))
    }

    pub fn look_like(&self, target: &str, area: &MethodArea) -> bool {
        if self.name == target || self.parent.name == target || self.interfaces.contains(&target)
        {
            return true;
        }
        match target.strip_prefix('[') {
            Some(target_component) => {
                component_assignable(self.component_descriptor(), target_component, area)
            }
            None => false,
        }
    }

    pub fn reflected(&self) -> Option<&ObjectRef> {
        self.reflected.get()
    }

    pub(crate) fn reflected_or_init<F>(&self, init: F) -> Result<ObjectRef, VmError>
    where
        F: FnOnce() -> Result<ObjectRef, VmError>,
    {
        if let Some(mirror) = self.reflected.get() {
            return Ok(Arc::clone(mirror));
        }
        let created = init()?;
        Ok(Arc::clone(self.reflected.get_or_init(|| created)))
    }
}

fn component_assignable(source: &str, target: &str, area: &MethodArea) -> bool {
    if source == target {
        return true;
    }
    if let Some(target_component) = target.strip_prefix('[') {
        return match source.strip_prefix('[') {
            Some(source_component) => component_assignable(source_component, target_component, area),
            None => false,
        };
    }
    let target_class = match class_of(target) {
        Some(name) => name,
        None => return false,
    };
    if source.starts_with('[') {
        return target_class == OBJECT_CLASS
            || target_class == CLONEABLE
            || target_class == SERIALIZABLE;
    }
    match class_of(source) {
        Some(source_class) => {
            match (area.lookup_class(source_class), area.lookup_class(target_class)) {
                (Some(s), Some(t)) => s.look_like(&t),
                _ => false,
            }
        }
        None => false,
    }
}

fn class_of(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('L')?.strip_suffix(';')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("()V", vec![], Type::Void, 0)]
    #[case("(IJ)D", vec![Type::Int, Type::Long], Type::Double, 3)]
    #[case(
        "([Ljava/lang/String;[[DZ)Ljava/lang/Object;",
        vec![Type::Reference, Type::Reference, Type::Boolean],
        Type::Reference,
        3
    )]
    #[case("(DLjava/util/List;C)[I", vec![Type::Double, Type::Reference, Type::Char], Type::Reference, 4)]
    fn parses_method_signatures(
        #[case] descriptor: &str,
        #[case] arguments: Vec<Type>,
        #[case] return_type: Type,
        #[case] slots: usize,
    ) {
        let signature = Signature::parse(descriptor).unwrap();
        assert_eq!(signature.arguments, arguments);
        assert_eq!(signature.return_type, return_type);
        assert_eq!(signature.arg_slots(), slots);
    }

    #[rstest]
    #[case("I)V")]
    #[case("(V)V")]
    #[case("(Ljava/lang/String)V")]
    #[case("(I)")]
    #[case("(I)VV")]
    fn rejects_bad_signatures(#[case] descriptor: &str) {
        assert!(Signature::parse(descriptor).is_err());
    }

    #[test]
    fn field_types() {
        assert_eq!(Type::of_field("J").unwrap(), Type::Long);
        assert_eq!(Type::of_field("[[I").unwrap(), Type::Reference);
        assert!(Type::of_field("V").is_err());
        assert!(Type::of_field("II").is_err());
    }

    #[test]
    fn element_kinds() {
        assert_eq!(ElementKind::of_atype(10).unwrap(), ElementKind::Int);
        assert_eq!(ElementKind::of_atype(4).unwrap(), ElementKind::Boolean);
        assert!(ElementKind::of_atype(3).is_err());
        assert_eq!(
            ElementKind::of_component("[I").unwrap(),
            ElementKind::Reference
        );
    }
}
