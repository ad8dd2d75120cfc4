#![allow(dead_code)]

use byteorder::{BigEndian, WriteBytesExt};
use javelin::vm::class_path::MemoryClassPath;
use javelin::vm::opcodes::*;
use javelin::{Vm, VmConfig};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SUPER: u16 = 0x0020;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

pub const OBJECT: &str = "java/lang/Object";
pub const STRING: &str = "java/lang/String";
pub const THROWABLE: &str = "java/lang/Throwable";

/// Exception table row: start, end, handler and catch-type pool index.
pub type Handler = (u16, u16, u16, u16);

/// Assembles class-file bytes. Pool entries are interned, so asking twice
/// for the same constant yields the same index.
pub struct ClassBuilder {
    name: String,
    flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    pool: Vec<u8>,
    next_index: u16,
    interned: HashMap<Vec<u8>, u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut builder = ClassBuilder {
            name: name.to_string(),
            flags: ACC_PUBLIC | ACC_SUPER,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            pool: Vec::new(),
            next_index: 1,
            interned: HashMap::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        };
        builder.this_class = builder.class_ref(name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.class_ref(super_name);
        }
        builder
    }

    /// Subclass of `java/lang/Object`.
    pub fn class(name: &str) -> Self {
        Self::new(name, Some(OBJECT))
    }

    pub fn interface(name: &str) -> Self {
        let mut builder = Self::class(name);
        builder.flags = ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT;
        builder
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        let index = self.class_ref(interface);
        self.interfaces.push(index);
        self
    }

    fn intern(&mut self, entry: Vec<u8>, slots: u16) -> u16 {
        if let Some(index) = self.interned.get(&entry) {
            return *index;
        }
        let index = self.next_index;
        self.pool.extend_from_slice(&entry);
        self.interned.insert(entry, index);
        self.next_index += slots;
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        let mut entry = vec![1];
        entry.write_u16::<BigEndian>(text.len() as u16).unwrap();
        entry.extend_from_slice(text.as_bytes());
        self.intern(entry, 1)
    }

    fn pair(&mut self, tag: u8, first: u16, second: u16) -> u16 {
        let mut entry = vec![tag];
        entry.write_u16::<BigEndian>(first).unwrap();
        entry.write_u16::<BigEndian>(second).unwrap();
        self.intern(entry, 1)
    }

    pub fn class_ref(&mut self, name: &str) -> u16 {
        let utf8 = self.utf8(name);
        let mut entry = vec![7];
        entry.write_u16::<BigEndian>(utf8).unwrap();
        self.intern(entry, 1)
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8(text);
        let mut entry = vec![8];
        entry.write_u16::<BigEndian>(utf8).unwrap();
        self.intern(entry, 1)
    }

    pub fn int(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.write_i32::<BigEndian>(value).unwrap();
        self.intern(entry, 1)
    }

    pub fn float(&mut self, value: f32) -> u16 {
        let mut entry = vec![4];
        entry.write_u32::<BigEndian>(value.to_bits()).unwrap();
        self.intern(entry, 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let mut entry = vec![5];
        entry.write_i64::<BigEndian>(value).unwrap();
        self.intern(entry, 2)
    }

    pub fn double(&mut self, value: f64) -> u16 {
        let mut entry = vec![6];
        entry.write_u64::<BigEndian>(value.to_bits()).unwrap();
        self.intern(entry, 2)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.pair(12, name, descriptor)
    }

    fn member(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_ref(class);
        let name_and_type = self.name_and_type(name, descriptor);
        self.pair(tag, class, name_and_type)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(9, class, name, descriptor)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(10, class, name, descriptor)
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(11, class, name, descriptor)
    }

    fn member_info(&mut self, flags: u16, name: &str, descriptor: &str, attributes: Vec<Vec<u8>>) -> Vec<u8> {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut info = Vec::new();
        info.write_u16::<BigEndian>(flags).unwrap();
        info.write_u16::<BigEndian>(name).unwrap();
        info.write_u16::<BigEndian>(descriptor).unwrap();
        info.write_u16::<BigEndian>(attributes.len() as u16).unwrap();
        attributes.iter().for_each(|a| info.extend_from_slice(a));
        info
    }

    fn attribute(&mut self, name: &str, data: &[u8]) -> Vec<u8> {
        let name = self.utf8(name);
        let mut attribute = Vec::new();
        attribute.write_u16::<BigEndian>(name).unwrap();
        attribute.write_u32::<BigEndian>(data.len() as u32).unwrap();
        attribute.extend_from_slice(data);
        attribute
    }

    pub fn field(mut self, flags: u16, name: &str, descriptor: &str) -> Self {
        let info = self.member_info(flags, name, descriptor, Vec::new());
        self.fields.push(info);
        self
    }

    /// Field carrying a `ConstantValue` attribute pointing at `constant`.
    pub fn constant_field(mut self, flags: u16, name: &str, descriptor: &str, constant: u16) -> Self {
        let attribute = self.attribute("ConstantValue", &constant.to_be_bytes());
        let info = self.member_info(flags, name, descriptor, vec![attribute]);
        self.fields.push(info);
        self
    }

    pub fn method(self, flags: u16, name: &str, descriptor: &str, max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        self.method_with_handlers(flags, name, descriptor, max_stack, max_locals, code, &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn method_with_handlers(
        mut self,
        flags: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        handlers: &[Handler],
    ) -> Self {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(max_stack).unwrap();
        data.write_u16::<BigEndian>(max_locals).unwrap();
        data.write_u32::<BigEndian>(code.len() as u32).unwrap();
        data.extend_from_slice(&code);
        data.write_u16::<BigEndian>(handlers.len() as u16).unwrap();
        for (start, end, handler, catch_type) in handlers {
            for value in [start, end, handler, catch_type] {
                data.write_u16::<BigEndian>(*value).unwrap();
            }
        }
        data.write_u16::<BigEndian>(0).unwrap();
        let attribute = self.attribute("Code", &data);
        let info = self.member_info(flags, name, descriptor, vec![attribute]);
        self.methods.push(info);
        self
    }

    /// Method without a Code attribute; `flags` should carry ABSTRACT or NATIVE.
    pub fn bodiless_method(mut self, flags: u16, name: &str, descriptor: &str) -> Self {
        let info = self.member_info(flags, name, descriptor, Vec::new());
        self.methods.push(info);
        self
    }

    /// `<init>()V` that only calls the superclass constructor.
    pub fn default_constructor(mut self, super_name: &str) -> Self {
        let init = self.method_ref(super_name, "<init>", "()V");
        let code = [vec![ALOAD_0, INVOKESPECIAL], be(init), vec![RETURN]].concat();
        self.method(ACC_PUBLIC, "<init>", "()V", 1, 1, code)
    }

    pub fn finish(self) -> (String, Vec<u8>) {
        let mut bytes = Vec::new();
        bytes.write_u32::<BigEndian>(0xCAFE_BABE).unwrap();
        bytes.write_u16::<BigEndian>(0).unwrap();
        bytes.write_u16::<BigEndian>(52).unwrap();
        bytes.write_u16::<BigEndian>(self.next_index).unwrap();
        bytes.extend_from_slice(&self.pool);
        bytes.write_u16::<BigEndian>(self.flags).unwrap();
        bytes.write_u16::<BigEndian>(self.this_class).unwrap();
        bytes.write_u16::<BigEndian>(self.super_class).unwrap();
        bytes.write_u16::<BigEndian>(self.interfaces.len() as u16).unwrap();
        for interface in &self.interfaces {
            bytes.write_u16::<BigEndian>(*interface).unwrap();
        }
        for members in [&self.fields, &self.methods] {
            bytes.write_u16::<BigEndian>(members.len() as u16).unwrap();
            members.iter().for_each(|m| bytes.extend_from_slice(m));
        }
        bytes.write_u16::<BigEndian>(0).unwrap();
        (self.name, bytes)
    }
}

/// Big-endian bytes of a pool index or branch offset.
pub fn be(value: u16) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn offset(value: i16) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn object_class() -> (String, Vec<u8>) {
    ClassBuilder::new(OBJECT, None)
        .method(ACC_PUBLIC, "<init>", "()V", 0, 1, vec![RETURN])
        .bodiless_method(ACC_PUBLIC | ACC_NATIVE, "hashCode", "()I")
        .finish()
}

pub fn string_class() -> (String, Vec<u8>) {
    ClassBuilder::class(STRING)
        .flags(ACC_PUBLIC | ACC_FINAL | ACC_SUPER)
        .field(ACC_PRIVATE | ACC_FINAL, "value", "[C")
        .field(ACC_PRIVATE, "hash", "I")
        .default_constructor(OBJECT)
        .finish()
}

/// `Throwable` with `<init>()V` and `<init>(Ljava/lang/String;)V`.
pub fn throwable_class() -> (String, Vec<u8>) {
    let mut builder = ClassBuilder::class(THROWABLE).field(ACC_PRIVATE, "detailMessage", "Ljava/lang/String;");
    let init = builder.method_ref(OBJECT, "<init>", "()V");
    let message = builder.field_ref(THROWABLE, "detailMessage", "Ljava/lang/String;");
    let code = [
        vec![ALOAD_0, INVOKESPECIAL],
        be(init),
        vec![ALOAD_0, ALOAD_1, PUTFIELD],
        be(message),
        vec![RETURN],
    ]
    .concat();
    builder
        .default_constructor(OBJECT)
        .method(ACC_PUBLIC, "<init>", "(Ljava/lang/String;)V", 2, 2, code)
        .finish()
}

/// Exception class `name` extending `parent` with both constructors.
pub fn exception_class(name: &str, parent: &str) -> (String, Vec<u8>) {
    let mut builder = ClassBuilder::new(name, Some(parent));
    let init = builder.method_ref(parent, "<init>", "(Ljava/lang/String;)V");
    let code = [vec![ALOAD_0, ALOAD_1, INVOKESPECIAL], be(init), vec![RETURN]].concat();
    builder
        .default_constructor(parent)
        .method(ACC_PUBLIC, "<init>", "(Ljava/lang/String;)V", 2, 2, code)
        .finish()
}

pub fn runtime_library() -> Vec<(String, Vec<u8>)> {
    vec![object_class(), string_class(), throwable_class()]
}

pub fn class_path(classes: Vec<(String, Vec<u8>)>) -> MemoryClassPath {
    let mut class_path = MemoryClassPath::new();
    for (name, bytes) in runtime_library().into_iter().chain(classes) {
        class_path.insert(&name, bytes);
    }
    class_path
}

/// VM over the small runtime library plus `classes`.
pub fn vm_with(classes: Vec<(String, Vec<u8>)>) -> Vm {
    Vm::with_class_path(VmConfig::default(), Box::new(class_path(classes)))
}

/// Same as `vm_with`, with the print hook writing into the returned buffer.
pub fn vm_with_output(classes: Vec<(String, Vec<u8>)>) -> (Vm, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let vm = vm_with(classes).with_output(Box::new(buffer.clone()));
    (vm, buffer)
}

#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
