use crate::vm::classes::{Method, RuntimeClass, OBJECT_CLASS};
use crate::vm::classfile::{ClassDescriptor, Constant};
use crate::vm::error::VmError;
use crate::vm::memory::Value;
use crate::vm::opcodes;
use crate::vm::vm::Vm;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Symbolic reference to a field or method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub interface: bool,
}

/// One class's view of its constant pool. Class references are resolved
/// lazily and cached per index.
pub struct RuntimeConstantPool {
    class_name: String,
    descriptor: Arc<ClassDescriptor>,
    classes: Vec<OnceCell<Arc<RuntimeClass>>>,
}

impl RuntimeConstantPool {
    pub fn new(descriptor: Arc<ClassDescriptor>) -> Self {
        let classes = (0..descriptor.constant_pool.len())
            .map(|_| OnceCell::new())
            .collect();
        RuntimeConstantPool {
            class_name: descriptor.name.clone(),
            descriptor,
            classes,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn constant(&self, index: u16) -> Result<&Constant, VmError> {
        self.descriptor.constant_pool.get(index)
    }

    pub fn utf8(&self, index: u16) -> Result<&str, VmError> {
        self.descriptor.constant_pool.utf8(index)
    }

    /// Name of a Class entry; array types keep their descriptor form (`[I`).
    pub fn class_ref_name(&self, index: u16) -> Result<&str, VmError> {
        self.descriptor.constant_pool.class_name(index)
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, VmError> {
        let pool = &self.descriptor.constant_pool;
        let (class_index, name_and_type, interface) = match pool.get(index)? {
            Constant::FieldRef(c, nt) | Constant::MethodRef(c, nt) => (*c, *nt, false),
            Constant::InterfaceMethodRef(c, nt) => (*c, *nt, true),
            other => {
                return Err(VmError::malformed(format!(
                    "expected a member reference at #{} of {}, found {:?}",
                    index, self.class_name, other
                )))
            }
        };
        let (name, descriptor) = pool.name_and_type(name_and_type)?;
        Ok(MemberRef {
            class_name: pool.class_name(class_index)?,
            name,
            descriptor,
            interface,
        })
    }

    /// Loads (and initializes) the referenced class. Loading happens outside
    /// the cache cell: a static initializer may resolve this same index again
    /// and must see its own linked class.
    pub fn resolve_class(&self, vm: &Vm, index: u16) -> Result<Arc<RuntimeClass>, VmError> {
        let cell = self.classes.get(index as usize).ok_or_else(|| {
            VmError::malformed(format!("constant pool index {} out of range", index))
        })?;
        if let Some(class) = cell.get() {
            return Ok(Arc::clone(class));
        }
        let class = vm.load_class(self.class_ref_name(index)?)?;
        Ok(Arc::clone(cell.get_or_init(|| class)))
    }

    /// Loads the declaring class of a field reference.
    pub fn resolve_field(&self, vm: &Vm, index: u16) -> Result<(Arc<RuntimeClass>, MemberRef<'_>), VmError> {
        let member = self.member_ref(index)?;
        let class = vm.load_class(member.class_name)?;
        Ok((class, member))
    }

    /// Resolves a method or interface-method reference against the
    /// statically named class.
    pub fn resolve_method(&self, vm: &Vm, index: u16) -> Result<Arc<Method>, VmError> {
        let member = self.member_ref(index)?;
        let class_name = if member.class_name.starts_with('[') {
            OBJECT_CLASS
        } else {
            member.class_name
        };
        let class = vm.load_class(class_name)?;
        if class.is_interface() != member.interface {
            return Err(VmError::illegal(format!(
                "{} reference to {} which {} an interface",
                if member.interface { "interface method" } else { "method" },
                class.name,
                if class.is_interface() { "is" } else { "is not" }
            )));
        }
        class
            .find_method(member.name, member.descriptor)
            .ok_or_else(|| {
                VmError::UnresolvedSymbol(format!(
                    "method {}.{}{}",
                    member.class_name, member.name, member.descriptor
                ))
            })
    }

    /// Value pushed by `ldc`, `ldc_w` and `ldc2_w`.
    pub fn literal(&self, vm: &Vm, index: u16) -> Result<Value, VmError> {
        match self.constant(index)? {
            Constant::Integer(i) => Ok(Value::Int(*i)),
            Constant::Float(f) => Ok(Value::Float(*f)),
            Constant::Long(l) => Ok(Value::Long(*l)),
            Constant::Double(d) => Ok(Value::Double(*d)),
            Constant::String(utf8) => Ok(Value::Ref(Some(vm.new_string(self.utf8(*utf8)?)?))),
            Constant::Class(_) => {
                let mirror = vm.mirror_of(self.class_ref_name(index)?)?;
                Ok(Value::Ref(Some(mirror)))
            }
            Constant::MethodHandle(..) | Constant::MethodType(_) | Constant::Dynamic(..) => {
                Err(VmError::UnsupportedInstruction {
                    opcode: opcodes::LDC,
                    mnemonic: "ldc of a dynamic constant",
                })
            }
            other => Err(VmError::malformed(format!(
                "constant #{} of {} is not loadable: {:?}",
                index, self.class_name, other
            ))),
        }
    }
}
