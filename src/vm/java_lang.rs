use crate::vm::classes::{ElementKind, Method, Type};
use crate::vm::error::VmError;
use crate::vm::memory::{ArrayStore, Object, ObjectRef, Reference, Value};
use crate::vm::stack::OperandStack;
use crate::vm::vm::Vm;
use log::{debug, trace};
use std::collections::HashMap;

/// `String.coder` values.
pub const LATIN1: i32 = 0;
pub const UTF16: i32 = 1;

const PRINT_STREAM: &str = "java/io/PrintStream";
const PRINT: &str = "print";
const PRINTLN: &str = "println";
const REGISTER_NATIVES: &str = "registerNatives";
const STRING_ARRAY: &str = "[Ljava/lang/String;";

/// Length of the table `SystemProps$Raw.platformProperties` hands back; every
/// entry is left null so the library falls back to its defaults.
const PLATFORM_PROPERTY_SLOTS: i32 = 100;

/// Key/value pairs reported by `SystemProps$Raw.vmProperties`.
const VM_PROPERTIES: [(&str, &str); 3] = [
    ("java.vm.name", "javelin"),
    ("java.vm.vendor", "javelin"),
    ("java.vm.version", env!("CARGO_PKG_VERSION")),
];

/// Host implementation of a native method. It pops its own arguments
/// (receiver last) and pushes its own result on the caller's operand stack.
pub type NativeMethod = fn(&Vm, &mut OperandStack) -> Result<(), VmError>;

pub struct NativeBridge {
    methods: HashMap<(String, String), NativeMethod>,
}

impl Default for NativeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBridge {
    /// Bridge pre-populated with the natives a minimal runtime library needs.
    pub fn new() -> Self {
        let mut bridge = NativeBridge {
            methods: HashMap::new(),
        };
        bridge.register("java/lang/Object", "hashCode", object_hash_code);
        bridge.register("java/lang/Object", "getClass", object_get_class);
        bridge.register("java/lang/System", "identityHashCode", identity_hash_code);
        bridge.register("java/lang/System", "arraycopy", array_copy);
        bridge.register("java/lang/Class", "getPrimitiveClass", get_primitive_class);
        bridge.register("java/lang/Class", "isPrimitive", is_primitive);
        bridge.register("java/lang/Class", "desiredAssertionStatus0", desired_assertion_status);
        bridge.register("java/lang/Class", "getName0", class_get_name);
        bridge.register("java/lang/Class", "forName0", class_for_name);
        bridge.register("java/lang/Float", "floatToRawIntBits", float_to_raw_int_bits);
        bridge.register("java/lang/Float", "intBitsToFloat", int_bits_to_float);
        bridge.register("java/lang/Double", "doubleToRawLongBits", double_to_raw_long_bits);
        bridge.register("java/lang/Double", "longBitsToDouble", long_bits_to_double);
        bridge.register("java/lang/String", "intern", string_intern);
        bridge.register("java/lang/StringUTF16", "isBigEndian", is_big_endian);
        bridge.register("jdk/internal/misc/VM", "initialize", no_op);
        bridge.register("jdk/internal/misc/VM", "initializeFromArchive", drop_class_argument);
        bridge.register("jdk/internal/misc/Unsafe", "arrayBaseOffset0", array_base_offset);
        bridge.register("jdk/internal/misc/Unsafe", "arrayIndexScale0", array_index_scale);
        bridge.register("jdk/internal/util/SystemProps$Raw", "platformProperties", platform_properties);
        bridge.register("jdk/internal/util/SystemProps$Raw", "vmProperties", vm_properties);
        bridge.register("java/lang/Runtime", "maxMemory", max_memory);
        bridge
    }

    pub fn register(&mut self, class_name: &str, method_name: &str, native: NativeMethod) {
        self.methods
            .insert((class_name.to_string(), method_name.to_string()), native);
    }

    pub fn contains(&self, class_name: &str, method_name: &str) -> bool {
        self.methods
            .contains_key(&(class_name.to_string(), method_name.to_string()))
    }

    pub fn invoke(&self, vm: &Vm, method: &Method, stack: &mut OperandStack) -> Result<(), VmError> {
        if method.name == REGISTER_NATIVES {
            trace!("Skip {}", method);
            return Ok(());
        }
        let key = (method.class_name().to_string(), method.name.clone());
        let native = self.methods.get(&key).ok_or_else(|| VmError::NativeNotFound {
            class: method.class_name().to_string(),
            method: method.name.clone(),
        })?;
        debug!("Native {}", method);
        native(vm, stack)
    }
}

fn non_null(reference: Reference, what: &str) -> Result<ObjectRef, VmError> {
    reference.ok_or_else(|| VmError::NullReference(what.to_string()))
}

fn pop_string(stack: &mut OperandStack, what: &str) -> Result<String, VmError> {
    let object = non_null(stack.pop_ref()?, what)?;
    java_string(&object)
}

fn no_op(_vm: &Vm, _stack: &mut OperandStack) -> Result<(), VmError> {
    Ok(())
}

fn drop_class_argument(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    stack.pop_ref()?;
    Ok(())
}

fn object_hash_code(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let this = non_null(stack.pop_ref()?, "hashCode receiver")?;
    stack.push_int(this.identity_hash());
    Ok(())
}

fn identity_hash_code(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let object = stack.pop_ref()?;
    stack.push_int(object.map_or(0, |o| o.identity_hash()));
    Ok(())
}

fn object_get_class(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let this = non_null(stack.pop_ref()?, "getClass receiver")?;
    stack.push_ref(Some(vm.mirror_of(this.class_name())?));
    Ok(())
}

fn array_copy(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let length = stack.pop_int()?;
    let dest_pos = stack.pop_int()?;
    let dest = non_null(stack.pop_ref()?, "arraycopy destination")?;
    let src_pos = stack.pop_int()?;
    let src = non_null(stack.pop_ref()?, "arraycopy source")?;
    src.as_array()?
        .copy_to(src_pos, dest.as_array()?, dest_pos, length)
}

fn get_primitive_class(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let name = pop_string(stack, "primitive type name")?;
    stack.push_ref(Some(vm.primitive_mirror(&name)?));
    Ok(())
}

fn is_primitive(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let this = non_null(stack.pop_ref()?, "isPrimitive receiver")?;
    stack.push_int(vm.method_area().is_primitive_mirror(&this) as i32);
    Ok(())
}

fn desired_assertion_status(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    stack.pop_ref()?;
    stack.push_int(0);
    Ok(())
}

fn class_get_name(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let this = non_null(stack.pop_ref()?, "getName receiver")?;
    let name = this
        .as_instance()?
        .mirror_of()
        .ok_or_else(|| VmError::illegal("getName on a Class that mirrors nothing"))?
        .replace('/', ".");
    stack.push_ref(Some(vm.new_string(&name)?));
    Ok(())
}

/// `forName0(String name, boolean initialize, ClassLoader loader, Class caller)`
fn class_for_name(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    stack.pop_ref()?;
    stack.pop_ref()?;
    stack.pop_int()?;
    let name = pop_string(stack, "class name")?.replace('.', "/");
    stack.push_ref(Some(vm.mirror_of(&name)?));
    Ok(())
}

fn float_to_raw_int_bits(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let value = stack.pop_float()?;
    stack.push_int(value.to_bits() as i32);
    Ok(())
}

fn int_bits_to_float(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let bits = stack.pop_int()?;
    stack.push_float(f32::from_bits(bits as u32));
    Ok(())
}

fn double_to_raw_long_bits(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let value = stack.pop_double()?;
    stack.push_long(value.to_bits() as i64);
    Ok(())
}

fn long_bits_to_double(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let bits = stack.pop_long()?;
    stack.push_double(f64::from_bits(bits as u64));
    Ok(())
}

fn string_intern(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let this = non_null(stack.pop_ref()?, "intern receiver")?;
    stack.push_ref(Some(this));
    Ok(())
}

fn is_big_endian(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    stack.push_int(1);
    Ok(())
}

fn platform_properties(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    stack.push_ref(Some(vm.new_array(STRING_ARRAY, PLATFORM_PROPERTY_SLOTS)?));
    Ok(())
}

fn vm_properties(vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let properties = vm.new_array(STRING_ARRAY, (VM_PROPERTIES.len() * 2) as i32)?;
    let entries = VM_PROPERTIES.iter().flat_map(|(key, value)| [*key, *value]);
    for (i, text) in entries.enumerate() {
        properties
            .as_array()?
            .store(i as i32, Value::Ref(Some(vm.new_string(text)?)))?;
    }
    stack.push_ref(Some(properties));
    Ok(())
}

/// The heap has no configured ceiling.
fn max_memory(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    stack.pop_ref()?;
    stack.push_long(i64::MAX);
    Ok(())
}

/// Component kind of the array type a `Class` mirror stands for.
fn mirrored_element(mirror: Reference) -> Result<ElementKind, VmError> {
    let mirror = non_null(mirror, "array class")?;
    let name = mirror
        .as_instance()?
        .mirror_of()
        .ok_or_else(|| VmError::illegal("array class argument mirrors nothing"))?;
    match name.strip_prefix('[') {
        Some(component) => ElementKind::of_component(component),
        None => Err(VmError::illegal(format!("{} is not an array class", name))),
    }
}

fn array_base_offset(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    mirrored_element(stack.pop_ref()?)?;
    stack.pop_ref()?;
    stack.push_int(0);
    Ok(())
}

fn array_index_scale(_vm: &Vm, stack: &mut OperandStack) -> Result<(), VmError> {
    let element = mirrored_element(stack.pop_ref()?)?;
    stack.pop_ref()?;
    stack.push_int(element.width());
    Ok(())
}

/// `String.hashCode` over UTF-16 units.
pub fn string_hash(units: &[u16]) -> i32 {
    units
        .iter()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(*unit as i32))
}

/// Text of a `java/lang/String` instance.
pub fn java_string(object: &Object) -> Result<String, VmError> {
    let instance = object.as_instance()?;
    let value = instance
        .find_field_named("value")
        .ok_or_else(|| VmError::illegal(format!("{} is not a string", instance.class().name)))?
        .get()
        .typed::<Reference>()?;
    let value = match value {
        Some(value) => value,
        None => return Ok(String::new()),
    };
    let coder = instance
        .find_field("coder", "B")
        .and_then(|field| field.get().typed::<i32>())
        .unwrap_or(LATIN1);
    Ok(match value.as_array()?.snapshot() {
        ArrayStore::Chars(units) => String::from_utf16_lossy(&units),
        ArrayStore::Bytes(bytes) if coder == UTF16 => {
            let units: Vec<u16> = bytes
                .chunks(2)
                .map(|pair| match pair {
                    [high, low] => u16::from_be_bytes([*high as u8, *low as u8]),
                    [single] => *single as u8 as u16,
                    _ => 0,
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
        ArrayStore::Bytes(bytes) => bytes.iter().map(|b| *b as u8 as char).collect(),
        other => {
            return Err(VmError::illegal(format!(
                "string backed by {:?}",
                other
            )))
        }
    })
}

/// `Throwable.detailMessage` of a thrown object, when it has one.
pub fn detail_message(object: &Object) -> Option<String> {
    let instance = object.as_instance().ok()?;
    let message = instance
        .find_field("detailMessage", "Ljava/lang/String;")
        .ok()?
        .get()
        .typed::<Reference>()
        .ok()??;
    java_string(&message).ok()
}

/// Intercepts `PrintStream.print*` invoked on a null receiver, which is what
/// `System.out` looks like when the runtime library never initialized it.
/// Returns false, leaving the stack untouched, for any other method.
pub fn print_hook(vm: &Vm, method: &Method, stack: &mut OperandStack) -> Result<bool, VmError> {
    if method.class_name() != PRINT_STREAM || (method.name != PRINT && method.name != PRINTLN) {
        return Ok(false);
    }
    let mut text = match method.signature.arguments.as_slice() {
        [] => String::new(),
        [argument] => {
            let value = stack.pop_value(*argument)?;
            format_value(*argument, &method.descriptor, value)?
        }
        _ => return Ok(false),
    };
    stack.pop_ref()?;
    if method.name == PRINTLN {
        text.push('\n');
    }
    vm.write_out(&text)?;
    Ok(true)
}

fn format_value(ty: Type, descriptor: &str, value: Value) -> Result<String, VmError> {
    Ok(match (ty, value) {
        (Type::Boolean, Value::Int(v)) => (v != 0).to_string(),
        (Type::Char, Value::Int(v)) => String::from_utf16_lossy(&[v as u16]),
        (_, Value::Int(v)) => v.to_string(),
        (_, Value::Long(v)) => v.to_string(),
        (_, Value::Float(v)) => java_float(v as f64, v.to_string(), format!("{:e}", v)),
        (_, Value::Double(v)) => java_float(v, v.to_string(), format!("{:e}", v)),
        (_, Value::Ref(None)) => "null".to_string(),
        (_, Value::Ref(Some(object))) => {
            if descriptor.starts_with("([C") {
                match object.as_array()?.snapshot() {
                    ArrayStore::Chars(units) => String::from_utf16_lossy(&units),
                    _ => return Err(VmError::illegal("print(char[]) of a non-char array")),
                }
            } else if object.class_name() == crate::vm::classes::STRING_CLASS {
                java_string(&object)?
            } else {
                format!(
                    "{}@{:x}",
                    object.class_name().replace('/', "."),
                    object.identity_hash()
                )
            }
        }
    })
}

/// `Double.toString` layout over the shortest digits of the value: plain
/// decimal for magnitudes in [1e-3, 1e7) with integral values keeping a `.0`,
/// otherwise `d.dddE<exponent>`.
fn java_float(value: f64, shortest: String, scientific: String) -> String {
    let magnitude = value.abs();
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        if value.fract() == 0.0 {
            format!("{:.1}", value)
        } else {
            shortest
        }
    } else {
        let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
        if mantissa.contains('.') {
            format!("{}E{}", mantissa, exponent)
        } else {
            format!("{}.0E{}", mantissa, exponent)
        }
    }
}
