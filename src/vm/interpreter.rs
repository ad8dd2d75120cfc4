use crate::vm::classes::{ElementKind, Method, Type};
use crate::vm::error::VmError;
use crate::vm::memory::{Object, ObjectRef, Value};
use crate::vm::opcodes::{self, *};
use crate::vm::stack::{JavaStack, OperandStack, Slot, StackFrame};
use crate::vm::vm::Vm;
use log::{error, trace};
use std::cmp::Ordering;
use std::sync::Arc;

/// What an executed instruction asks of the java stack.
pub(super) enum StackModification {
    Nop,
    Call(Arc<Method>),
    Return(Option<Value>),
    Throw(ObjectRef),
}

/// Type moved by a local load or store, from the opcode's position in its
/// i, l, f, d, a group.
fn local_type(position: u8) -> Type {
    match position {
        0 => Type::Int,
        1 => Type::Long,
        2 => Type::Float,
        3 => Type::Double,
        _ => Type::Reference,
    }
}

/// Executes bytecode on one java stack. Each host call into the VM (a main
/// method, a static initializer, `Vm::invoke_static`) runs on its own
/// interpreter.
pub struct Interpreter<'a> {
    pub(super) vm: &'a Vm,
    pub(super) stack: JavaStack,
    pub(super) result: Option<Value>,
}

impl<'a> Interpreter<'a> {
    pub fn new(vm: &'a Vm) -> Self {
        Interpreter {
            vm,
            stack: JavaStack::new(vm.config().max_stack_depth),
            result: None,
        }
    }

    /// Runs `method` to completion. `args` include the receiver for
    /// instance methods.
    pub fn invoke(&mut self, method: Arc<Method>, args: &[Value]) -> Result<Option<Value>, VmError> {
        let mut operands = OperandStack::default();
        args.iter().for_each(|arg| operands.push_value(arg.clone()));
        if operands.len() != method.arg_slots() {
            return Err(VmError::illegal(format!(
                "{} takes {} argument slots, got {}",
                method,
                method.arg_slots(),
                operands.len()
            )));
        }

        if method.is_native() {
            self.vm.natives().invoke(self.vm, &method, &mut operands)?;
            return match method.signature.return_type {
                Type::Void => Ok(None),
                ty => Ok(Some(operands.pop_value(ty)?)),
            };
        }
        if method.is_abstract() {
            return Err(VmError::illegal(format!("{} is abstract", method)));
        }

        let base = self.stack.depth();
        let count = operands.len();
        self.push_frame(method, operands.pop_slots(count)?)?;
        self.run(base)?;
        Ok(self.result.take())
    }

    pub(super) fn push_frame(&mut self, method: Arc<Method>, args: Vec<Slot>) -> Result<(), VmError> {
        let class = method.class()?;
        let pool = self
            .vm
            .method_area()
            .lookup_constant_pool(&class.name)
            .ok_or_else(|| VmError::illegal(format!("no constant pool for {}", class.name)))?;
        self.stack
            .push_frame(StackFrame::new(method, class, pool, args))
    }

    fn run(&mut self, base: usize) -> Result<(), VmError> {
        while self.stack.depth() > base {
            let outcome = self
                .step()
                .and_then(|modification| self.apply(modification, base));
            if let Err(err) = outcome {
                error!("{}", err);
                for frame in self.stack.frames().take(self.stack.depth() - base) {
                    error!("    at {} (pc {})", frame.method, frame.op_pc);
                }
                while self.stack.depth() > base {
                    self.stack.pop_frame();
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply(&mut self, modification: StackModification, base: usize) -> Result<(), VmError> {
        match modification {
            StackModification::Nop => Ok(()),
            StackModification::Call(method) => self.dispatch(method),
            StackModification::Return(value) => self.do_return(value, base),
            StackModification::Throw(exception) => self.athrow(exception, base),
        }
    }

    fn step(&mut self) -> Result<StackModification, VmError> {
        let vm = self.vm;
        let frame = self.stack.current()?;
        let opcode = frame.fetch()?;
        trace!(
            "{} [{}] {}",
            frame.method,
            frame.op_pc,
            opcodes::mnemonic(opcode)
        );

        match opcode {
            NOP => {}
            ACONST_NULL => frame.stack.push_ref(None),
            ICONST_M1..=ICONST_5 => frame.stack.push_int(opcode as i32 - ICONST_0 as i32),
            LCONST_0 | LCONST_1 => frame.stack.push_long((opcode - LCONST_0) as i64),
            FCONST_0..=FCONST_2 => frame.stack.push_float((opcode - FCONST_0) as f32),
            DCONST_0 | DCONST_1 => frame.stack.push_double((opcode - DCONST_0) as f64),
            BIPUSH => {
                let value = frame.read_i8()?;
                frame.stack.push_int(value as i32)
            }
            SIPUSH => {
                let value = frame.read_i16()?;
                frame.stack.push_int(value as i32)
            }
            LDC => {
                let index = frame.read_u8()? as u16;
                let value = frame.pool.literal(vm, index)?;
                frame.stack.push_value(value)
            }
            LDC_W | LDC2_W => {
                let index = frame.read_u16()?;
                let value = frame.pool.literal(vm, index)?;
                frame.stack.push_value(value)
            }

            ILOAD..=ALOAD => {
                let index = frame.read_u8()? as usize;
                Self::load_local(frame, index, local_type(opcode - ILOAD))?
            }
            ILOAD_0..=ALOAD_3 => {
                let n = opcode - ILOAD_0;
                Self::load_local(frame, (n % 4) as usize, local_type(n / 4))?
            }

            IALOAD | LALOAD | FALOAD | DALOAD | AALOAD | BALOAD | CALOAD | SALOAD => {
                let index = frame.stack.pop_int()?;
                let array = Self::pop_non_null(&mut frame.stack, "array load")?;
                let value = array.as_array()?.load(index)?;
                frame.stack.push_value(value)
            }

            ISTORE..=ASTORE => {
                let index = frame.read_u8()? as usize;
                Self::store_local(frame, index, local_type(opcode - ISTORE))?
            }
            ISTORE_0..=ASTORE_3 => {
                let n = opcode - ISTORE_0;
                Self::store_local(frame, (n % 4) as usize, local_type(n / 4))?
            }

            IASTORE | LASTORE | FASTORE | DASTORE | AASTORE | BASTORE | CASTORE | SASTORE => {
                let value = match opcode {
                    LASTORE => Value::Long(frame.stack.pop_long()?),
                    FASTORE => Value::Float(frame.stack.pop_float()?),
                    DASTORE => Value::Double(frame.stack.pop_double()?),
                    AASTORE => Value::Ref(frame.stack.pop_ref()?),
                    _ => Value::Int(frame.stack.pop_int()?),
                };
                let index = frame.stack.pop_int()?;
                let array = Self::pop_non_null(&mut frame.stack, "array store")?;
                array.as_array()?.store(index, value)?
            }

            POP => {
                frame.stack.pop()?;
            }
            POP2 => {
                frame.stack.pop_slots(2)?;
            }
            DUP => frame.stack.dup()?,
            DUP_X1 => frame.stack.dup_x1()?,
            DUP_X2 => frame.stack.dup_x2()?,
            DUP2 => frame.stack.dup2()?,
            DUP2_X1 => frame.stack.dup2_x1()?,
            DUP2_X2 => frame.stack.dup2_x2()?,
            SWAP => frame.stack.swap()?,

            IADD => Self::int_op(frame, |a, b| Ok(a.wrapping_add(b)))?,
            ISUB => Self::int_op(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            IMUL => Self::int_op(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            IDIV => Self::int_op(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticFault("/ by zero".to_string()));
                }
                Ok(a.wrapping_div(b))
            })?,
            IREM => Self::int_op(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticFault("% by zero".to_string()));
                }
                Ok(a.wrapping_rem(b))
            })?,
            ISHL => Self::int_op(frame, |a, b| Ok(a << (b & 0x1f)))?,
            ISHR => Self::int_op(frame, |a, b| Ok(a >> (b & 0x1f)))?,
            IUSHR => Self::int_op(frame, |a, b| Ok(((a as u32) >> (b & 0x1f)) as i32))?,
            IAND => Self::int_op(frame, |a, b| Ok(a & b))?,
            IOR => Self::int_op(frame, |a, b| Ok(a | b))?,
            IXOR => Self::int_op(frame, |a, b| Ok(a ^ b))?,
            INEG => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_int(value.wrapping_neg())
            }

            LADD => Self::long_op(frame, |a, b| Ok(a.wrapping_add(b)))?,
            LSUB => Self::long_op(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            LMUL => Self::long_op(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            LDIV => Self::long_op(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticFault("/ by zero".to_string()));
                }
                Ok(a.wrapping_div(b))
            })?,
            LREM => Self::long_op(frame, |a, b| {
                if b == 0 {
                    return Err(VmError::ArithmeticFault("% by zero".to_string()));
                }
                Ok(a.wrapping_rem(b))
            })?,
            LAND => Self::long_op(frame, |a, b| Ok(a & b))?,
            LOR => Self::long_op(frame, |a, b| Ok(a | b))?,
            LXOR => Self::long_op(frame, |a, b| Ok(a ^ b))?,
            LSHL | LSHR | LUSHR => {
                let shift = frame.stack.pop_int()? & 0x3f;
                let value = frame.stack.pop_long()?;
                frame.stack.push_long(match opcode {
                    LSHL => value << shift,
                    LSHR => value >> shift,
                    _ => ((value as u64) >> shift) as i64,
                })
            }
            LNEG => {
                let value = frame.stack.pop_long()?;
                frame.stack.push_long(value.wrapping_neg())
            }

            FADD => Self::float_op(frame, |a, b| a + b)?,
            FSUB => Self::float_op(frame, |a, b| a - b)?,
            FMUL => Self::float_op(frame, |a, b| a * b)?,
            FDIV => Self::float_op(frame, |a, b| a / b)?,
            FREM => Self::float_op(frame, |a, b| a % b)?,
            FNEG => {
                let value = frame.stack.pop_float()?;
                frame.stack.push_float(-value)
            }
            DADD => Self::double_op(frame, |a, b| a + b)?,
            DSUB => Self::double_op(frame, |a, b| a - b)?,
            DMUL => Self::double_op(frame, |a, b| a * b)?,
            DDIV => Self::double_op(frame, |a, b| a / b)?,
            DREM => Self::double_op(frame, |a, b| a % b)?,
            DNEG => {
                let value = frame.stack.pop_double()?;
                frame.stack.push_double(-value)
            }

            IINC => {
                let index = frame.read_u8()? as usize;
                let delta = frame.read_i8()? as i32;
                Self::iinc(frame, index, delta)?
            }

            I2L => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_long(value as i64)
            }
            I2F => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_float(value as f32)
            }
            I2D => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_double(value as f64)
            }
            L2I => {
                let value = frame.stack.pop_long()?;
                frame.stack.push_int(value as i32)
            }
            L2F => {
                let value = frame.stack.pop_long()?;
                frame.stack.push_float(value as f32)
            }
            L2D => {
                let value = frame.stack.pop_long()?;
                frame.stack.push_double(value as f64)
            }
            // float to integer `as` casts saturate and map NaN to zero
            F2I => {
                let value = frame.stack.pop_float()?;
                frame.stack.push_int(value as i32)
            }
            F2L => {
                let value = frame.stack.pop_float()?;
                frame.stack.push_long(value as i64)
            }
            F2D => {
                let value = frame.stack.pop_float()?;
                frame.stack.push_double(value as f64)
            }
            D2I => {
                let value = frame.stack.pop_double()?;
                frame.stack.push_int(value as i32)
            }
            D2L => {
                let value = frame.stack.pop_double()?;
                frame.stack.push_long(value as i64)
            }
            D2F => {
                let value = frame.stack.pop_double()?;
                frame.stack.push_float(value as f32)
            }
            I2B => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_int(value as i8 as i32)
            }
            I2C => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_int(value as u16 as i32)
            }
            I2S => {
                let value = frame.stack.pop_int()?;
                frame.stack.push_int(value as i16 as i32)
            }

            LCMP => {
                let b = frame.stack.pop_long()?;
                let a = frame.stack.pop_long()?;
                frame.stack.push_int(a.cmp(&b) as i32)
            }
            FCMPL | FCMPG => {
                let b = frame.stack.pop_float()?;
                let a = frame.stack.pop_float()?;
                let nan = if opcode == FCMPL { -1 } else { 1 };
                frame.stack.push_int(Self::compare(a.partial_cmp(&b), nan))
            }
            DCMPL | DCMPG => {
                let b = frame.stack.pop_double()?;
                let a = frame.stack.pop_double()?;
                let nan = if opcode == DCMPL { -1 } else { 1 };
                frame.stack.push_int(Self::compare(a.partial_cmp(&b), nan))
            }

            IFEQ..=IFLE => {
                let offset = frame.read_i16()? as i32;
                let value = frame.stack.pop_int()?;
                if Self::holds(opcode - IFEQ, value.cmp(&0)) {
                    frame.jump(offset)?
                }
            }
            IF_ICMPEQ..=IF_ICMPLE => {
                let offset = frame.read_i16()? as i32;
                let b = frame.stack.pop_int()?;
                let a = frame.stack.pop_int()?;
                if Self::holds(opcode - IF_ICMPEQ, a.cmp(&b)) {
                    frame.jump(offset)?
                }
            }
            IF_ACMPEQ | IF_ACMPNE => {
                let offset = frame.read_i16()? as i32;
                let b = frame.stack.pop_ref()?;
                let a = frame.stack.pop_ref()?;
                if (a == b) == (opcode == IF_ACMPEQ) {
                    frame.jump(offset)?
                }
            }
            IFNULL | IFNONNULL => {
                let offset = frame.read_i16()? as i32;
                let value = frame.stack.pop_ref()?;
                if value.is_none() == (opcode == IFNULL) {
                    frame.jump(offset)?
                }
            }
            GOTO => {
                let offset = frame.read_i16()? as i32;
                frame.jump(offset)?
            }
            GOTO_W => {
                let offset = frame.read_i32()?;
                frame.jump(offset)?
            }
            TABLESWITCH => {
                frame.align();
                let default = frame.read_i32()?;
                let low = frame.read_i32()?;
                let high = frame.read_i32()?;
                let offsets = (low..=high)
                    .map(|_| frame.read_i32())
                    .collect::<Result<Vec<_>, _>>()?;
                let index = frame.stack.pop_int()?;
                let offset = if index < low || index > high {
                    default
                } else {
                    offsets[(index as i64 - low as i64) as usize]
                };
                frame.jump(offset)?
            }
            LOOKUPSWITCH => {
                frame.align();
                let default = frame.read_i32()?;
                let pairs = frame.read_i32()?;
                if pairs < 0 {
                    return Err(VmError::malformed(format!(
                        "lookupswitch with {} pairs in {}",
                        pairs, frame.method
                    )));
                }
                let key = frame.stack.pop_int()?;
                let mut offset = default;
                for _ in 0..pairs {
                    let candidate = frame.read_i32()?;
                    let target = frame.read_i32()?;
                    if candidate == key {
                        offset = target;
                    }
                }
                frame.jump(offset)?
            }

            IRETURN => return Ok(StackModification::Return(Some(Value::Int(frame.stack.pop_int()?)))),
            LRETURN => return Ok(StackModification::Return(Some(Value::Long(frame.stack.pop_long()?)))),
            FRETURN => return Ok(StackModification::Return(Some(Value::Float(frame.stack.pop_float()?)))),
            DRETURN => return Ok(StackModification::Return(Some(Value::Double(frame.stack.pop_double()?)))),
            ARETURN => return Ok(StackModification::Return(Some(Value::Ref(frame.stack.pop_ref()?)))),
            RETURN => return Ok(StackModification::Return(None)),

            GETSTATIC => {
                let index = frame.read_u16()?;
                let pool = Arc::clone(&frame.pool);
                let (class, member) = pool.resolve_field(vm, index)?;
                let value = class.find_field(member.name, member.descriptor)?.get();
                frame.stack.push_value(value)
            }
            PUTSTATIC => {
                let index = frame.read_u16()?;
                let pool = Arc::clone(&frame.pool);
                let (class, member) = pool.resolve_field(vm, index)?;
                let field = class.find_field(member.name, member.descriptor)?;
                let value = frame.stack.pop_value(field.value_type)?;
                field.set(value)
            }
            GETFIELD => {
                let index = frame.read_u16()?;
                let pool = Arc::clone(&frame.pool);
                let member = pool.member_ref(index)?;
                let object = Self::pop_non_null(&mut frame.stack, "getfield receiver")?;
                let instance = object.as_instance()?;
                let value = instance
                    .level_of(member.class_name)
                    .unwrap_or(instance)
                    .find_field(member.name, member.descriptor)?
                    .get();
                frame.stack.push_value(value)
            }
            PUTFIELD => {
                let index = frame.read_u16()?;
                let pool = Arc::clone(&frame.pool);
                let member = pool.member_ref(index)?;
                let value = frame.stack.pop_value(Type::of_field(member.descriptor)?)?;
                let object = Self::pop_non_null(&mut frame.stack, "putfield receiver")?;
                let instance = object.as_instance()?;
                instance
                    .level_of(member.class_name)
                    .unwrap_or(instance)
                    .find_field(member.name, member.descriptor)?
                    .set(value)
            }

            INVOKEVIRTUAL => return Self::invoke_virtual(vm, frame),
            INVOKESPECIAL => return Self::invoke_special(vm, frame),
            INVOKESTATIC => return Self::invoke_static(vm, frame),
            INVOKEINTERFACE => return Self::invoke_interface(vm, frame),

            NEW => {
                let index = frame.read_u16()?;
                let class = frame.pool.resolve_class(vm, index)?;
                if class.is_interface() || class.is_abstract() {
                    return Err(VmError::illegal(format!(
                        "cannot instantiate abstract type {}",
                        class.name
                    )));
                }
                frame.stack.push_ref(Some(vm.new_object(&class)))
            }
            NEWARRAY => {
                let element = ElementKind::of_atype(frame.read_u8()?)?;
                let count = frame.stack.pop_int()?;
                let array = vm.new_array(&format!("[{}", element.descriptor()), count)?;
                frame.stack.push_ref(Some(array))
            }
            ANEWARRAY => {
                let index = frame.read_u16()?;
                let component = frame.pool.class_ref_name(index)?.to_string();
                let name = if component.starts_with('[') {
                    format!("[{}", component)
                } else {
                    vm.load_class(&component)?;
                    format!("[L{};", component)
                };
                let count = frame.stack.pop_int()?;
                frame.stack.push_ref(Some(vm.new_array(&name, count)?))
            }
            MULTIANEWARRAY => {
                let index = frame.read_u16()?;
                let dimensions = frame.read_u8()? as usize;
                let name = frame.pool.class_ref_name(index)?.to_string();
                if dimensions == 0 || name.bytes().take_while(|b| *b == b'[').count() < dimensions {
                    return Err(VmError::malformed(format!(
                        "multianewarray of {} with {} dimensions",
                        name, dimensions
                    )));
                }
                let mut counts = vec![0; dimensions];
                for count in counts.iter_mut().rev() {
                    *count = frame.stack.pop_int()?;
                }
                let array = vm.new_multi_array(&name, &counts)?;
                frame.stack.push_ref(Some(array))
            }
            ARRAYLENGTH => {
                let array = Self::pop_non_null(&mut frame.stack, "arraylength")?;
                let length = array.as_array()?.len();
                frame.stack.push_int(length as i32)
            }

            ATHROW => {
                let exception = Self::pop_non_null(&mut frame.stack, "athrow")?;
                return Ok(StackModification::Throw(exception));
            }

            CHECKCAST => {
                let index = frame.read_u16()?;
                let target = frame.pool.class_ref_name(index)?.to_string();
                let reference = frame.stack.pop_ref()?;
                if let Some(object) = &reference {
                    if !Self::is_instance_of(vm, object, &target)? {
                        return Err(VmError::ClassCast {
                            from: object.class_name().to_string(),
                            to: target,
                        });
                    }
                }
                frame.stack.push_ref(reference)
            }
            INSTANCEOF => {
                let index = frame.read_u16()?;
                let target = frame.pool.class_ref_name(index)?.to_string();
                let result = match frame.stack.pop_ref()? {
                    Some(object) => Self::is_instance_of(vm, &object, &target)?,
                    None => false,
                };
                frame.stack.push_int(result as i32)
            }

            WIDE => {
                let modified = frame.read_u8()?;
                let index = frame.read_u16()? as usize;
                match modified {
                    ILOAD..=ALOAD => Self::load_local(frame, index, local_type(modified - ILOAD))?,
                    ISTORE..=ASTORE => Self::store_local(frame, index, local_type(modified - ISTORE))?,
                    IINC => {
                        let delta = frame.read_i16()? as i32;
                        Self::iinc(frame, index, delta)?
                    }
                    _ => {
                        return Err(VmError::UnsupportedInstruction {
                            opcode: modified,
                            mnemonic: opcodes::mnemonic(modified),
                        })
                    }
                }
            }

            // monitors, subroutines, invokedynamic and reserved codes
            _ => {
                return Err(VmError::UnsupportedInstruction {
                    opcode,
                    mnemonic: opcodes::mnemonic(opcode),
                })
            }
        }
        Ok(StackModification::Nop)
    }

    fn load_local(frame: &mut StackFrame, index: usize, ty: Type) -> Result<(), VmError> {
        let (locals, stack) = (&frame.locals, &mut frame.stack);
        match ty {
            Type::Long => stack.push_long(locals.get_long(index)?),
            Type::Float => stack.push_float(locals.get_float(index)?),
            Type::Double => stack.push_double(locals.get_double(index)?),
            Type::Reference => stack.push_ref(locals.get_ref(index)?),
            _ => stack.push_int(locals.get_int(index)?),
        }
        Ok(())
    }

    fn store_local(frame: &mut StackFrame, index: usize, ty: Type) -> Result<(), VmError> {
        let (locals, stack) = (&mut frame.locals, &mut frame.stack);
        match ty {
            Type::Long => locals.set_long(index, stack.pop_long()?),
            Type::Float => locals.set_float(index, stack.pop_float()?),
            Type::Double => locals.set_double(index, stack.pop_double()?),
            Type::Reference => locals.set_ref(index, stack.pop_ref()?),
            _ => locals.set_int(index, stack.pop_int()?),
        }
    }

    fn iinc(frame: &mut StackFrame, index: usize, delta: i32) -> Result<(), VmError> {
        let value = frame.locals.get_int(index)?;
        frame.locals.set_int(index, value.wrapping_add(delta))
    }

    fn pop_non_null(stack: &mut OperandStack, what: &str) -> Result<ObjectRef, VmError> {
        stack
            .pop_ref()?
            .ok_or_else(|| VmError::NullReference(what.to_string()))
    }

    fn int_op<F>(frame: &mut StackFrame, op: F) -> Result<(), VmError>
    where
        F: Fn(i32, i32) -> Result<i32, VmError>,
    {
        let b = frame.stack.pop_int()?;
        let a = frame.stack.pop_int()?;
        frame.stack.push_int(op(a, b)?);
        Ok(())
    }

    fn long_op<F>(frame: &mut StackFrame, op: F) -> Result<(), VmError>
    where
        F: Fn(i64, i64) -> Result<i64, VmError>,
    {
        let b = frame.stack.pop_long()?;
        let a = frame.stack.pop_long()?;
        frame.stack.push_long(op(a, b)?);
        Ok(())
    }

    fn float_op<F: Fn(f32, f32) -> f32>(frame: &mut StackFrame, op: F) -> Result<(), VmError> {
        let b = frame.stack.pop_float()?;
        let a = frame.stack.pop_float()?;
        frame.stack.push_float(op(a, b));
        Ok(())
    }

    fn double_op<F: Fn(f64, f64) -> f64>(frame: &mut StackFrame, op: F) -> Result<(), VmError> {
        let b = frame.stack.pop_double()?;
        let a = frame.stack.pop_double()?;
        frame.stack.push_double(op(a, b));
        Ok(())
    }

    /// `None` means one operand was NaN.
    fn compare(ordering: Option<Ordering>, nan: i32) -> i32 {
        ordering.map_or(nan, |o| o as i32)
    }

    /// Condition `n` of the eq, ne, lt, ge, gt, le family.
    fn holds(condition: u8, ordering: Ordering) -> bool {
        match condition {
            0 => ordering == Ordering::Equal,
            1 => ordering != Ordering::Equal,
            2 => ordering == Ordering::Less,
            3 => ordering != Ordering::Less,
            4 => ordering == Ordering::Greater,
            _ => ordering != Ordering::Greater,
        }
    }

    /// Whether `object` may be viewed as `target` (a class name or array descriptor).
    pub(super) fn is_instance_of(vm: &Vm, object: &Object, target: &str) -> Result<bool, VmError> {
        match object {
            Object::Array(array) => Ok(array.class().look_like(target, vm.method_area())),
            Object::Instance(_) if target.starts_with('[') => Ok(false),
            Object::Instance(instance) => {
                let target = vm.load_class(target)?;
                Ok(instance.class().look_like(&target))
            }
        }
    }
}
