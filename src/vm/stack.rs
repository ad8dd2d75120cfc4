use crate::vm::classes::{Method, RuntimeClass, Type};
use crate::vm::constant_pool::RuntimeConstantPool;
use crate::vm::error::VmError;
use crate::vm::memory::{Reference, Value};
use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;

/// One 32-bit operand stack or local variable cell. Floats live here as raw
/// bits; longs and doubles span two cells, high word first.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Int(i32),
    Ref(Reference),
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Int(0)
    }
}

impl Slot {
    fn int(self) -> Result<i32, VmError> {
        match self {
            Slot::Int(value) => Ok(value),
            Slot::Ref(_) => Err(VmError::illegal("expected a primitive slot, found a reference")),
        }
    }

    fn reference(self) -> Result<Reference, VmError> {
        match self {
            Slot::Ref(value) => Ok(value),
            Slot::Int(_) => Err(VmError::illegal("expected a reference slot, found a primitive")),
        }
    }
}

fn split(value: i64) -> (Slot, Slot) {
    (Slot::Int((value >> 32) as i32), Slot::Int(value as i32))
}

fn join(high: i32, low: i32) -> i64 {
    ((high as i64) << 32) | (low as u32 as i64)
}

#[derive(Default, Debug)]
pub struct OperandStack {
    slots: Vec<Slot>,
}

impl OperandStack {
    pub fn with_capacity(max_stack: u16) -> Self {
        OperandStack {
            slots: Vec::with_capacity(max_stack as usize),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn push(&mut self, slot: Slot) {
        self.slots.push(slot);
    }

    pub fn pop(&mut self) -> Result<Slot, VmError> {
        self.slots
            .pop()
            .ok_or_else(|| VmError::illegal("operand stack underflow"))
    }

    /// Slot `depth` positions below the top; 0 is the top.
    pub fn peek(&self, depth: usize) -> Result<&Slot, VmError> {
        if depth >= self.slots.len() {
            return Err(VmError::illegal("operand stack underflow"));
        }
        Ok(&self.slots[self.slots.len() - 1 - depth])
    }

    /// Removes the top `count` slots, returned bottom-most first.
    pub fn pop_slots(&mut self, count: usize) -> Result<Vec<Slot>, VmError> {
        if count > self.slots.len() {
            return Err(VmError::illegal("operand stack underflow"));
        }
        let at = self.slots.len() - count;
        Ok(self.slots.split_off(at))
    }

    pub fn push_int(&mut self, value: i32) {
        self.push(Slot::Int(value));
    }

    pub fn pop_int(&mut self) -> Result<i32, VmError> {
        self.pop()?.int()
    }

    pub fn push_float(&mut self, value: f32) {
        self.push(Slot::Int(value.to_bits() as i32));
    }

    pub fn pop_float(&mut self) -> Result<f32, VmError> {
        Ok(f32::from_bits(self.pop_int()? as u32))
    }

    pub fn push_long(&mut self, value: i64) {
        let (high, low) = split(value);
        self.push(high);
        self.push(low);
    }

    pub fn pop_long(&mut self) -> Result<i64, VmError> {
        let low = self.pop_int()?;
        let high = self.pop_int()?;
        Ok(join(high, low))
    }

    pub fn push_double(&mut self, value: f64) {
        self.push_long(value.to_bits() as i64);
    }

    pub fn pop_double(&mut self) -> Result<f64, VmError> {
        Ok(f64::from_bits(self.pop_long()? as u64))
    }

    pub fn push_ref(&mut self, value: Reference) {
        self.push(Slot::Ref(value));
    }

    pub fn pop_ref(&mut self) -> Result<Reference, VmError> {
        self.pop()?.reference()
    }

    pub fn push_value(&mut self, value: Value) {
        match value {
            Value::Int(i) => self.push_int(i),
            Value::Long(l) => self.push_long(l),
            Value::Float(f) => self.push_float(f),
            Value::Double(d) => self.push_double(d),
            Value::Ref(r) => self.push_ref(r),
        }
    }

    pub fn pop_value(&mut self, value_type: Type) -> Result<Value, VmError> {
        Ok(match value_type {
            Type::Long => Value::Long(self.pop_long()?),
            Type::Float => Value::Float(self.pop_float()?),
            Type::Double => Value::Double(self.pop_double()?),
            Type::Reference => Value::Ref(self.pop_ref()?),
            Type::Void => return Err(VmError::illegal("cannot pop a void value")),
            _ => Value::Int(self.pop_int()?),
        })
    }

    pub fn dup(&mut self) -> Result<(), VmError> {
        let top = self.peek(0)?.clone();
        self.push(top);
        Ok(())
    }

    /// ..., v2, v1 -> ..., v1, v2, v1
    pub fn dup_x1(&mut self) -> Result<(), VmError> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        self.push(v1.clone());
        self.push(v2);
        self.push(v1);
        Ok(())
    }

    /// ..., v3, v2, v1 -> ..., v1, v3, v2, v1
    pub fn dup_x2(&mut self) -> Result<(), VmError> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        let v3 = self.pop()?;
        self.push(v1.clone());
        self.push(v3);
        self.push(v2);
        self.push(v1);
        Ok(())
    }

    /// ..., v2, v1 -> ..., v2, v1, v2, v1
    pub fn dup2(&mut self) -> Result<(), VmError> {
        let v1 = self.peek(0)?.clone();
        let v2 = self.peek(1)?.clone();
        self.push(v2);
        self.push(v1);
        Ok(())
    }

    /// ..., v3, v2, v1 -> ..., v2, v1, v3, v2, v1
    pub fn dup2_x1(&mut self) -> Result<(), VmError> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        let v3 = self.pop()?;
        self.push(v2.clone());
        self.push(v1.clone());
        self.push(v3);
        self.push(v2);
        self.push(v1);
        Ok(())
    }

    /// ..., v4, v3, v2, v1 -> ..., v2, v1, v4, v3, v2, v1
    pub fn dup2_x2(&mut self) -> Result<(), VmError> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        let v3 = self.pop()?;
        let v4 = self.pop()?;
        self.push(v2.clone());
        self.push(v1.clone());
        self.push(v4);
        self.push(v3);
        self.push(v2);
        self.push(v1);
        Ok(())
    }

    pub fn swap(&mut self) -> Result<(), VmError> {
        let v1 = self.pop()?;
        let v2 = self.pop()?;
        self.push(v1);
        self.push(v2);
        Ok(())
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

#[derive(Default, Debug)]
pub struct LocalVariables {
    slots: Vec<Slot>,
}

impl LocalVariables {
    pub fn new(max_locals: usize) -> Self {
        LocalVariables {
            slots: vec![Slot::default(); max_locals],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn out_of_range(&self, index: usize) -> VmError {
        VmError::malformed(format!(
            "local variable {} out of range ({} locals)",
            index,
            self.slots.len()
        ))
    }

    fn get(&self, index: usize) -> Result<&Slot, VmError> {
        self.slots.get(index).ok_or_else(|| self.out_of_range(index))
    }

    fn set(&mut self, index: usize, slot: Slot) -> Result<(), VmError> {
        let len = self.slots.len();
        match self.slots.get_mut(index) {
            Some(cell) => {
                *cell = slot;
                Ok(())
            }
            None => Err(VmError::malformed(format!(
                "local variable {} out of range ({} locals)",
                index, len
            ))),
        }
    }

    pub fn get_int(&self, index: usize) -> Result<i32, VmError> {
        self.get(index)?.clone().int()
    }

    pub fn set_int(&mut self, index: usize, value: i32) -> Result<(), VmError> {
        self.set(index, Slot::Int(value))
    }

    pub fn get_float(&self, index: usize) -> Result<f32, VmError> {
        Ok(f32::from_bits(self.get_int(index)? as u32))
    }

    pub fn set_float(&mut self, index: usize, value: f32) -> Result<(), VmError> {
        self.set_int(index, value.to_bits() as i32)
    }

    pub fn get_long(&self, index: usize) -> Result<i64, VmError> {
        Ok(join(self.get_int(index)?, self.get_int(index + 1)?))
    }

    pub fn set_long(&mut self, index: usize, value: i64) -> Result<(), VmError> {
        let (high, low) = split(value);
        if index + 1 >= self.slots.len() {
            return Err(self.out_of_range(index + 1));
        }
        self.set(index, high)?;
        self.set(index + 1, low)
    }

    pub fn get_double(&self, index: usize) -> Result<f64, VmError> {
        Ok(f64::from_bits(self.get_long(index)? as u64))
    }

    pub fn set_double(&mut self, index: usize, value: f64) -> Result<(), VmError> {
        self.set_long(index, value.to_bits() as i64)
    }

    pub fn get_ref(&self, index: usize) -> Result<Reference, VmError> {
        self.get(index)?.clone().reference()
    }

    pub fn set_ref(&mut self, index: usize, value: Reference) -> Result<(), VmError> {
        self.set(index, Slot::Ref(value))
    }
}

/// Execution state of one method invocation.
pub struct StackFrame {
    pub method: Arc<Method>,
    pub class: Arc<RuntimeClass>,
    pub pool: Arc<RuntimeConstantPool>,
    pub stack: OperandStack,
    pub locals: LocalVariables,
    /// Next byte to decode.
    pub pc: usize,
    /// Address of the instruction being executed.
    pub op_pc: usize,
}

impl StackFrame {
    /// Arguments are copied into locals in order, receiver first.
    pub fn new(
        method: Arc<Method>,
        class: Arc<RuntimeClass>,
        pool: Arc<RuntimeConstantPool>,
        args: Vec<Slot>,
    ) -> Self {
        let mut locals = LocalVariables::new((method.max_locals as usize).max(args.len()));
        for (i, slot) in args.into_iter().enumerate() {
            locals.slots[i] = slot;
        }
        StackFrame {
            stack: OperandStack::with_capacity(method.max_stack),
            locals,
            method,
            class,
            pool,
            pc: 0,
            op_pc: 0,
        }
    }

    fn code(&self, len: usize) -> Result<&[u8], VmError> {
        self.method
            .code
            .get(self.pc..self.pc + len)
            .ok_or_else(|| {
                VmError::malformed(format!("code of {} ends inside an instruction", self.method))
            })
    }

    /// Starts decoding the next instruction.
    pub fn fetch(&mut self) -> Result<u8, VmError> {
        self.op_pc = self.pc;
        self.read_u8()
    }

    pub fn read_u8(&mut self) -> Result<u8, VmError> {
        let byte = self.code(1)?[0];
        self.pc += 1;
        Ok(byte)
    }

    pub fn read_i8(&mut self) -> Result<i8, VmError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, VmError> {
        let value = BigEndian::read_u16(self.code(2)?);
        self.pc += 2;
        Ok(value)
    }

    pub fn read_i16(&mut self) -> Result<i16, VmError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, VmError> {
        let value = BigEndian::read_i32(self.code(4)?);
        self.pc += 4;
        Ok(value)
    }

    /// Skips switch padding up to the next 4-byte boundary of the code.
    pub fn align(&mut self) {
        self.pc = (self.pc + 3) & !3;
    }

    /// Branches relative to the current instruction's address.
    pub fn jump(&mut self, offset: i32) -> Result<(), VmError> {
        let target = self.op_pc as i64 + offset as i64;
        if target < 0 || target as usize >= self.method.code.len() {
            return Err(VmError::malformed(format!(
                "branch from {} by {} leaves the code of {}",
                self.op_pc, offset, self.method
            )));
        }
        self.pc = target as usize;
        Ok(())
    }
}

/// Per-thread call stack; execution only touches the top frame.
pub struct JavaStack {
    frames: Vec<StackFrame>,
    max_depth: usize,
}

impl JavaStack {
    pub fn new(max_depth: usize) -> Self {
        JavaStack {
            frames: Vec::new(),
            max_depth,
        }
    }

    pub fn push_frame(&mut self, frame: StackFrame) -> Result<(), VmError> {
        if self.frames.len() >= self.max_depth {
            return Err(VmError::StackOverflow {
                depth: self.max_depth,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    pub fn current(&mut self) -> Result<&mut StackFrame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::illegal("no frame on the java stack"))
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost frame first.
    pub fn frames(&self) -> impl Iterator<Item = &StackFrame> {
        self.frames.iter().rev()
    }
}
