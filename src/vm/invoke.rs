use crate::vm::classes::{AccessFlags, Method, RuntimeClass, CONSTRUCTOR};
use crate::vm::error::VmError;
use crate::vm::interpreter::{Interpreter, StackModification};
use crate::vm::java_lang;
use crate::vm::memory::{Object, ObjectRef, Reference, Value};
use crate::vm::stack::{Slot, StackFrame};
use crate::vm::vm::Vm;
use log::debug;
use std::sync::Arc;

impl<'a> Interpreter<'a> {
    /// `invokestatic`: no receiver, resolved against the named class.
    pub(super) fn invoke_static(vm: &Vm, frame: &mut StackFrame) -> Result<StackModification, VmError> {
        let index = frame.read_u16()?;
        let method = frame.pool.resolve_method(vm, index)?;
        if !method.is_static() {
            return Err(VmError::illegal(format!(
                "invokestatic of instance method {}",
                method
            )));
        }
        Ok(StackModification::Call(method))
    }

    /// `invokespecial`: constructors, private methods and `super` calls.
    pub(super) fn invoke_special(vm: &Vm, frame: &mut StackFrame) -> Result<StackModification, VmError> {
        let index = frame.read_u16()?;
        let pool = Arc::clone(&frame.pool);
        let member = pool.member_ref(index)?;
        let mut method = pool.resolve_method(vm, index)?;

        let referenced = vm.load_class(member.class_name)?;
        let caller = &frame.class;
        if method.name != CONSTRUCTOR
            && caller.has_super_flag()
            && !referenced.is_interface()
            && caller.is_subclass_of(&referenced)
        {
            let parent = caller
                .parent
                .as_ref()
                .ok_or_else(|| VmError::illegal(format!("{} has no superclass", caller.name)))?;
            method = parent
                .find_method(&method.name, &method.descriptor)
                .ok_or_else(|| unresolved(&parent.name, &method))?;
        }
        if method.is_static() {
            return Err(VmError::illegal(format!(
                "invokespecial of static method {}",
                method
            )));
        }
        if method.is_abstract() {
            return Err(VmError::illegal(format!("{} is abstract", method)));
        }
        receiver(frame, &method)?
            .ok_or_else(|| VmError::NullReference(format!("invokespecial {}", method)))?;
        Ok(StackModification::Call(method))
    }

    /// `invokevirtual`: selects the implementation from the receiver's class.
    pub(super) fn invoke_virtual(vm: &Vm, frame: &mut StackFrame) -> Result<StackModification, VmError> {
        let index = frame.read_u16()?;
        let method = frame.pool.resolve_method(vm, index)?;
        if method.is_static() {
            return Err(VmError::illegal(format!(
                "invokevirtual of static method {}",
                method
            )));
        }
        let object = match receiver(frame, &method)? {
            Some(object) => object,
            None if java_lang::print_hook(vm, &method, &mut frame.stack)? => {
                return Ok(StackModification::Nop)
            }
            None => {
                return Err(VmError::NullReference(format!("invokevirtual {}", method)));
            }
        };
        if method.flags.contains(AccessFlags::PRIVATE) {
            return Ok(StackModification::Call(method));
        }
        let selected = select(&receiver_class(&object), &method)?;
        Ok(StackModification::Call(selected))
    }

    /// `invokeinterface`: the receiver must implement the named interface.
    pub(super) fn invoke_interface(vm: &Vm, frame: &mut StackFrame) -> Result<StackModification, VmError> {
        let index = frame.read_u16()?;
        let _count = frame.read_u8()?;
        if frame.read_u8()? != 0 {
            return Err(VmError::malformed(format!(
                "invokeinterface without its zero byte in {}",
                frame.method
            )));
        }
        let pool = Arc::clone(&frame.pool);
        let member = pool.member_ref(index)?;
        let method = pool.resolve_method(vm, index)?;
        let interface = vm.load_class(member.class_name)?;

        let object = receiver(frame, &method)?
            .ok_or_else(|| VmError::NullReference(format!("invokeinterface {}", method)))?;
        let class = receiver_class(&object);
        if !class.implements(&interface) {
            return Err(VmError::illegal(format!(
                "{} does not implement {}",
                class.name, interface.name
            )));
        }
        let selected = select(&class, &method)?;
        Ok(StackModification::Call(selected))
    }

    /// Runs a resolved call: natives through the bridge on the caller's
    /// stack, bytecode methods on a new frame.
    pub(super) fn dispatch(&mut self, method: Arc<Method>) -> Result<(), VmError> {
        let vm = self.vm;
        let caller = self.stack.current()?;
        if method.is_native() {
            return vm.natives().invoke(vm, &method, &mut caller.stack);
        }
        if method.is_abstract() {
            return Err(VmError::illegal(format!("{} is abstract", method)));
        }
        let args = caller.stack.pop_slots(method.arg_slots())?;
        debug!("Call {} with {:?}", method, args);
        self.push_frame(method, args)
    }

    pub(super) fn do_return(&mut self, value: Option<Value>, base: usize) -> Result<(), VmError> {
        let frame = self
            .stack
            .pop_frame()
            .ok_or_else(|| VmError::illegal("return with an empty java stack"))?;
        debug!("Return from {} with {:?}", frame.method, value);
        if self.stack.depth() == base {
            self.result = value;
        } else if let Some(value) = value {
            self.stack.current()?.stack.push_value(value);
        }
        Ok(())
    }

    /// Unwinds frames until one has a handler covering its current
    /// instruction. Leaving the frames this interpreter owns is fatal.
    pub(super) fn athrow(&mut self, exception: ObjectRef, base: usize) -> Result<(), VmError> {
        let vm = self.vm;
        debug!("Throw {:?}", exception);
        while self.stack.depth() > base {
            let frame = self.stack.current()?;
            if let Some(handler) = find_handler(vm, frame, &exception)? {
                debug!("Caught by {} at {}", frame.method, handler);
                frame.stack.clear();
                frame.stack.push_ref(Some(exception));
                frame.pc = handler;
                return Ok(());
            }
            self.stack.pop_frame();
        }
        Err(VmError::UncaughtException {
            class: exception.class_name().replace('/', "."),
            message: java_lang::detail_message(&exception).unwrap_or_default(),
        })
    }
}

/// Receiver of `method`, found below its argument slots.
fn receiver(frame: &StackFrame, method: &Method) -> Result<Reference, VmError> {
    match frame.stack.peek(method.signature.arg_slots())? {
        Slot::Ref(reference) => Ok(reference.clone()),
        Slot::Int(_) => Err(VmError::illegal(format!(
            "receiver of {} is not a reference",
            method
        ))),
    }
}

/// Arrays dispatch through `java/lang/Object`.
fn receiver_class(object: &Object) -> Arc<RuntimeClass> {
    match object {
        Object::Instance(instance) => Arc::clone(instance.class()),
        Object::Array(array) => Arc::clone(&array.class().parent),
    }
}

fn select(class: &RuntimeClass, method: &Method) -> Result<Arc<Method>, VmError> {
    let selected = class
        .find_method(&method.name, &method.descriptor)
        .ok_or_else(|| unresolved(&class.name, method))?;
    if selected.is_abstract() {
        return Err(VmError::illegal(format!(
            "abstract {} invoked on {}",
            selected, class.name
        )));
    }
    Ok(selected)
}

fn unresolved(class_name: &str, method: &Method) -> VmError {
    VmError::UnresolvedSymbol(format!(
        "method {}.{}{}",
        class_name, method.name, method.descriptor
    ))
}

fn find_handler(vm: &Vm, frame: &StackFrame, exception: &Object) -> Result<Option<usize>, VmError> {
    for entry in &frame.method.exception_table {
        if !entry.covers(frame.op_pc) {
            continue;
        }
        if entry.catch_type == 0 {
            return Ok(Some(entry.handler_pc as usize));
        }
        let catch_type = frame.pool.class_ref_name(entry.catch_type)?;
        if Interpreter::is_instance_of(vm, exception, catch_type)? {
            return Ok(Some(entry.handler_pc as usize));
        }
    }
    Ok(None)
}
