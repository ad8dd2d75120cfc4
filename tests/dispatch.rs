mod common;

use common::*;
use javelin::vm::memory::Value;
use javelin::vm::opcodes::*;
use javelin::VmError;

const STATIC: u16 = ACC_PUBLIC | ACC_STATIC;

/// Class `name` extending `parent` whose `m()I` returns `result`.
fn returning(name: &str, parent: &str, result: u8) -> ClassBuilder {
    ClassBuilder::new(name, Some(parent))
        .default_constructor(parent)
        .method(ACC_PUBLIC, "m", "()I", 1, 1, vec![BIPUSH, result, IRETURN])
}

/// `new <class>; dup; invokespecial <init>` prologue.
fn construct(builder: &mut ClassBuilder, class: &str) -> Vec<u8> {
    let class_ref = builder.class_ref(class);
    let init = builder.method_ref(class, "<init>", "()V");
    [vec![NEW], be(class_ref), vec![DUP, INVOKESPECIAL], be(init)].concat()
}

fn hierarchy() -> Vec<(String, Vec<u8>)> {
    let a = returning("A", OBJECT, 1).finish();
    let mut b = returning("B", "A", 2);
    let super_m = b.method_ref("A", "m", "()I");
    let via_super = [vec![ALOAD_0, INVOKESPECIAL], be(super_m), vec![IRETURN]].concat();
    let b = b.method(ACC_PUBLIC, "viaSuper", "()I", 1, 1, via_super).finish();
    let c = returning("C", "B", 3).finish();
    vec![a, b, c]
}

#[test]
fn late_bound_call_selects_the_receivers_override() {
    let mut main = ClassBuilder::class("Main");
    let a_m = main.method_ref("A", "m", "()I");
    let code = [construct(&mut main, "C"), vec![INVOKEVIRTUAL], be(a_m), vec![IRETURN]].concat();
    let main = main.method(STATIC, "run", "()I", 2, 0, code).finish();
    let mut classes = hierarchy();
    classes.push(main);
    let vm = vm_with(classes);

    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(3)));
}

#[test]
fn privileged_call_binds_to_the_superclass() {
    let mut main = ClassBuilder::class("Main");
    let via_super = main.method_ref("B", "viaSuper", "()I");
    let code = [construct(&mut main, "C"), vec![INVOKEVIRTUAL], be(via_super), vec![IRETURN]].concat();
    let main = main.method(STATIC, "run", "()I", 2, 0, code).finish();
    let mut classes = hierarchy();
    classes.push(main);
    let vm = vm_with(classes);

    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn private_methods_are_not_overridden() {
    let mut base = ClassBuilder::class("Base").default_constructor(OBJECT);
    let secret = base.method_ref("Base", "secret", "()I");
    let call = [vec![ALOAD_0, INVOKEVIRTUAL], be(secret), vec![IRETURN]].concat();
    let base = base
        .method(ACC_PRIVATE, "secret", "()I", 1, 1, vec![ICONST_1, IRETURN])
        .method(ACC_PUBLIC, "call", "()I", 1, 1, call)
        .finish();
    let derived = ClassBuilder::new("Derived", Some("Base"))
        .default_constructor("Base")
        .method(ACC_PUBLIC, "secret", "()I", 1, 1, vec![ICONST_2, IRETURN])
        .finish();
    let mut main = ClassBuilder::class("Main");
    let call = main.method_ref("Base", "call", "()I");
    let code = [construct(&mut main, "Derived"), vec![INVOKEVIRTUAL], be(call), vec![IRETURN]].concat();
    let main = main.method(STATIC, "run", "()I", 2, 0, code).finish();
    let vm = vm_with(vec![base, derived, main]);

    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(1)));
}

fn shapes() -> Vec<(String, Vec<u8>)> {
    let shape = ClassBuilder::interface("Shape")
        .bodiless_method(ACC_PUBLIC | ACC_ABSTRACT, "area", "()I")
        .finish();
    let square = ClassBuilder::class("Square")
        .implements("Shape")
        .default_constructor(OBJECT)
        .method(ACC_PUBLIC, "area", "()I", 1, 1, vec![ICONST_4, IRETURN])
        .finish();
    let tiny = ClassBuilder::new("Tiny", Some("Square"))
        .default_constructor("Square")
        .method(ACC_PUBLIC, "area", "()I", 1, 1, vec![ICONST_1, IRETURN])
        .finish();
    let blob = ClassBuilder::class("Blob")
        .default_constructor(OBJECT)
        .method(ACC_PUBLIC, "area", "()I", 1, 1, vec![BIPUSH, 9, IRETURN])
        .finish();
    vec![shape, square, tiny, blob]
}

fn interface_caller(receiver: &str) -> (String, Vec<u8>) {
    let mut main = ClassBuilder::class("Main");
    let area = main.interface_method_ref("Shape", "area", "()I");
    let code = [
        construct(&mut main, receiver),
        vec![INVOKEINTERFACE],
        be(area),
        vec![1, 0, IRETURN],
    ]
    .concat();
    main.method(STATIC, "run", "()I", 2, 0, code).finish()
}

#[test]
fn interface_call_dispatches_on_the_implementation() {
    let mut classes = shapes();
    classes.push(interface_caller("Tiny"));
    let vm = vm_with(classes);

    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn interface_call_on_a_non_implementing_receiver_faults() {
    let mut classes = shapes();
    classes.push(interface_caller("Blob"));
    let vm = vm_with(classes);

    let err = vm.invoke_static("Main", "run", "()I", &[]).unwrap_err();
    assert!(matches!(err, VmError::IllegalState(message) if message.contains("does not implement")));
}

#[test]
fn instanceof_and_checkcast_follow_the_hierarchy() {
    let mut main = ClassBuilder::class("Main");
    let shape = main.class_ref("Shape");
    let blob = main.class_ref("Blob");
    let is_shape = [construct(&mut main, "Tiny"), vec![INSTANCEOF], be(shape), vec![IRETURN]].concat();
    let null_is_shape = [vec![ACONST_NULL, INSTANCEOF], be(shape), vec![IRETURN]].concat();
    let bad_cast = [construct(&mut main, "Square"), vec![CHECKCAST], be(blob), vec![ARETURN]].concat();
    let null_cast = [vec![ACONST_NULL, CHECKCAST], be(blob), vec![ARETURN]].concat();
    let main = main
        .method(STATIC, "isShape", "()I", 2, 0, is_shape)
        .method(STATIC, "nullIsShape", "()I", 1, 0, null_is_shape)
        .method(STATIC, "badCast", "()Ljava/lang/Object;", 2, 0, bad_cast)
        .method(STATIC, "nullCast", "()Ljava/lang/Object;", 1, 0, null_cast)
        .finish();
    let mut classes = shapes();
    classes.push(main);
    let vm = vm_with(classes);

    assert_eq!(vm.invoke_static("Main", "isShape", "()I", &[]).unwrap(), Some(Value::Int(1)));
    assert_eq!(vm.invoke_static("Main", "nullIsShape", "()I", &[]).unwrap(), Some(Value::Int(0)));
    assert!(matches!(
        vm.invoke_static("Main", "badCast", "()Ljava/lang/Object;", &[]),
        Err(VmError::ClassCast { from, to }) if from == "Square" && to == "Blob"
    ));
    assert_eq!(
        vm.invoke_static("Main", "nullCast", "()Ljava/lang/Object;", &[]).unwrap(),
        Some(Value::null())
    );
}

#[test]
fn abstract_targets_fault() {
    let base = ClassBuilder::class("Abstract")
        .flags(ACC_PUBLIC | ACC_SUPER | ACC_ABSTRACT)
        .default_constructor(OBJECT)
        .bodiless_method(ACC_PUBLIC | ACC_ABSTRACT, "m", "()I")
        .finish();
    let concrete = ClassBuilder::new("Incomplete", Some("Abstract"))
        .default_constructor("Abstract")
        .finish();
    let mut main = ClassBuilder::class("Main");
    let m = main.method_ref("Abstract", "m", "()I");
    let abstract_ref = main.class_ref("Abstract");
    let call = [construct(&mut main, "Incomplete"), vec![INVOKEVIRTUAL], be(m), vec![IRETURN]].concat();
    let instantiate = [vec![NEW], be(abstract_ref), vec![ARETURN]].concat();
    let main = main
        .method(STATIC, "call", "()I", 2, 0, call)
        .method(STATIC, "instantiate", "()Ljava/lang/Object;", 1, 0, instantiate)
        .finish();
    let vm = vm_with(vec![base, concrete, main]);

    assert!(matches!(
        vm.invoke_static("Main", "call", "()I", &[]),
        Err(VmError::IllegalState(_))
    ));
    assert!(matches!(
        vm.invoke_static("Main", "instantiate", "()Ljava/lang/Object;", &[]),
        Err(VmError::IllegalState(_))
    ));
}

#[test]
fn static_dispatch_on_an_instance_method_faults() {
    let mut main = ClassBuilder::class("Main");
    let m = main.method_ref("A", "m", "()I");
    let code = [vec![INVOKESTATIC], be(m), vec![IRETURN]].concat();
    let main = main.method(STATIC, "run", "()I", 1, 0, code).finish();
    let mut classes = hierarchy();
    classes.push(main);
    let vm = vm_with(classes);

    assert!(matches!(
        vm.invoke_static("Main", "run", "()I", &[]),
        Err(VmError::IllegalState(message)) if message.contains("invokestatic")
    ));
}

#[test]
fn missing_method_is_unresolved() {
    let mut main = ClassBuilder::class("Main");
    let missing = main.method_ref("A", "nothing", "()V");
    let code = [vec![INVOKESTATIC], be(missing), vec![RETURN]].concat();
    let main = main.method(STATIC, "run", "()V", 0, 0, code).finish();
    let mut classes = hierarchy();
    classes.push(main);
    let vm = vm_with(classes);

    assert!(matches!(
        vm.invoke_static("Main", "run", "()V", &[]),
        Err(VmError::UnresolvedSymbol(_))
    ));
}

#[test]
fn instance_methods_receive_arguments_in_order() {
    let calc = ClassBuilder::class("Calc")
        .default_constructor(OBJECT)
        .method(ACC_PUBLIC, "sub", "(IJ)J", 4, 4, vec![ILOAD_1, I2L, LLOAD_2, LSUB, LRETURN])
        .finish();
    let mut main = ClassBuilder::class("Main");
    let sub = main.method_ref("Calc", "sub", "(IJ)J");
    let code = [
        construct(&mut main, "Calc"),
        vec![BIPUSH, 50, LCONST_1, INVOKEVIRTUAL],
        be(sub),
        vec![LRETURN],
    ]
    .concat();
    let main = main.method(STATIC, "run", "()J", 4, 0, code).finish();
    let vm = vm_with(vec![calc, main]);

    assert_eq!(vm.invoke_static("Main", "run", "()J", &[]).unwrap(), Some(Value::Long(49)));
}
