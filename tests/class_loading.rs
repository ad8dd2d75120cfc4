mod common;

use common::*;
use javelin::vm::class_loader::LoadedClass;
use javelin::vm::classes::ClassState;
use javelin::vm::java_lang::java_string;
use javelin::vm::memory::{Object, Value};
use javelin::vm::opcodes::*;
use javelin::VmError;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const STATIC: u16 = ACC_PUBLIC | ACC_STATIC;
const CONSTANT: u16 = ACC_PUBLIC | ACC_STATIC | ACC_FINAL;

#[test]
fn concurrent_loads_initialize_once() {
    let registry = ClassBuilder::class("Registry")
        .field(STATIC, "inits", "I")
        .finish();
    let mut counter = ClassBuilder::class("Counter");
    let inits = counter.field_ref("Registry", "inits", "I");
    let clinit = [
        vec![GETSTATIC],
        be(inits),
        vec![ICONST_1, IADD, PUTSTATIC],
        be(inits),
        vec![RETURN],
    ]
    .concat();
    let counter = counter.method(STATIC, "<clinit>", "()V", 2, 0, clinit).finish();
    let vm = vm_with(vec![registry, counter]);

    let loaded: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| vm.load_class("Counter").unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(loaded.iter().all(|class| Arc::ptr_eq(class, &loaded[0])));
    assert_eq!(loaded[0].state(), ClassState::Initialized);
    let registry = vm.load_class("Registry").unwrap();
    assert_eq!(registry.find_field("inits", "I").unwrap().get(), Value::Int(1));
}

#[test]
fn static_initializer_sees_its_own_class() {
    let mut builder = ClassBuilder::class("SelfRef")
        .field(STATIC, "value", "I")
        .field(STATIC, "copy", "I");
    let value = builder.field_ref("SelfRef", "value", "I");
    let copy = builder.field_ref("SelfRef", "copy", "I");
    let clinit = [
        vec![BIPUSH, 10, PUTSTATIC],
        be(value),
        vec![GETSTATIC],
        be(value),
        vec![PUTSTATIC],
        be(copy),
        vec![RETURN],
    ]
    .concat();
    let read = [vec![GETSTATIC], be(copy), vec![IRETURN]].concat();
    let class = builder
        .method(STATIC, "<clinit>", "()V", 1, 0, clinit)
        .method(STATIC, "copy", "()I", 1, 0, read)
        .finish();
    let vm = vm_with(vec![class]);

    assert_eq!(vm.invoke_static("SelfRef", "copy", "()I", &[]).unwrap(), Some(Value::Int(10)));
}

/// `Factory.make()` builds a `Product`, whose static initializer calls
/// `Factory.make()` again through the same pool entry.
fn factory_cycle() -> Vec<(String, Vec<u8>)> {
    let mut factory = ClassBuilder::class("Factory");
    let code = [construct(&mut factory, "Product"), vec![ARETURN]].concat();
    let factory = factory.method(STATIC, "make", "()LProduct;", 2, 0, code).finish();

    let mut product = ClassBuilder::class("Product").field(STATIC, "INSTANCE", "LProduct;");
    let make = product.method_ref("Factory", "make", "()LProduct;");
    let instance = product.field_ref("Product", "INSTANCE", "LProduct;");
    let clinit = [vec![INVOKESTATIC], be(make), vec![PUTSTATIC], be(instance), vec![RETURN]].concat();
    let product = product
        .default_constructor(OBJECT)
        .method(STATIC, "<clinit>", "()V", 1, 0, clinit)
        .finish();
    vec![factory, product]
}

fn construct(builder: &mut ClassBuilder, class: &str) -> Vec<u8> {
    let class_ref = builder.class_ref(class);
    let init = builder.method_ref(class, "<init>", "()V");
    [vec![NEW], be(class_ref), vec![DUP, INVOKESPECIAL], be(init)].concat()
}

#[test]
fn initializer_reentering_a_pool_entry_sees_the_linked_class() {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let vm = vm_with(factory_cycle());
        let made = vm.invoke_static("Factory", "make", "()LProduct;", &[]);
        let product = vm.load_class("Product");
        sender.send((made, product)).unwrap();
    });
    let (made, product) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("resolution did not finish");

    match made.unwrap() {
        Some(Value::Ref(Some(object))) => assert_eq!(object.class_name(), "Product"),
        other => panic!("expected a product, got {:?}", other),
    }
    let product = product.unwrap();
    assert_eq!(product.state(), ClassState::Initialized);
    assert!(matches!(
        product.find_field("INSTANCE", "LProduct;").unwrap().get(),
        Value::Ref(Some(_))
    ));
}

#[test]
fn constant_values_are_assigned_before_initialization() {
    let mut builder = ClassBuilder::class("Constants");
    let max = builder.int(77);
    let name = builder.string("hi");
    let big = builder.long(1 << 40);
    let max_ref = builder.field_ref("Constants", "MAX", "I");
    let doubled = [vec![GETSTATIC], be(max_ref), vec![ICONST_2, IMUL, IRETURN]].concat();
    let class = builder
        .constant_field(CONSTANT, "MAX", "I", max)
        .constant_field(CONSTANT, "NAME", "Ljava/lang/String;", name)
        .constant_field(CONSTANT, "BIG", "J", big)
        .method(STATIC, "doubled", "()I", 2, 0, doubled)
        .finish();
    let vm = vm_with(vec![class]);

    assert_eq!(vm.invoke_static("Constants", "doubled", "()I", &[]).unwrap(), Some(Value::Int(154)));
    let class = vm.load_class("Constants").unwrap();
    assert_eq!(class.find_field("BIG", "J").unwrap().get(), Value::Long(1 << 40));
    match class.find_field("NAME", "Ljava/lang/String;").unwrap().get() {
        Value::Ref(Some(text)) => assert_eq!(java_string(&text).unwrap(), "hi"),
        other => panic!("expected a string constant, got {:?}", other),
    }
}

#[test]
fn subclass_fields_shadow_without_replacing() {
    let parent = ClassBuilder::class("Parent")
        .field(ACC_PUBLIC, "x", "I")
        .default_constructor(OBJECT)
        .finish();
    let child = ClassBuilder::new("Child", Some("Parent"))
        .field(ACC_PUBLIC, "x", "I")
        .default_constructor("Parent")
        .finish();
    let mut main = ClassBuilder::class("Main");
    let child_ref = main.class_ref("Child");
    let init = main.method_ref("Child", "<init>", "()V");
    let parent_x = main.field_ref("Parent", "x", "I");
    let child_x = main.field_ref("Child", "x", "I");
    let code = [
        vec![NEW],
        be(child_ref),
        vec![DUP, INVOKESPECIAL],
        be(init),
        vec![ASTORE_0, ALOAD_0, ICONST_1, PUTFIELD],
        be(parent_x),
        vec![ALOAD_0, ICONST_2, PUTFIELD],
        be(child_x),
        vec![ALOAD_0, GETFIELD],
        be(parent_x),
        vec![BIPUSH, 10, IMUL, ALOAD_0, GETFIELD],
        be(child_x),
        vec![IADD, IRETURN],
    ]
    .concat();
    let main = main.method(STATIC, "run", "()I", 3, 1, code).finish();
    let vm = vm_with(vec![parent, child, main]);

    assert_eq!(vm.invoke_static("Main", "run", "()I", &[]).unwrap(), Some(Value::Int(12)));

    let object = vm.new_object(&vm.load_class("Child").unwrap());
    let instance = object.as_instance().unwrap();
    instance.find_field("x", "I").unwrap().set(Value::Int(5));
    assert_eq!(instance.level_of("Child").unwrap().declared_fields()[0].get(), Value::Int(5));
    assert_eq!(instance.level_of("Parent").unwrap().declared_fields()[0].get(), Value::Int(0));
}

#[test]
fn missing_classes_are_reported() {
    let orphan = ClassBuilder::new("Orphan", Some("Missing")).finish();
    let vm = vm_with(vec![orphan]);

    assert!(matches!(vm.load_class("Nowhere"), Err(VmError::ClassNotFound(name)) if name == "Nowhere"));
    assert!(matches!(vm.load_class("Orphan"), Err(VmError::ClassNotFound(name)) if name == "Missing"));
    assert!(vm.method_area().lookup_class("Orphan").is_none());
}

#[test]
fn malformed_class_files_are_rejected() {
    let (_, mut old) = ClassBuilder::class("Old").finish();
    old[6..8].copy_from_slice(&44u16.to_be_bytes());
    let (_, impostor) = ClassBuilder::class("Right").finish();
    let vm = vm_with(vec![
        ("Bad".to_string(), vec![0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 52]),
        ("Old".to_string(), old),
        ("Wrong".to_string(), impostor),
        ("Short".to_string(), vec![0xCA, 0xFE]),
    ]);

    for name in ["Bad", "Old", "Wrong", "Short"] {
        assert!(
            matches!(vm.load_class(name), Err(VmError::MalformedInput(_))),
            "{} should be malformed",
            name
        );
    }
}

#[test]
fn failed_initialization_marks_the_class_erroneous() {
    let broken = ClassBuilder::class("Broken")
        .method(STATIC, "<clinit>", "()V", 1, 0, vec![ACONST_NULL, ATHROW])
        .finish();
    let vm = vm_with(vec![broken]);

    assert!(matches!(vm.load_class("Broken"), Err(VmError::NullReference(_))));
    assert!(matches!(vm.load_class("Broken"), Err(VmError::IllegalState(_))));
    let class = vm.method_area().lookup_class("Broken").unwrap();
    assert_eq!(class.state(), ClassState::Erroneous);
}

#[test]
fn superclasses_initialize_first() {
    let mut base = ClassBuilder::class("Base").field(STATIC, "order", "I");
    let order = base.field_ref("Base", "order", "I");
    let base_clinit = [vec![ICONST_1, PUTSTATIC], be(order), vec![RETURN]].concat();
    let base = base.method(STATIC, "<clinit>", "()V", 1, 0, base_clinit).finish();
    let mut derived = ClassBuilder::new("Derived", Some("Base"));
    let order = derived.field_ref("Base", "order", "I");
    let derived_clinit = [
        vec![GETSTATIC],
        be(order),
        vec![BIPUSH, 10, IMUL, PUTSTATIC],
        be(order),
        vec![RETURN],
    ]
    .concat();
    let derived = derived.method(STATIC, "<clinit>", "()V", 2, 0, derived_clinit).finish();
    let vm = vm_with(vec![base, derived]);

    vm.load_class("Derived").unwrap();
    let base = vm.method_area().lookup_class("Base").unwrap();
    assert_eq!(base.find_field("order", "I").unwrap().get(), Value::Int(10));
}

#[test]
fn array_classes_are_covariant() {
    let parent = ClassBuilder::class("Parent").finish();
    let child = ClassBuilder::new("Child", Some("Parent")).finish();
    let vm = vm_with(vec![parent, child]);
    vm.load_class("Child").unwrap();

    let children = vm.array_class("[LChild;").unwrap();
    let matrix = vm.array_class("[[I").unwrap();
    let area = vm.method_area();
    assert!(children.look_like("[LParent;", area));
    assert!(children.look_like("[Ljava/lang/Object;", area));
    assert!(children.look_like("java/lang/Cloneable", area));
    assert!(!vm.array_class("[LParent;").unwrap().look_like("[LChild;", area));
    assert!(matrix.look_like("[Ljava/lang/Object;", area));
    assert!(!matrix.look_like("[[J", area));
    assert!(matches!(vm.load("[I").unwrap(), LoadedClass::Array(array) if array.component_name() == "I"));
    assert!(Arc::ptr_eq(&children, &vm.array_class("[LChild;").unwrap()));
}

fn class_class() -> (String, Vec<u8>) {
    ClassBuilder::class("java/lang/Class")
        .flags(ACC_PUBLIC | ACC_FINAL | ACC_SUPER)
        .bodiless_method(ACC_PRIVATE | ACC_NATIVE, "getName0", "()Ljava/lang/String;")
        .bodiless_method(ACC_PUBLIC | ACC_NATIVE, "isPrimitive", "()Z")
        .bodiless_method(STATIC | ACC_NATIVE, "getPrimitiveClass", "(Ljava/lang/String;)Ljava/lang/Class;")
        .finish()
}

#[test]
fn class_literals_resolve_to_shared_mirrors() {
    let mut main = ClassBuilder::class("app/Main");
    let own = main.class_ref("app/Main");
    let get_name = main.method_ref("java/lang/Class", "getName0", "()Ljava/lang/String;");
    let is_primitive = main.method_ref("java/lang/Class", "isPrimitive", "()Z");
    let primitive = main.method_ref(
        "java/lang/Class",
        "getPrimitiveClass",
        "(Ljava/lang/String;)Ljava/lang/Class;",
    );
    let int_name = main.string("int");
    let name_code = [vec![LDC, own as u8, INVOKEVIRTUAL], be(get_name), vec![ARETURN]].concat();
    let mirror_code = [vec![LDC, own as u8, ARETURN]].concat();
    let primitive_code = [
        vec![LDC, int_name as u8, INVOKESTATIC],
        be(primitive),
        vec![INVOKEVIRTUAL],
        be(is_primitive),
        vec![LDC, own as u8, INVOKEVIRTUAL],
        be(is_primitive),
        vec![IADD, IRETURN],
    ]
    .concat();
    let main = main
        .method(STATIC, "name", "()Ljava/lang/String;", 1, 0, name_code)
        .method(STATIC, "mirror", "()Ljava/lang/Class;", 1, 0, mirror_code)
        .method(STATIC, "primitives", "()I", 2, 0, primitive_code)
        .finish();
    let vm = vm_with(vec![class_class(), main]);
    vm.bootstrap().unwrap();

    match vm.invoke_static("app/Main", "name", "()Ljava/lang/String;", &[]).unwrap() {
        Some(Value::Ref(Some(name))) => assert_eq!(java_string(&name).unwrap(), "app.Main"),
        other => panic!("expected a name, got {:?}", other),
    }
    let first = vm.invoke_static("app/Main", "mirror", "()Ljava/lang/Class;", &[]).unwrap();
    let second = vm.invoke_static("app/Main", "mirror", "()Ljava/lang/Class;", &[]).unwrap();
    match (first, second) {
        (Some(Value::Ref(Some(a))), Some(Value::Ref(Some(b)))) => {
            assert!(Arc::ptr_eq(&a, &b));
            assert!(matches!(&*a, Object::Instance(i) if i.mirror_of() == Some("app/Main")));
        }
        other => panic!("expected mirrors, got {:?}", other),
    }
    assert_eq!(vm.invoke_static("app/Main", "primitives", "()I", &[]).unwrap(), Some(Value::Int(1)));
}

#[test]
fn mirror_creation_tolerates_reentry_from_the_class_initializer() {
    let mut class = ClassBuilder::class("java/lang/Class").flags(ACC_PUBLIC | ACC_FINAL | ACC_SUPER);
    let main_literal = class.class_ref("app/Main");
    let class = class
        .method(STATIC, "<clinit>", "()V", 1, 0, vec![LDC, main_literal as u8, POP, RETURN])
        .finish();
    let mut main = ClassBuilder::class("app/Main");
    let own = main.class_ref("app/Main");
    let main = main
        .method(STATIC, "mirror", "()Ljava/lang/Class;", 1, 0, vec![LDC, own as u8, ARETURN])
        .finish();

    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let vm = vm_with(vec![class, main]);
        let first = vm.invoke_static("app/Main", "mirror", "()Ljava/lang/Class;", &[]);
        let second = vm.invoke_static("app/Main", "mirror", "()Ljava/lang/Class;", &[]);
        sender.send((first, second)).unwrap();
    });
    let (first, second) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("mirror creation did not finish");

    match (first.unwrap(), second.unwrap()) {
        (Some(Value::Ref(Some(a))), Some(Value::Ref(Some(b)))) => {
            assert!(Arc::ptr_eq(&a, &b));
            assert!(matches!(&*a, Object::Instance(i) if i.mirror_of() == Some("app/Main")));
        }
        other => panic!("expected mirrors, got {:?}", other),
    }
}
