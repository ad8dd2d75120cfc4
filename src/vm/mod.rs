pub mod class_loader;
pub mod class_path;
pub mod classes;
pub mod classfile;
pub mod constant_pool;
pub mod error;
pub mod interpreter;
mod invoke;
pub mod java_lang;
pub mod memory;
pub mod method_area;
pub mod opcodes;
pub mod stack;
pub mod vm;
