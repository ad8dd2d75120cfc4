pub mod vm;

pub use crate::vm::error::VmError;
pub use crate::vm::vm::{Vm, VmConfig};
