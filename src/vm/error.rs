use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("malformed class descriptor: {0}")]
    MalformedInput(String),

    #[error("class not found: {0}")]
    ClassNotFound(String),

    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("null reference: {0}")]
    NullReference(String),

    #[error("arithmetic fault: {0}")]
    ArithmeticFault(String),

    #[error("unsupported instruction 0x{opcode:02x} ({mnemonic})")]
    UnsupportedInstruction { opcode: u8, mnemonic: &'static str },

    #[error("array index {index} out of bounds for length {length}")]
    ArrayIndexOutOfBounds { index: i32, length: usize },

    #[error("negative array size: {0}")]
    NegativeArraySize(i32),

    #[error("class {from} cannot be cast to {to}")]
    ClassCast { from: String, to: String },

    #[error("uncaught exception {class}: {message}")]
    UncaughtException { class: String, message: String },

    #[error("stack overflow: more than {depth} frames")]
    StackOverflow { depth: usize },

    #[error("no native implementation for {class}.{method}")]
    NativeNotFound { class: String, method: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VmError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        VmError::MalformedInput(message.into())
    }

    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        VmError::IllegalState(message.into())
    }
}
