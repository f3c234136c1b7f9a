use jclass::ClassFormatError;
use thiserror::Error;

/// Everything that can go wrong between handing the VM class bytes and
/// getting a value back out of `invoke`.
///
/// Decode and resolution errors are returned to the caller; runtime errors
/// unwind the interpreter frame by frame and surface here at the outermost
/// one.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    ClassFormat(#[from] ClassFormatError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("class {0} not found")]
    NoClassDefFound(String),
    #[error("method {class}.{name}{descriptor} not found")]
    NoSuchMethod {
        class: String,
        name: String,
        descriptor: String,
    },
    #[error("field {class}.{name} not found")]
    NoSuchField { class: String, name: String },
    #[error("verification of {class}.{method} failed: {reason}")]
    Verify {
        class: String,
        method: String,
        reason: String,
    },
    #[error("incompatible class change: {0}")]
    IncompatibleClassChange(String),
    #[error("unsupported bytecode {opcode:#04x} at pc {pc}")]
    UnsupportedBytecode { opcode: u8, pc: u32 },
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),
    #[error("java.lang.ArithmeticException: / by zero")]
    Arithmetic,
    #[error("java.lang.NullPointerException")]
    NullPointer,
    #[error("out of memory")]
    OutOfMemory,
    #[error("unhandled exception")]
    UnhandledException,
}
