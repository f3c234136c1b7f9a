//! Decoder for the Java class-file format: bytes in, structured records out.
//!
//! This crate has no opinion about execution. It parses the binary format
//! into a constant pool plus raw field and method records and leaves
//! linking, resolution and interpretation to the VM crate on top of it.

/// [Access Flags](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#page=85)
pub mod access_flags;
/// [Class File Format](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#page=82)
pub mod class_file;
/// [The Constant Pool](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#page=88)
pub mod constants;
/// [Descriptors](https://docs.oracle.com/javase/specs/jvms/se17/jvms17.pdf#page=107)
pub mod descriptors;
pub mod errors;

pub use class_file::{ClassFile, SUPPORTED_MAJOR_VERSION};
pub use constants::{ConstantPool, PoolEntry};
pub use errors::ClassFormatError;
