use thiserror::Error;

/// Structural failures raised while decoding a class file.
///
/// Every variant means the input is not a well-formed class file in the
/// supported version range; none of them carries partial decode state.
#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("class file major version {found} exceeds supported ceiling {ceiling}")]
    UnsupportedVersion { found: u16, ceiling: u16 },
    #[error("constant pool is empty")]
    EmptyConstantPool,
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },
    #[error("constant pool index {0} is out of range")]
    BadIndex(u16),
    #[error("constant pool index {0} is the reserved slot of an 8-byte constant")]
    ReservedSlot(u16),
    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedEntry { index: u16, expected: &'static str },
    #[error("constant pool entry {0} is not valid UTF-8")]
    InvalidUtf8(u16),
    #[error("invalid descriptor {0:?}")]
    InvalidDescriptor(String),
    #[error("class file has leftover bytes")]
    TrailingBytes,
    #[error("unexpected end of class file")]
    Truncated(#[from] std::io::Error),
}
