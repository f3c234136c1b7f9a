use std::io::{Cursor, Read};
use std::str::from_utf8;

use byteorder::{ReadBytesExt, BE};

use crate::errors::ClassFormatError;

/// Constant pool tags, JVMS se17 Table 4.4-A.
mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const INVOKE_DYNAMIC: u8 = 18;
}

/// One constant pool entry.
///
/// `Utf8` keeps the raw bytes exactly as found in the file; conversion to
/// `&str` happens in [`ConstantPool::get_utf8`] so a broken entry only
/// fails when somebody actually asks for it.
#[derive(Clone, Debug)]
pub enum PoolEntry {
    Utf8(Vec<u8>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    /// Index 0, and the slot following a `Long` or `Double`.
    Reserved,
}

/// A symbolic member reference: `Fieldref`, `Methodref` or
/// `InterfaceMethodref` stripped down to its two indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberRef {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

/// The constant pool of one class, indexed from 1 to `entry_count()`.
#[derive(Clone, Debug)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool {
            entries: vec![PoolEntry::Reserved],
        }
    }
}

impl ConstantPool {
    /// Reads `constant_pool_count` followed by `constant_pool_count - 1`
    /// entries. 8-byte constants occupy two slots; the second one is filled
    /// with [`PoolEntry::Reserved`].
    pub(crate) fn read(cursor: &mut Cursor<&[u8]>) -> Result<ConstantPool, ClassFormatError> {
        let count = cursor.read_u16::<BE>()?;
        if count == 0 {
            return Err(ClassFormatError::EmptyConstantPool);
        }
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(PoolEntry::Reserved);
        while entries.len() < count as usize {
            let index = entries.len() as u16;
            let tag = cursor.read_u8()?;
            let entry = match tag {
                tag::UTF8 => {
                    let length = cursor.read_u16::<BE>()?;
                    let mut bytes = vec![0u8; length as usize];
                    cursor.read_exact(&mut bytes)?;
                    PoolEntry::Utf8(bytes)
                }
                tag::INTEGER => PoolEntry::Integer(cursor.read_i32::<BE>()?),
                tag::FLOAT => PoolEntry::Float(f32::from_bits(cursor.read_u32::<BE>()?)),
                tag::LONG => {
                    let high = cursor.read_u32::<BE>()?;
                    let low = cursor.read_u32::<BE>()?;
                    PoolEntry::Long((u64::from(high) << 32 | u64::from(low)) as i64)
                }
                tag::DOUBLE => {
                    let high = cursor.read_u32::<BE>()?;
                    let low = cursor.read_u32::<BE>()?;
                    PoolEntry::Double(f64::from_bits(u64::from(high) << 32 | u64::from(low)))
                }
                tag::CLASS => PoolEntry::Class {
                    name_index: cursor.read_u16::<BE>()?,
                },
                tag::STRING => PoolEntry::String {
                    string_index: cursor.read_u16::<BE>()?,
                },
                tag::FIELDREF => PoolEntry::Fieldref {
                    class_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                tag::METHODREF => PoolEntry::Methodref {
                    class_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                tag::INTERFACE_METHODREF => PoolEntry::InterfaceMethodref {
                    class_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                tag::NAME_AND_TYPE => PoolEntry::NameAndType {
                    name_index: cursor.read_u16::<BE>()?,
                    descriptor_index: cursor.read_u16::<BE>()?,
                },
                tag::METHOD_HANDLE => PoolEntry::MethodHandle {
                    reference_kind: cursor.read_u8()?,
                    reference_index: cursor.read_u16::<BE>()?,
                },
                tag::METHOD_TYPE => PoolEntry::MethodType {
                    descriptor_index: cursor.read_u16::<BE>()?,
                },
                tag::INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index: cursor.read_u16::<BE>()?,
                    name_and_type_index: cursor.read_u16::<BE>()?,
                },
                _ => return Err(ClassFormatError::UnknownTag { tag, index }),
            };
            let two_slots = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
            entries.push(entry);
            if two_slots {
                entries.push(PoolEntry::Reserved);
            }
        }
        Ok(ConstantPool { entries })
    }

    /// Number of usable index positions, i.e. `constant_pool_count - 1`.
    pub fn entry_count(&self) -> u16 {
        (self.entries.len() - 1) as u16
    }

    /// Fetches an entry by its 1-based index. Index 0 is out of range; the
    /// second slot of an 8-byte constant reports
    /// [`ClassFormatError::ReservedSlot`].
    pub fn get(&self, index: u16) -> Result<&PoolEntry, ClassFormatError> {
        if index == 0 {
            return Err(ClassFormatError::BadIndex(0));
        }
        match self.entries.get(index as usize) {
            None => Err(ClassFormatError::BadIndex(index)),
            Some(PoolEntry::Reserved) => Err(ClassFormatError::ReservedSlot(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            PoolEntry::Utf8(bytes) => {
                from_utf8(bytes).map_err(|_| ClassFormatError::InvalidUtf8(index))
            }
            _ => Err(mismatch(index, "Utf8")),
        }
    }

    /// Follows a `Class` entry to its name.
    pub fn get_class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index)? {
            PoolEntry::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(mismatch(index, "Class")),
        }
    }

    pub fn get_integer(&self, index: u16) -> Result<i32, ClassFormatError> {
        match self.get(index)? {
            PoolEntry::Integer(value) => Ok(*value),
            _ => Err(mismatch(index, "Integer")),
        }
    }

    pub fn get_long(&self, index: u16) -> Result<i64, ClassFormatError> {
        match self.get(index)? {
            PoolEntry::Long(value) => Ok(*value),
            _ => Err(mismatch(index, "Long")),
        }
    }

    pub fn get_fieldref(&self, index: u16) -> Result<MemberRef, ClassFormatError> {
        match self.get(index)? {
            PoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            } => Ok(MemberRef {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            }),
            _ => Err(mismatch(index, "Fieldref")),
        }
    }

    pub fn get_methodref(&self, index: u16) -> Result<MemberRef, ClassFormatError> {
        match self.get(index)? {
            PoolEntry::Methodref {
                class_index,
                name_and_type_index,
            } => Ok(MemberRef {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            }),
            _ => Err(mismatch(index, "Methodref")),
        }
    }

    /// Follows a `NameAndType` entry to its `(name, descriptor)` strings.
    pub fn get_name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index)? {
            PoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?)),
            _ => Err(mismatch(index, "NameAndType")),
        }
    }
}

fn mismatch(index: u16, expected: &'static str) -> ClassFormatError {
    ClassFormatError::UnexpectedEntry { index, expected }
}
