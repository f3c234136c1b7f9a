use std::io::{Cursor, Read};

use byteorder::{ReadBytesExt, BE};

use crate::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::constants::{ConstantPool, PoolEntry};
use crate::errors::ClassFormatError;

/// Highest class-file major version the decoder accepts by default
/// (61 = Java SE 17).
pub const SUPPORTED_MAJOR_VERSION: u16 = 61;

const MAGIC: u32 = 0xCAFE_BABE;

/// The decoded `Code` attribute of one method. Exception table entries are
/// read and discarded; nested attributes are skipped.
#[derive(Clone, Debug)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub code: Option<CodeAttribute>,
}

/// The raw image of one class file.
///
/// Names, descriptors and the super class are still symbolic (constant pool
/// indices); turning them into linked runtime structures is the VM's job.
#[derive(Clone, Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    /// Zero when the class has no super class, which is legal only for the
    /// root class.
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl ClassFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, ClassFormatError> {
        Self::with_version_ceiling(bytes, SUPPORTED_MAJOR_VERSION)
    }

    /// Decodes a class file, accepting major versions up to `ceiling`.
    pub fn with_version_ceiling(bytes: &[u8], ceiling: u16) -> Result<ClassFile, ClassFormatError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<BE>()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = cursor.read_u16::<BE>()?;
        let major_version = cursor.read_u16::<BE>()?;
        if major_version > ceiling {
            return Err(ClassFormatError::UnsupportedVersion {
                found: major_version,
                ceiling,
            });
        }
        let constant_pool = ConstantPool::read(&mut cursor)?;
        let access_flags = ClassAccessFlags::from_bits_retain(cursor.read_u16::<BE>()?);
        let this_class = cursor.read_u16::<BE>()?;
        let super_class = cursor.read_u16::<BE>()?;
        let interfaces_count = cursor.read_u16::<BE>()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(cursor.read_u16::<BE>()?);
        }
        let fields_count = cursor.read_u16::<BE>()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(read_field_info(&mut cursor, &constant_pool)?);
        }
        let methods_count = cursor.read_u16::<BE>()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(read_method_info(&mut cursor, &constant_pool)?);
        }
        let attributes_count = cursor.read_u16::<BE>()?;
        for _ in 0..attributes_count {
            read_attribute(&mut cursor, &constant_pool)?;
        }
        // The class file must not be truncated or have extra bytes at the end.
        if cursor.position() != bytes.len() as u64 {
            return Err(ClassFormatError::TrailingBytes);
        }
        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
        };
        check_format(&class)?;
        Ok(class)
    }
}

fn read_field_info(
    cursor: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<FieldInfo, ClassFormatError> {
    let access_flags = FieldAccessFlags::from_bits_retain(cursor.read_u16::<BE>()?);
    let name_index = cursor.read_u16::<BE>()?;
    let descriptor_index = cursor.read_u16::<BE>()?;
    let attributes_count = cursor.read_u16::<BE>()?;
    for _ in 0..attributes_count {
        read_attribute(cursor, pool)?;
    }
    Ok(FieldInfo {
        access_flags,
        name_index,
        descriptor_index,
    })
}

fn read_method_info(
    cursor: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<MethodInfo, ClassFormatError> {
    let access_flags = MethodAccessFlags::from_bits_retain(cursor.read_u16::<BE>()?);
    let name_index = cursor.read_u16::<BE>()?;
    let descriptor_index = cursor.read_u16::<BE>()?;
    let attributes_count = cursor.read_u16::<BE>()?;
    let mut code = None;
    for _ in 0..attributes_count {
        if let Some(attr) = read_attribute(cursor, pool)? {
            code = Some(attr);
        }
    }
    Ok(MethodInfo {
        access_flags,
        name_index,
        descriptor_index,
        code,
    })
}

/// Reads one attribute. `Code` is decoded; everything else is skipped by its
/// length prefix.
fn read_attribute(
    cursor: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<Option<CodeAttribute>, ClassFormatError> {
    let name_index = cursor.read_u16::<BE>()?;
    let length = cursor.read_u32::<BE>()?;
    if pool.get_utf8(name_index)? == "Code" {
        return Ok(Some(read_code_attribute(cursor, pool)?));
    }
    skip(cursor, u64::from(length))?;
    Ok(None)
}

fn read_code_attribute(
    cursor: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
) -> Result<CodeAttribute, ClassFormatError> {
    let max_stack = cursor.read_u16::<BE>()?;
    let max_locals = cursor.read_u16::<BE>()?;
    let code_length = cursor.read_u32::<BE>()?;
    if u64::from(code_length) > remaining(cursor) {
        return Err(eof());
    }
    let mut code = vec![0u8; code_length as usize];
    cursor.read_exact(&mut code)?;
    let exception_table_length = cursor.read_u16::<BE>()?;
    skip(cursor, u64::from(exception_table_length) * 8)?;
    let attributes_count = cursor.read_u16::<BE>()?;
    for _ in 0..attributes_count {
        read_attribute(cursor, pool)?;
    }
    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
    })
}

fn remaining(cursor: &Cursor<&[u8]>) -> u64 {
    cursor.get_ref().len() as u64 - cursor.position()
}

fn skip(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<(), ClassFormatError> {
    if count > remaining(cursor) {
        return Err(eof());
    }
    cursor.set_position(cursor.position() + count);
    Ok(())
}

fn eof() -> ClassFormatError {
    ClassFormatError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
}

/// Best-effort image of the JVMS se17 §4.8 format checks: every index one
/// constant pool entry stores about another must be in range and point at an
/// entry of the expected kind, and member names and descriptors must be
/// `Utf8`.
fn check_format(class: &ClassFile) -> Result<(), ClassFormatError> {
    let pool = &class.constant_pool;
    for index in 1..=pool.entry_count() {
        let entry = match pool.get(index) {
            Ok(entry) => entry,
            // Reserved slots of 8-byte constants.
            Err(_) => continue,
        };
        match entry {
            PoolEntry::Class { name_index } => {
                pool.get_utf8(*name_index)?;
            }
            PoolEntry::String { string_index } => {
                pool.get_utf8(*string_index)?;
            }
            PoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | PoolEntry::Methodref {
                class_index,
                name_and_type_index,
            }
            | PoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                expect_class(pool, *class_index)?;
                expect_name_and_type(pool, *name_and_type_index)?;
            }
            PoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => {
                pool.get_utf8(*name_index)?;
                pool.get_utf8(*descriptor_index)?;
            }
            PoolEntry::MethodHandle {
                reference_index, ..
            } => {
                pool.get(*reference_index)?;
            }
            PoolEntry::MethodType { descriptor_index } => {
                pool.get_utf8(*descriptor_index)?;
            }
            PoolEntry::InvokeDynamic {
                name_and_type_index,
                ..
            } => {
                expect_name_and_type(pool, *name_and_type_index)?;
            }
            _ => {}
        }
    }
    if class.this_class != 0 {
        expect_class(pool, class.this_class)?;
    }
    if class.super_class != 0 {
        expect_class(pool, class.super_class)?;
    }
    for field in &class.fields {
        pool.get_utf8(field.name_index)?;
        pool.get_utf8(field.descriptor_index)?;
    }
    for method in &class.methods {
        pool.get_utf8(method.name_index)?;
        pool.get_utf8(method.descriptor_index)?;
    }
    Ok(())
}

fn expect_class(pool: &ConstantPool, index: u16) -> Result<(), ClassFormatError> {
    match pool.get(index)? {
        PoolEntry::Class { .. } => Ok(()),
        _ => Err(ClassFormatError::UnexpectedEntry {
            index,
            expected: "Class",
        }),
    }
}

fn expect_name_and_type(pool: &ConstantPool, index: u16) -> Result<(), ClassFormatError> {
    match pool.get(index)? {
        PoolEntry::NameAndType { .. } => Ok(()),
        _ => Err(ClassFormatError::UnexpectedEntry {
            index,
            expected: "NameAndType",
        }),
    }
}
