//! Decoding tests over synthetic class files assembled byte by byte.

use jclass::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use jclass::errors::ClassFormatError;
use jclass::ClassFile;

#[derive(Default)]
struct Bytes(Vec<u8>);

impl Bytes {
    fn u1(&mut self, value: u8) -> &mut Self {
        self.0.push(value);
        self
    }

    fn u2(&mut self, value: u16) -> &mut Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn u4(&mut self, value: u32) -> &mut Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.extend_from_slice(bytes);
        self
    }

    fn utf8(&mut self, text: &str) -> &mut Self {
        self.u1(1).u2(text.len() as u16).raw(text.as_bytes())
    }

    fn class(&mut self, name_index: u16) -> &mut Self {
        self.u1(7).u2(name_index)
    }

    fn header(&mut self, major: u16) -> &mut Self {
        self.u4(0xCAFE_BABE).u2(0).u2(major)
    }

    /// A method_info with a single Code attribute. `name_index` 11 must be
    /// the Utf8 "Code" in the fixture pool.
    fn method(&mut self, flags: u16, name: u16, desc: u16, code: &[u8], handlers: u16) -> &mut Self {
        self.u2(flags).u2(name).u2(desc).u2(1);
        let attr_len = 2 + 2 + 4 + code.len() as u32 + 2 + u32::from(handlers) * 8 + 2;
        self.u2(11).u4(attr_len);
        self.u2(2).u2(3); // max_stack, max_locals
        self.u4(code.len() as u32).raw(code);
        self.u2(handlers);
        for _ in 0..handlers {
            self.u2(0).u2(code.len() as u16).u2(0).u2(0);
        }
        self.u2(0) // no nested attributes
    }
}

/// `public class demo/Fixture extends java/lang/Object` with one private
/// field, two static methods and a skippable SourceFile attribute.
fn fixture() -> Vec<u8> {
    let mut b = Bytes::default();
    b.header(61);
    b.u2(14); // constant_pool_count
    b.utf8("demo/Fixture"); // 1
    b.class(1); // 2
    b.utf8("java/lang/Object"); // 3
    b.class(3); // 4
    b.utf8("count"); // 5
    b.utf8("I"); // 6
    b.utf8("f"); // 7
    b.utf8("()V"); // 8
    b.utf8("g"); // 9
    b.utf8("()I"); // 10
    b.utf8("Code"); // 11
    b.utf8("SourceFile"); // 12
    b.utf8("Fixture.java"); // 13
    b.u2(0x0021); // ACC_PUBLIC | ACC_SUPER
    b.u2(2).u2(4); // this_class, super_class
    b.u2(0); // interfaces
    b.u2(1); // fields
    b.u2(0x0002).u2(5).u2(6).u2(0);
    b.u2(2); // methods
    b.method(0x0009, 7, 8, &[0xb1], 0);
    b.method(0x0009, 9, 10, &[0x05, 0x06, 0x60, 0xac], 1);
    b.u2(1); // class attributes
    b.u2(12).u4(2).u2(13); // SourceFile, skipped by length
    b.0
}

#[test]
fn round_trip() {
    let class = ClassFile::from_bytes(&fixture()).unwrap();
    let pool = &class.constant_pool;

    assert_eq!(class.major_version, 61);
    assert_eq!(
        class.access_flags,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER
    );
    assert_eq!(pool.get_class_name(class.this_class).unwrap(), "demo/Fixture");
    assert_eq!(
        pool.get_class_name(class.super_class).unwrap(),
        "java/lang/Object"
    );

    assert_eq!(class.fields.len(), 1);
    let field = &class.fields[0];
    assert_eq!(field.access_flags, FieldAccessFlags::PRIVATE);
    assert_eq!(pool.get_utf8(field.name_index).unwrap(), "count");
    assert_eq!(pool.get_utf8(field.descriptor_index).unwrap(), "I");

    assert_eq!(class.methods.len(), 2);
    let f = &class.methods[0];
    assert!(f.access_flags.contains(MethodAccessFlags::STATIC));
    assert_eq!(pool.get_utf8(f.name_index).unwrap(), "f");
    assert_eq!(pool.get_utf8(f.descriptor_index).unwrap(), "()V");
    let code = f.code.as_ref().unwrap();
    assert_eq!(code.code, vec![0xb1]);
    assert_eq!((code.max_stack, code.max_locals), (2, 3));

    let g = &class.methods[1];
    assert_eq!(pool.get_utf8(g.name_index).unwrap(), "g");
    assert_eq!(pool.get_utf8(g.descriptor_index).unwrap(), "()I");
    assert_eq!(g.code.as_ref().unwrap().code, vec![0x05, 0x06, 0x60, 0xac]);
}

#[test]
fn long_constant_occupies_two_slots() {
    let mut b = Bytes::default();
    b.header(61);
    b.u2(8);
    b.utf8("demo/Holder"); // 1
    b.class(1); // 2
    b.utf8("x"); // 3
    b.utf8("y"); // 4
    b.u1(5).u4(0x1234_5678).u4(0x9ABC_DEF0); // 5: Long, 6: reserved
    b.utf8("tail"); // 7
    b.u2(0).u2(2).u2(0).u2(0).u2(0).u2(0).u2(0);
    let class = ClassFile::from_bytes(&b.0).unwrap();
    let pool = &class.constant_pool;

    assert_eq!(pool.get_long(5).unwrap(), 0x1234_5678_9ABC_DEF0);
    assert!(matches!(pool.get(6), Err(ClassFormatError::ReservedSlot(6))));
    assert_eq!(pool.get_utf8(7).unwrap(), "tail");
    assert!(matches!(pool.get(0), Err(ClassFormatError::BadIndex(0))));
    assert!(matches!(pool.get(99), Err(ClassFormatError::BadIndex(99))));
}

#[test]
fn rejects_bad_magic() {
    let mut b = Bytes::default();
    b.u4(0xCAFE_D00D).u2(0).u2(61);
    assert!(matches!(
        ClassFile::from_bytes(&b.0),
        Err(ClassFormatError::BadMagic(0xCAFE_D00D))
    ));
}

#[test]
fn rejects_version_above_ceiling() {
    let mut bytes = fixture();
    bytes[7] = 62; // major version low byte
    assert!(matches!(
        ClassFile::from_bytes(&bytes),
        Err(ClassFormatError::UnsupportedVersion {
            found: 62,
            ceiling: 61
        })
    ));
    assert!(ClassFile::with_version_ceiling(&bytes, 62).is_ok());
}

#[test]
fn rejects_empty_constant_pool() {
    let mut b = Bytes::default();
    b.header(61).u2(0);
    assert!(matches!(
        ClassFile::from_bytes(&b.0),
        Err(ClassFormatError::EmptyConstantPool)
    ));
}

#[test]
fn rejects_unknown_pool_tag() {
    let mut b = Bytes::default();
    b.header(61).u2(2).u1(2).u2(0);
    assert!(matches!(
        ClassFile::from_bytes(&b.0),
        Err(ClassFormatError::UnknownTag { tag: 2, index: 1 })
    ));
}

#[test]
fn rejects_truncated_utf8() {
    let mut b = Bytes::default();
    b.header(61).u2(2).u1(1).u2(10).raw(b"abc");
    assert!(matches!(
        ClassFile::from_bytes(&b.0),
        Err(ClassFormatError::Truncated(_))
    ));
}

#[test]
fn rejects_mismatched_index_kind() {
    // A Class entry whose name_index points at an Integer.
    let mut b = Bytes::default();
    b.header(61);
    b.u2(3);
    b.u1(3).u4(7); // 1: Integer
    b.class(1); // 2: Class -> 1
    b.u2(0).u2(2).u2(0).u2(0).u2(0).u2(0).u2(0);
    assert!(matches!(
        ClassFile::from_bytes(&b.0),
        Err(ClassFormatError::UnexpectedEntry {
            index: 1,
            expected: "Utf8"
        })
    ));
}

#[test]
fn rejects_trailing_bytes() {
    let mut bytes = fixture();
    bytes.push(0);
    assert!(matches!(
        ClassFile::from_bytes(&bytes),
        Err(ClassFormatError::TrailingBytes)
    ));
}
