//! The runtime class model: linked classes, their methods and fields, and
//! symbolic resolution against the constant pool.
//!
//! Ownership runs one way. The registry owns classes; a class owns its
//! methods and fields; back references (method to class, class to loader)
//! are weak and never extend a lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use jclass::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use jclass::class_file::CodeAttribute;
use jclass::descriptors::{parse_method_descriptor, TypeDescriptor};
use jclass::ConstantPool;

use crate::errors::VmError;
use crate::loader::ClassLoader;
use crate::opcodes;

pub struct Class {
    pub name: String,
    pub access_flags: ClassAccessFlags,
    pool: Arc<ConstantPool>,
    loader: Weak<dyn ClassLoader>,
    super_class: RwLock<Option<Arc<Class>>>,
    methods: RwLock<Vec<Arc<Method>>>,
    fields: RwLock<Vec<Arc<Field>>>,
}

impl Class {
    pub fn new(
        name: String,
        access_flags: ClassAccessFlags,
        pool: Arc<ConstantPool>,
        loader: Weak<dyn ClassLoader>,
    ) -> Arc<Class> {
        Arc::new(Class {
            name,
            access_flags,
            pool,
            loader,
            super_class: RwLock::new(None),
            methods: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
        })
    }

    /// The constant pool, shared with methods and the translator.
    pub fn pool(&self) -> &Arc<ConstantPool> {
        &self.pool
    }

    /// The defining loader. Non-owning; loaders have process lifetime.
    pub fn loader(&self) -> &Weak<dyn ClassLoader> {
        &self.loader
    }

    pub fn super_class(&self) -> Option<Arc<Class>> {
        self.super_class.read().unwrap().clone()
    }

    pub(crate) fn set_super_class(&self, super_class: Arc<Class>) {
        *self.super_class.write().unwrap() = Some(super_class);
    }

    /// Append-only, used while the class is built. Both lists are frozen by
    /// convention once the class is registered.
    pub fn add_method(&self, method: Arc<Method>) {
        self.methods.write().unwrap().push(method);
    }

    pub fn add_field(&self, field: Arc<Field>) {
        self.fields.write().unwrap().push(field);
    }

    pub fn methods(&self) -> Vec<Arc<Method>> {
        self.methods.read().unwrap().clone()
    }

    pub fn fields(&self) -> Vec<Arc<Field>> {
        self.fields.read().unwrap().clone()
    }

    /// Walks this class, then the super chain. Matching is exact on both
    /// strings.
    pub fn lookup_method(self: &Arc<Self>, name: &str, descriptor: &str) -> Option<Arc<Method>> {
        let mut current = Some(Arc::clone(self));
        while let Some(class) = current {
            let found = class
                .methods
                .read()
                .unwrap()
                .iter()
                .find(|method| method.matches(name, descriptor))
                .cloned();
            if found.is_some() {
                return found;
            }
            current = class.super_class();
        }
        None
    }

    pub fn lookup_field(self: &Arc<Self>, name: &str, descriptor: &str) -> Option<Arc<Field>> {
        let mut current = Some(Arc::clone(self));
        while let Some(class) = current {
            let found = class
                .fields
                .read()
                .unwrap()
                .iter()
                .find(|field| field.matches(name, descriptor))
                .cloned();
            if found.is_some() {
                return found;
            }
            current = class.super_class();
        }
        None
    }

    /// True when `other` is this class or one of its ancestors.
    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<Class>) -> bool {
        let mut current = Some(Arc::clone(self));
        while let Some(class) = current {
            if Arc::ptr_eq(&class, other) {
                return true;
            }
            current = class.super_class();
        }
        false
    }

    /// Reads a `Class` constant and asks the defining loader for it.
    pub fn resolve_class(&self, index: u16) -> Result<Arc<Class>, VmError> {
        let name = self.pool.get_class_name(index)?;
        let loaded = match self.loader.upgrade() {
            Some(loader) => loader.load_class(name)?,
            None => None,
        };
        loaded.ok_or_else(|| VmError::NoClassDefFound(name.to_string()))
    }

    /// Follows a `Fieldref`: resolve the owning class, then look the field
    /// up by name and descriptor.
    pub fn resolve_field(&self, index: u16) -> Result<Arc<Field>, VmError> {
        let fieldref = self.pool.get_fieldref(index)?;
        let target = self.resolve_class(fieldref.class_index)?;
        let (name, descriptor) = self.pool.get_name_and_type(fieldref.name_and_type_index)?;
        target
            .lookup_field(name, descriptor)
            .ok_or_else(|| VmError::NoSuchField {
                class: target.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn resolve_method(&self, index: u16) -> Result<Arc<Method>, VmError> {
        let methodref = self.pool.get_methodref(index)?;
        let target = self.resolve_class(methodref.class_index)?;
        let (name, descriptor) = self.pool.get_name_and_type(methodref.name_and_type_index)?;
        target
            .lookup_method(name, descriptor)
            .ok_or_else(|| VmError::NoSuchMethod {
                class: target.name.clone(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })
    }

    /// Structural verification of every method body. A full dataflow
    /// verifier is out of scope; this checks that code exists and that a
    /// linear walk by instruction length lands exactly on the code length
    /// with every opcode known.
    pub fn verify(&self) -> Result<(), VmError> {
        for method in self.methods.read().unwrap().iter() {
            if method
                .access_flags
                .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
            {
                continue;
            }
            verify_method(self, method)?;
        }
        Ok(())
    }
}

fn verify_method(class: &Class, method: &Method) -> Result<(), VmError> {
    let fail = |reason: String| VmError::Verify {
        class: class.name.clone(),
        method: method.name.clone(),
        reason,
    };
    if method.code.is_empty() {
        return Err(fail("no code".into()));
    }
    let mut pc = 0;
    while pc < method.code.len() {
        pc += opcodes::instruction_length(&method.code, pc).map_err(|e| fail(e.to_string()))?;
    }
    if pc != method.code.len() {
        return Err(fail("last instruction overruns the method".into()));
    }
    Ok(())
}

pub struct Method {
    /// Owning class, weak to break the cycle through the registry.
    pub(crate) class: Weak<Class>,
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,
    /// `None` is the void sentinel.
    pub return_type: Option<TypeDescriptor>,
    pub args_count: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

impl Method {
    /// Builds a method from its raw records, parsing the descriptor down to
    /// the argument count and return type the VM keeps.
    pub fn new(
        class: &Arc<Class>,
        access_flags: MethodAccessFlags,
        name: String,
        descriptor: String,
        code: Option<CodeAttribute>,
    ) -> Result<Arc<Method>, VmError> {
        let (args_count, return_type) = parse_method_descriptor(&descriptor)?;
        let (max_stack, max_locals, code) = match code {
            Some(attr) => (attr.max_stack, attr.max_locals, attr.code),
            None => (0, 0, Vec::new()),
        };
        Ok(Arc::new(Method {
            class: Arc::downgrade(class),
            access_flags,
            name,
            descriptor,
            return_type,
            args_count,
            max_stack,
            max_locals,
            code,
        }))
    }

    /// The owning class, when it is still alive.
    pub fn class(&self) -> Option<Arc<Class>> {
        self.class.upgrade()
    }

    /// Instance or class initializer, `<init>` and `<clinit>`.
    pub fn is_init(&self) -> bool {
        self.name.starts_with('<')
    }

    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor == descriptor
    }
}

pub struct Field {
    pub name: String,
    pub descriptor: String,
    pub access_flags: FieldAccessFlags,
    /// One opaque 64-bit cell per declaration. Cross-thread ordering of
    /// reads and writes is left to the memory model.
    value: AtomicU64,
}

impl Field {
    pub fn new(name: String, descriptor: String, access_flags: FieldAccessFlags) -> Arc<Field> {
        Arc::new(Field {
            name,
            descriptor,
            access_flags,
            value: AtomicU64::new(0),
        })
    }

    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor == descriptor
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set_value(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed)
    }
}
