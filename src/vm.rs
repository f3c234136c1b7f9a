//! The process-wide runtime handle and the embedder API.
//!
//! There are no globals: the embedder constructs one `Jvm` per process and
//! passes it around. The class registry is the only shared mutable
//! structure, and one mutex covers both registration and lookup.

use std::rc::Rc;
use std::sync::{Arc, Mutex, Weak};

use jclass::ClassFile;

use crate::class::{Class, Field, Method};
use crate::errors::VmError;
use crate::heap::{Heap, ObjRef, DEFAULT_BLOCK_BUDGET, DEFAULT_BLOCK_SIZE};
use crate::interp;
use crate::loader::ClassLoader;
use crate::thread::JvmThread;

pub struct JvmOptions {
    pub heap_block_size: usize,
    pub heap_block_budget: usize,
    /// Highest class-file major version `define_class` accepts.
    pub version_ceiling: u16,
}

impl Default for JvmOptions {
    fn default() -> Self {
        JvmOptions {
            heap_block_size: DEFAULT_BLOCK_SIZE,
            heap_block_budget: DEFAULT_BLOCK_BUDGET,
            version_ceiling: jclass::SUPPORTED_MAJOR_VERSION,
        }
    }
}

pub struct Jvm {
    classes: Mutex<Vec<Arc<Class>>>,
    heap: Heap,
    version_ceiling: u16,
}

impl Jvm {
    pub fn new() -> Arc<Jvm> {
        Self::with_options(JvmOptions::default())
    }

    pub fn with_options(options: JvmOptions) -> Arc<Jvm> {
        Arc::new(Jvm {
            classes: Mutex::new(Vec::new()),
            heap: Heap::new(options.heap_block_size, options.heap_block_budget),
            version_ceiling: options.version_ceiling,
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Registers a class under its (loader, name) key. Idempotent: a second
    /// registration with the same key is a no-op that returns the class
    /// already in the registry.
    pub fn register_class(&self, class: Arc<Class>) -> Arc<Class> {
        let mut classes = self.classes.lock().unwrap();
        if let Some(existing) = classes
            .iter()
            .find(|c| c.name == class.name && Weak::ptr_eq(c.loader(), class.loader()))
        {
            return Arc::clone(existing);
        }
        classes.push(Arc::clone(&class));
        class
    }

    pub fn find_class(&self, loader: &Arc<dyn ClassLoader>, name: &str) -> Option<Arc<Class>> {
        let loader = Arc::downgrade(loader);
        self.classes
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name && Weak::ptr_eq(c.loader(), &loader))
            .cloned()
    }

    /// Decodes, builds, links and registers one class. A failure at any
    /// step leaves the registry untouched, so no partial class is ever
    /// visible.
    pub fn define_class(
        &self,
        loader: &Arc<dyn ClassLoader>,
        bytes: &[u8],
    ) -> Result<Arc<Class>, VmError> {
        let file = ClassFile::with_version_ceiling(bytes, self.version_ceiling)?;
        let pool = Arc::new(file.constant_pool);
        let name = pool.get_class_name(file.this_class)?.to_string();
        let class = Class::new(name, file.access_flags, Arc::clone(&pool), Arc::downgrade(loader));
        for info in &file.fields {
            class.add_field(Field::new(
                pool.get_utf8(info.name_index)?.to_string(),
                pool.get_utf8(info.descriptor_index)?.to_string(),
                info.access_flags,
            ));
        }
        for info in file.methods {
            let name = pool.get_utf8(info.name_index)?.to_string();
            let descriptor = pool.get_utf8(info.descriptor_index)?.to_string();
            class.add_method(Method::new(
                &class,
                info.access_flags,
                name,
                descriptor,
                info.code,
            )?);
        }
        // A zero super index means no super class, legal only for the root.
        if file.super_class != 0 {
            let super_class = class.resolve_class(file.super_class)?;
            class.set_super_class(super_class);
        }
        Ok(self.register_class(class))
    }

    /// Runs a method with no arguments. Returns when the method returns or
    /// its frame terminates by exception.
    pub fn invoke(&self, method: &Arc<Method>) -> Result<Option<u64>, VmError> {
        interp::execute(self, method, &[])
    }

    /// The calling thread's handle, for allocator and exception-slot access.
    pub fn current_thread(&self) -> Rc<JvmThread> {
        JvmThread::current()
    }

    /// Installs `exception` as the current thread's pending exception.
    pub fn throw_exception(&self, exception: ObjRef) {
        JvmThread::current().throw(exception);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use jclass::access_flags::ClassAccessFlags;
    use jclass::ConstantPool;

    struct NullLoader;

    impl ClassLoader for NullLoader {
        fn load_class(&self, _name: &str) -> Result<Option<Arc<Class>>, VmError> {
            Ok(None)
        }
    }

    fn class_for(loader: &Arc<dyn ClassLoader>, name: &str) -> Arc<Class> {
        Class::new(
            name.into(),
            ClassAccessFlags::empty(),
            Arc::new(ConstantPool::default()),
            Arc::downgrade(loader),
        )
    }

    #[test]
    fn registration_is_idempotent_per_loader_and_name() {
        let jvm = Jvm::new();
        let loader: Arc<dyn ClassLoader> = Arc::new(NullLoader);
        let first = jvm.register_class(class_for(&loader, "demo/A"));
        let second = jvm.register_class(class_for(&loader, "demo/A"));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&jvm.find_class(&loader, "demo/A").unwrap(), &first));

        let other_loader: Arc<dyn ClassLoader> = Arc::new(NullLoader);
        assert!(jvm.find_class(&other_loader, "demo/A").is_none());
        let third = jvm.register_class(class_for(&other_loader, "demo/A"));
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
