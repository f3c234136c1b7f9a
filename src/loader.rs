//! Class loading: the seam the class model resolves through, plus the
//! default classpath implementation.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::class::Class;
use crate::errors::VmError;
use crate::vm::Jvm;

/// Names a class by its binary name, returns it loaded, or `None` when it
/// has no answer. Loaders live as long as the process; the core only holds
/// them through non-owning handles.
pub trait ClassLoader: Send + Sync {
    fn load_class(&self, name: &str) -> Result<Option<Arc<Class>>, VmError>;
}

/// Loads `.class` files from a list of directories. Archive classpath
/// entries stay outside the core; directories are enough here.
pub struct ClassPathLoader {
    jvm: Weak<Jvm>,
    // Handle to our own Arc, so defined classes can carry their loader.
    me: Weak<ClassPathLoader>,
    paths: Vec<PathBuf>,
}

impl ClassPathLoader {
    pub fn new(jvm: &Arc<Jvm>, paths: Vec<PathBuf>) -> Arc<ClassPathLoader> {
        Arc::new_cyclic(|me| ClassPathLoader {
            jvm: Arc::downgrade(jvm),
            me: me.clone(),
            paths,
        })
    }
}

impl ClassLoader for ClassPathLoader {
    fn load_class(&self, name: &str) -> Result<Option<Arc<Class>>, VmError> {
        let (Some(jvm), Some(me)) = (self.jvm.upgrade(), self.me.upgrade()) else {
            return Ok(None);
        };
        let me: Arc<dyn ClassLoader> = me;
        if let Some(class) = jvm.find_class(&me, name) {
            return Ok(Some(class));
        }
        for dir in &self.paths {
            let path = dir.join(format!("{name}.class"));
            if !path.is_file() {
                continue;
            }
            let bytes = fs::read(&path)?;
            return jvm.define_class(&me, &bytes).map(Some);
        }
        Ok(None)
    }
}
