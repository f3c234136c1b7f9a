//! Per-thread execution state: the current allocation block and the
//! pending-exception slot. One handle exists per OS thread; nothing here
//! is ever shared across threads, so access is lock-free.

use std::cell::RefCell;
use std::mem::size_of;
use std::ptr;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use crate::class::Class;
use crate::errors::VmError;
use crate::heap::{ArrayHeader, Heap, MemoryBlock, ObjRef, ObjectHeader};

pub struct JvmThread {
    block: RefCell<Option<MemoryBlock>>,
    exception: RefCell<Option<ObjRef>>,
}

thread_local! {
    static CURRENT: Rc<JvmThread> = Rc::new(JvmThread {
        block: RefCell::new(None),
        exception: RefCell::new(None),
    });
}

impl JvmThread {
    /// The calling thread's handle.
    pub fn current() -> Rc<JvmThread> {
        CURRENT.with(Rc::clone)
    }

    /// Bump-allocates `size` bytes. When the current block is short it is
    /// retired and a fresh one taken from the heap; running out of blocks
    /// is `OutOfMemory`.
    pub fn alloc_raw(&self, heap: &Heap, size: usize) -> Result<NonNull<u8>, VmError> {
        if size > heap.block_size() {
            return Err(VmError::OutOfMemory);
        }
        let mut slot = self.block.borrow_mut();
        let needs_swap = match slot.as_ref() {
            Some(block) => !block.has_room(size),
            None => true,
        };
        if needs_swap {
            *slot = Some(heap.swap(slot.take()).ok_or(VmError::OutOfMemory)?);
        }
        match slot.as_mut().and_then(|block| block.alloc(size)) {
            Some(ptr) => Ok(ptr),
            None => Err(VmError::OutOfMemory),
        }
    }

    /// Allocates an uninitialized object header. Field storage past the
    /// header is opaque to the core.
    pub fn alloc_object(&self, heap: &Heap, class: Option<&Arc<Class>>) -> Result<ObjRef, VmError> {
        let raw = self.alloc_raw(heap, size_of::<ObjectHeader>())?;
        let header = raw.cast::<ObjectHeader>();
        unsafe {
            header.as_ptr().write(ObjectHeader {
                class: class_ptr(class),
            });
        }
        Ok(ObjRef::new(header))
    }

    pub fn alloc_array(
        &self,
        heap: &Heap,
        class: Option<&Arc<Class>>,
        length: u32,
    ) -> Result<ObjRef, VmError> {
        let raw = self.alloc_raw(heap, size_of::<ArrayHeader>())?;
        let header = raw.cast::<ArrayHeader>();
        unsafe {
            header.as_ptr().write(ArrayHeader {
                object: ObjectHeader {
                    class: class_ptr(class),
                },
                length,
            });
        }
        Ok(ObjRef::new(header.cast()))
    }

    /// Installs a pending exception; the interpreter unwinds at its next
    /// check and the embedder sees a failed invoke.
    pub fn throw(&self, exception: ObjRef) {
        *self.exception.borrow_mut() = Some(exception);
    }

    pub fn pending_exception(&self) -> Option<ObjRef> {
        *self.exception.borrow()
    }

    pub fn take_exception(&self) -> Option<ObjRef> {
        self.exception.borrow_mut().take()
    }
}

fn class_ptr(class: Option<&Arc<Class>>) -> *const Class {
    class.map_or(ptr::null(), Arc::as_ptr)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn objects_and_arrays_round_trip_through_words() {
        let heap = Heap::new(1024, 4);
        let thread = JvmThread::current();
        let object = thread.alloc_object(&heap, None).unwrap();
        assert_eq!(ObjRef::from_word(object.as_word()), Some(object));
        assert!(object.class_ptr().is_null());

        let array = thread.alloc_array(&heap, None, 7).unwrap();
        assert_eq!(unsafe { array.array_length() }, 7);
        assert_ne!(object.as_word(), array.as_word());
    }

    #[test]
    fn allocation_swaps_blocks_until_the_budget_runs_out() {
        let heap = Heap::new(64, 2);
        let thread = JvmThread::current();
        let mut words = Vec::new();
        for _ in 0..(2 * 64 / 16) {
            words.push(thread.alloc_raw(&heap, 16).unwrap().as_ptr() as usize);
        }
        assert!(matches!(
            thread.alloc_raw(&heap, 16),
            Err(VmError::OutOfMemory)
        ));
        words.sort_unstable();
        words.dedup();
        assert_eq!(words.len(), 2 * 64 / 16);
    }

    #[test]
    fn pending_exception_is_sticky_until_taken() {
        let heap = Heap::new(256, 1);
        let thread = JvmThread::current();
        assert!(thread.pending_exception().is_none());
        let exception = thread.alloc_object(&heap, None).unwrap();
        thread.throw(exception);
        assert_eq!(thread.pending_exception(), Some(exception));
        assert_eq!(thread.take_exception(), Some(exception));
        assert!(thread.pending_exception().is_none());
    }
}
