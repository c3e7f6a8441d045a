use crate::allocator::MovableMemory;

use std::marker::PhantomData;

/// Typed reference to a definition of type `D`, resolved through the
/// manager (or moved page manager) that created it.
#[repr(transparent)]
pub struct Handle<D> {
    memory: MovableMemory,
    _kind: PhantomData<fn() -> D>,
}

impl<D> Handle<D> {
    pub const INVALID: Handle<D> = Handle::from_memory(MovableMemory::NULL);

    pub(crate) const fn from_memory(memory: MovableMemory) -> Handle<D> {
        Handle {
            memory,
            _kind: PhantomData,
        }
    }

    pub(crate) const fn from_raw(raw: u32) -> Handle<D> {
        Handle::from_memory(MovableMemory(raw))
    }

    pub fn memory(&self) -> MovableMemory {
        self.memory
    }

    pub fn raw(&self) -> u32 {
        self.memory.0
    }

    pub fn is_invalid(&self) -> bool {
        self.memory.is_null()
    }
}

impl<D> Clone for Handle<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for Handle<D> {}

impl<D> PartialEq for Handle<D> {
    fn eq(&self, other: &Self) -> bool {
        self.memory == other.memory
    }
}

impl<D> Eq for Handle<D> {}

impl<D> std::hash::Hash for Handle<D> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.memory.hash(state)
    }
}

impl<D> Default for Handle<D> {
    fn default() -> Self {
        Handle::INVALID
    }
}

impl<D> std::fmt::Debug for Handle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = std::any::type_name::<D>();
        let name = name.rsplit("::").next().unwrap_or(name);
        write!(f, "Handle<{}>({:#x})", name, self.memory.0)
    }
}
