use super::{Definition, DefinitionStore, Handle};
use crate::allocator::MovableMemory;

use std::marker::PhantomData;

/// Walks the creation list of one definition type.
pub struct DefinitionIter<'a, S: ?Sized, D> {
    store: &'a S,
    next: MovableMemory,
    _kind: PhantomData<fn() -> D>,
}

impl<'a, S: DefinitionStore, D: Definition> DefinitionIter<'a, S, D> {
    pub(crate) fn new(store: &'a S) -> DefinitionIter<'a, S, D> {
        DefinitionIter {
            store,
            next: store.list(D::KIND).head,
            _kind: PhantomData,
        }
    }
}

impl<'a, S: DefinitionStore, D: Definition> Iterator for DefinitionIter<'a, S, D> {
    type Item = (Handle<D>, &'a D);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        let handle = Handle::from_memory(self.next);
        let definition: &'a D = self.store.get(handle);
        self.next = MovableMemory(definition.header().next_raw());
        Some((handle, definition))
    }
}
