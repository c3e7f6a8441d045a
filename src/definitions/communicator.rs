use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, GroupDef, Paradigm, StringDef};

use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const UNNAMED_COMMUNICATOR: &str = "<unnamed communicator>";

/// A communicator with its final identity: member group, name and parent.
#[repr(C)]
#[derive(Debug)]
pub struct CommunicatorDef {
    header: DefinitionHeader,
    group: Handle<GroupDef>,
    name: Handle<StringDef>,
    parent: Handle<CommunicatorDef>,
}

unsafe impl Definition for CommunicatorDef {
    const KIND: DefinitionKind = DefinitionKind::Communicator;
    type Key = (Handle<GroupDef>, Handle<StringDef>, Handle<CommunicatorDef>);

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.communicator)
    }
}

impl CommunicatorDef {
    pub fn group(&self) -> Handle<GroupDef> {
        self.group
    }

    pub fn name(&self) -> Handle<StringDef> {
        self.name
    }

    pub fn parent(&self) -> Handle<CommunicatorDef> {
        self.parent
    }
}

/// Adapter specific data stored behind an interim communicator.
///
/// # Safety
/// Implementors are plain old data without padding bytes: every bit pattern
/// copied from a stored payload must be a valid value.
pub unsafe trait Payload: Copy + Send + Sync + 'static {}

/// A communicator as seen by one process while measuring. Its global
/// identity is only known after unification.
#[repr(C)]
#[derive(Debug)]
pub struct InterimCommunicatorDef {
    header: DefinitionHeader,
    name: AtomicU32,
    parent: Handle<InterimCommunicatorDef>,
    paradigm: u32,
    pub(crate) payload_size: u32,
}

unsafe impl Definition for InterimCommunicatorDef {
    const KIND: DefinitionKind = DefinitionKind::InterimCommunicator;
    type Key = ();

    fn table(_tables: &DedupTables) -> Option<&DefTable<Self>> {
        None
    }
}

impl InterimCommunicatorDef {
    pub fn name(&self) -> Handle<StringDef> {
        Handle::from_raw(self.name.load(Ordering::Acquire))
    }

    pub fn parent(&self) -> Handle<InterimCommunicatorDef> {
        self.parent
    }

    pub fn paradigm(&self) -> Option<Paradigm> {
        Paradigm::from_raw(self.paradigm)
    }

    pub fn payload_size(&self) -> u32 {
        self.payload_size
    }
}

impl DefinitionManager {
    /// Defines (or finds) a communicator. Without a name it is called
    /// `"<unnamed communicator>"`.
    pub fn new_communicator(
        &self,
        group: Handle<GroupDef>,
        name: Option<&str>,
        parent: Handle<CommunicatorDef>,
    ) -> Handle<CommunicatorDef> {
        let name = self.new_string(name.unwrap_or(UNNAMED_COMMUNICATOR));
        let key = (group, name, parent);
        self.add_communicator(group, name, parent, Some(key))
    }

    /// Defines a communicator without looking for an equal one. Distinct
    /// global communicators may share group, name and parent.
    pub(crate) fn append_communicator(
        &self,
        group: Handle<GroupDef>,
        name: Handle<StringDef>,
        parent: Handle<CommunicatorDef>,
    ) -> Handle<CommunicatorDef> {
        self.add_communicator(group, name, parent, None)
    }

    fn add_communicator(
        &self,
        group: Handle<GroupDef>,
        name: Handle<StringDef>,
        parent: Handle<CommunicatorDef>,
        key: Option<<CommunicatorDef as Definition>::Key>,
    ) -> Handle<CommunicatorDef> {
        let hash_value = self
            .fold()
            .handle(self, group)
            .handle(self, name)
            .handle(self, parent)
            .finish();
        self.add_definition(
            CommunicatorDef {
                header: DefinitionHeader::new(hash_value),
                group,
                name,
                parent,
            },
            &[],
            key,
        )
    }

    /// Defines a new interim communicator carrying a copy of `payload`.
    /// Interim communicators are never merged.
    pub fn define_interim_communicator<P: Payload>(
        &self,
        parent: Handle<InterimCommunicatorDef>,
        paradigm: Paradigm,
        payload: &P,
    ) -> Handle<InterimCommunicatorDef> {
        let size = std::mem::size_of::<P>();
        let bytes = unsafe { std::slice::from_raw_parts(payload as *const P as *const u8, size) };
        let hash_value = self
            .fold()
            .handle(self, parent)
            .u32(paradigm as u32)
            .bytes(bytes)
            .finish();
        self.add_definition(
            InterimCommunicatorDef {
                header: DefinitionHeader::new(hash_value),
                name: AtomicU32::new(Handle::<StringDef>::INVALID.raw()),
                parent,
                paradigm: paradigm as u32,
                payload_size: size as u32,
            },
            bytes,
            None,
        )
    }

    /// Names an interim communicator. Only the first name sticks, later
    /// calls return `false`.
    pub fn set_interim_communicator_name(
        &self,
        handle: Handle<InterimCommunicatorDef>,
        name: &str,
    ) -> bool {
        use super::DefinitionStore;

        let name = self.new_string(name);
        self.get(handle)
            .name
            .compare_exchange(
                Handle::<StringDef>::INVALID.raw(),
                name.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::{DefinitionStore, GroupType};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct TestPayload {
        root: u32,
        flags: u32,
    }
    unsafe impl Payload for TestPayload {}

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    struct Wide(u64);
    unsafe impl Payload for Wide {}

    fn manager() -> DefinitionManager {
        DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap())
    }

    #[test]
    fn communicators_dedup_on_group_name_parent() {
        let defs = manager();
        let world = defs.define_group_from_u32(GroupType::MpiGroup, "", &[0, 1]);
        let a = defs.new_communicator(world, None, Handle::INVALID);
        assert_eq!(defs.new_communicator(world, None, Handle::INVALID), a);
        let b = defs.new_communicator(world, Some("dup"), Handle::INVALID);
        let c = defs.new_communicator(world, None, a);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(defs.string(defs.get(a).name()), "<unnamed communicator>");
        assert_eq!(defs.get(c).parent(), a);

        let appended = defs.append_communicator(world, defs.get(a).name(), Handle::INVALID);
        assert_ne!(appended, a);
        assert_eq!(defs.count::<CommunicatorDef>(), 4);
    }

    #[test]
    fn interim_communicators_are_never_merged() {
        let defs = manager();
        let payload = TestPayload { root: 3, flags: 1 };
        let a = defs.define_interim_communicator(Handle::INVALID, Paradigm::Mpi, &payload);
        let b = defs.define_interim_communicator(Handle::INVALID, Paradigm::Mpi, &payload);
        assert_ne!(a, b);
        assert_eq!(defs.interim_communicator_payload::<TestPayload>(b), payload);
        assert_eq!(defs.get(a).payload_size(), 8);
        assert_eq!(defs.get(b).header().sequence_number(), 1);
    }

    #[test]
    fn interim_name_is_set_once() {
        let defs = manager();
        let comm = defs.define_interim_communicator(
            Handle::INVALID,
            Paradigm::Mpi,
            &TestPayload { root: 0, flags: 0 },
        );
        assert!(defs.get(comm).name().is_invalid());
        assert!(defs.set_interim_communicator_name(comm, "solver"));
        assert!(!defs.set_interim_communicator_name(comm, "other"));
        assert_eq!(defs.string(defs.get(comm).name()), "solver");
    }

    #[test]
    #[should_panic(expected = "payload size mismatch")]
    fn payload_type_mismatch_is_a_bug() {
        let defs = manager();
        let comm = defs.define_interim_communicator(
            Handle::INVALID,
            Paradigm::Mpi,
            &TestPayload { root: 0, flags: 0 },
        );
        defs.interim_communicator_payload::<Wide>(comm);
    }
}
