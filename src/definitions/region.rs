use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, SourceFileDef, StringDef};

use serde::{Deserialize, Serialize};

/// Line number of regions without source information.
pub const INVALID_LINE: u32 = 0;

macro_rules! raw_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            const VARIANTS: &'static [$name] = &[$($name::$variant),*];

            pub fn from_raw(raw: u32) -> Option<$name> {
                $name::VARIANTS.get(raw as usize).copied()
            }
        }
    };
}
pub(crate) use raw_enum;

raw_enum! {
    /// The instrumentation layer a definition originates from.
    Paradigm {
        Measurement,
        User,
        Compiler,
        Sampling,
        Memory,
        Libwrap,
        Mpi,
        Shmem,
        Openmp,
        Pthread,
        Cuda,
        Opencl,
        Openacc,
        Io,
        Kokkos,
        Hip,
    }
}

raw_enum! {
    RegionType {
        Unknown,
        Function,
        Loop,
        User,
        Code,
        Phase,
        Dynamic,
        DynamicPhase,
        DynamicLoop,
        DynamicFunction,
        DynamicLoopPhase,
        Point2Point,
        CollOne2All,
        CollAll2One,
        CollAll2All,
        CollOther,
        Barrier,
        Parallel,
        Wrapper,
        Artificial,
        ThreadCreate,
        ThreadWait,
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct RegionDef {
    header: DefinitionHeader,
    name: Handle<StringDef>,
    canonical_name: Handle<StringDef>,
    description: Handle<StringDef>,
    file: Handle<SourceFileDef>,
    begin_line: u32,
    end_line: u32,
    paradigm: u32,
    region_type: u32,
}

#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey {
    name: Handle<StringDef>,
    canonical_name: Handle<StringDef>,
    description: Handle<StringDef>,
    file: Handle<SourceFileDef>,
    begin_line: u32,
    end_line: u32,
    paradigm: u32,
    region_type: u32,
}

unsafe impl Definition for RegionDef {
    const KIND: DefinitionKind = DefinitionKind::Region;
    type Key = RegionKey;

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.region)
    }
}

impl Handle<RegionDef> {
    /// Returned for regions the filter excluded. Entering or leaving it
    /// records nothing.
    pub const FILTERED: Handle<RegionDef> = Handle::from_raw(u32::MAX);

    pub fn is_filtered(&self) -> bool {
        *self == Handle::<RegionDef>::FILTERED
    }
}

impl RegionDef {
    pub fn name(&self) -> Handle<StringDef> {
        self.name
    }

    pub fn canonical_name(&self) -> Handle<StringDef> {
        self.canonical_name
    }

    pub fn description(&self) -> Handle<StringDef> {
        self.description
    }

    pub fn file(&self) -> Handle<SourceFileDef> {
        self.file
    }

    pub fn begin_line(&self) -> u32 {
        self.begin_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn paradigm(&self) -> Option<Paradigm> {
        Paradigm::from_raw(self.paradigm)
    }

    pub fn region_type(&self) -> Option<RegionType> {
        RegionType::from_raw(self.region_type)
    }

    pub(crate) fn key(&self) -> RegionKey {
        RegionKey {
            name: self.name,
            canonical_name: self.canonical_name,
            description: self.description,
            file: self.file,
            begin_line: self.begin_line,
            end_line: self.end_line,
            paradigm: self.paradigm,
            region_type: self.region_type,
        }
    }
}

impl RegionKey {
    /// The same region content with every handle replaced by `map(handle)`.
    pub(crate) fn map_handles(
        &self,
        strings: impl Fn(Handle<StringDef>) -> Handle<StringDef>,
        files: impl Fn(Handle<SourceFileDef>) -> Handle<SourceFileDef>,
    ) -> RegionKey {
        RegionKey {
            name: strings(self.name),
            canonical_name: strings(self.canonical_name),
            description: strings(self.description),
            file: files(self.file),
            ..self.clone()
        }
    }
}

impl DefinitionManager {
    /// Defines (or finds) a region. `canonical_name` defaults to `name`.
    #[allow(clippy::too_many_arguments)]
    pub fn define_region(
        &self,
        name: &str,
        canonical_name: Option<&str>,
        file: Option<&str>,
        begin_line: u32,
        end_line: u32,
        paradigm: Paradigm,
        region_type: RegionType,
    ) -> Handle<RegionDef> {
        let name_handle = self.new_string(name);
        let canonical_name = match canonical_name {
            Some(canonical) => self.new_string(canonical),
            None => name_handle,
        };
        let file = file.map_or(Handle::INVALID, |file| self.new_source_file(file));
        self.define_region_with_key(RegionKey {
            name: name_handle,
            canonical_name,
            description: self.new_string(""),
            file,
            begin_line,
            end_line,
            paradigm: paradigm as u32,
            region_type: region_type as u32,
        })
    }

    pub(crate) fn define_region_with_key(&self, key: RegionKey) -> Handle<RegionDef> {
        let hash_value = self
            .fold()
            .handle(self, key.name)
            .handle(self, key.canonical_name)
            .handle(self, key.description)
            .handle(self, key.file)
            .u32(key.begin_line)
            .u32(key.end_line)
            .u32(key.paradigm)
            .u32(key.region_type)
            .finish();
        self.add_definition(
            RegionDef {
                header: DefinitionHeader::new(hash_value),
                name: key.name,
                canonical_name: key.canonical_name,
                description: key.description,
                file: key.file,
                begin_line: key.begin_line,
                end_line: key.end_line,
                paradigm: key.paradigm,
                region_type: key.region_type,
            },
            &[],
            Some(key),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::DefinitionStore;

    use std::sync::Arc;

    #[test]
    fn region_fields_round_trip() {
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let region = defs.define_region(
            "_Z3foov",
            Some("foo()"),
            Some("foo.cpp"),
            10,
            20,
            Paradigm::Compiler,
            RegionType::Function,
        );
        let def = defs.get(region);
        assert_eq!(defs.string(def.name()), "_Z3foov");
        assert_eq!(defs.string(def.canonical_name()), "foo()");
        assert_eq!(defs.string(def.description()), "");
        assert_eq!(defs.string(defs.get(def.file()).name()), "foo.cpp");
        assert_eq!((def.begin_line(), def.end_line()), (10, 20));
        assert_eq!(def.paradigm(), Some(Paradigm::Compiler));
        assert_eq!(def.region_type(), Some(RegionType::Function));
    }

    #[test]
    fn any_differing_field_makes_a_new_region() {
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let base = defs.define_region("f", None, None, 1, 2, Paradigm::User, RegionType::User);
        assert_eq!(
            defs.define_region("f", None, None, 1, 2, Paradigm::User, RegionType::User),
            base
        );
        let variants = [
            defs.define_region("f", None, None, 1, 3, Paradigm::User, RegionType::User),
            defs.define_region("f", None, Some("f.c"), 1, 2, Paradigm::User, RegionType::User),
            defs.define_region("f", Some("g"), None, 1, 2, Paradigm::User, RegionType::User),
            defs.define_region("f", None, None, 1, 2, Paradigm::Compiler, RegionType::User),
            defs.define_region("f", None, None, 1, 2, Paradigm::User, RegionType::Loop),
        ];
        for v in variants {
            assert_ne!(v, base);
        }
        assert_eq!(defs.count::<RegionDef>(), 6);
    }

    #[test]
    fn concurrent_definers_get_one_region() {
        let defs = Arc::new(DefinitionManager::new(Allocator::new(1 << 22, 4096).unwrap()));
        let handles: Vec<_> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let defs = &defs;
                    s.spawn(move || {
                        (0..100)
                            .map(|i| {
                                defs.define_region(
                                    &format!("r{}", i % 10),
                                    None,
                                    Some("shared.c"),
                                    i % 10,
                                    0,
                                    Paradigm::User,
                                    RegionType::Function,
                                )
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        for per_thread in &handles[1..] {
            assert_eq!(per_thread, &handles[0]);
        }
        assert_eq!(defs.count::<RegionDef>(), 10);
        let seqs: Vec<u32> = defs
            .iter::<RegionDef>()
            .map(|(_, d)| d.header().sequence_number())
            .collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn raw_enum_conversion() {
        assert_eq!(Paradigm::from_raw(Paradigm::Mpi as u32), Some(Paradigm::Mpi));
        assert_eq!(RegionType::from_raw(1000), None);
        assert!(Handle::<RegionDef>::FILTERED.is_filtered());
        assert!(!Handle::<RegionDef>::INVALID.is_filtered());
    }
}
