use super::region::raw_enum;
use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, DefinitionStore, GroupDef, LocationDef, MetricDef};

use serde::{Deserialize, Serialize};

raw_enum! {
    MetricOccurrence {
        SynchronousStrict,
        Synchronous,
        Asynchronous,
    }
}

/// What a scoped sampling set's values are valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Location(Handle<LocationDef>),
    Group(Handle<GroupDef>),
}

const SCOPE_LOCATION: u32 = 0;
const SCOPE_GROUP: u32 = 1;

impl Scope {
    fn to_raw(self) -> (u32, u32) {
        match self {
            Scope::Location(h) => (SCOPE_LOCATION, h.raw()),
            Scope::Group(h) => (SCOPE_GROUP, h.raw()),
        }
    }

    fn from_raw(scope_type: u32, scope: u32) -> Option<Scope> {
        match scope_type {
            SCOPE_LOCATION => Some(Scope::Location(Handle::from_raw(scope))),
            SCOPE_GROUP => Some(Scope::Group(Handle::from_raw(scope))),
            _ => None,
        }
    }
}

/// A set of metrics sampled together. Plain sets carry their metric handles
/// behind the record. Scoped sets reuse a plain set recorded by `recorder`
/// on behalf of `scope`.
#[repr(C)]
#[derive(Debug)]
pub struct SamplingSetDef {
    header: DefinitionHeader,
    is_scoped: u32,
    occurrence: u32,
    pub(crate) number_of_metrics: u32,
    sampling_set: Handle<SamplingSetDef>,
    recorder: Handle<LocationDef>,
    scope_type: u32,
    scope: u32,
}

#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SamplingSetKey {
    Plain {
        occurrence: u32,
        metrics: Vec<Handle<MetricDef>>,
    },
    Scoped {
        sampling_set: Handle<SamplingSetDef>,
        recorder: Handle<LocationDef>,
        scope: Scope,
    },
}

unsafe impl Definition for SamplingSetDef {
    const KIND: DefinitionKind = DefinitionKind::SamplingSet;
    type Key = SamplingSetKey;

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.sampling_set)
    }
}

impl SamplingSetDef {
    pub fn is_scoped(&self) -> bool {
        self.is_scoped != 0
    }

    pub fn occurrence(&self) -> Option<MetricOccurrence> {
        MetricOccurrence::from_raw(self.occurrence)
    }

    pub(crate) fn raw_occurrence(&self) -> u32 {
        self.occurrence
    }

    pub fn number_of_metrics(&self) -> u32 {
        self.number_of_metrics
    }

    /// The plain set behind a scoped set, invalid for plain sets.
    pub fn underlying_sampling_set(&self) -> Handle<SamplingSetDef> {
        self.sampling_set
    }

    pub fn recorder(&self) -> Handle<LocationDef> {
        self.recorder
    }

    pub fn scope(&self) -> Option<Scope> {
        if self.is_scoped() {
            Scope::from_raw(self.scope_type, self.scope)
        } else {
            None
        }
    }
}

impl DefinitionManager {
    pub fn define_sampling_set(
        &self,
        metrics: &[Handle<MetricDef>],
        occurrence: MetricOccurrence,
    ) -> Handle<SamplingSetDef> {
        self.define_sampling_set_raw(metrics, occurrence as u32)
    }

    pub(crate) fn define_sampling_set_raw(
        &self,
        metrics: &[Handle<MetricDef>],
        occurrence: u32,
    ) -> Handle<SamplingSetDef> {
        let mut fold = self
            .fold()
            .u32(0)
            .u32(occurrence)
            .u32(metrics.len() as u32);
        for metric in metrics {
            fold = fold.handle(self, *metric);
        }
        let bytes: Vec<u8> = metrics.iter().flat_map(|m| m.raw().to_ne_bytes()).collect();
        self.add_definition(
            SamplingSetDef {
                header: DefinitionHeader::new(fold.finish()),
                is_scoped: 0,
                occurrence,
                number_of_metrics: metrics.len() as u32,
                sampling_set: Handle::INVALID,
                recorder: Handle::INVALID,
                scope_type: 0,
                scope: 0,
            },
            &bytes,
            Some(SamplingSetKey::Plain {
                occurrence,
                metrics: metrics.to_vec(),
            }),
        )
    }

    pub fn define_scoped_sampling_set(
        &self,
        sampling_set: Handle<SamplingSetDef>,
        recorder: Handle<LocationDef>,
        scope: Scope,
    ) -> Handle<SamplingSetDef> {
        let underlying = self.get(sampling_set);
        crate::bug_on!(
            underlying.is_scoped(),
            "scoped sampling set on top of scoped sampling set {:?}",
            sampling_set
        );
        let (scope_type, scope_raw) = scope.to_raw();
        let fold = self
            .fold()
            .u32(1)
            .handle(self, sampling_set)
            .handle(self, recorder)
            .u32(scope_type);
        let fold = match scope {
            Scope::Location(h) => fold.handle(self, h),
            Scope::Group(h) => fold.handle(self, h),
        };
        self.add_definition(
            SamplingSetDef {
                header: DefinitionHeader::new(fold.finish()),
                is_scoped: 1,
                occurrence: underlying.occurrence,
                number_of_metrics: 0,
                sampling_set,
                recorder,
                scope_type,
                scope: scope_raw,
            },
            &[],
            Some(SamplingSetKey::Scoped {
                sampling_set,
                recorder,
                scope,
            }),
        )
    }
}
