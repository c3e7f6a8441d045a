use crate::definitions::{
    CommunicatorDef, Definition, DefinitionKind, DefinitionManager, DefinitionStore, GroupDef,
    Handle, LocationDef, MetricDef, RegionDef, SamplingSetDef, Scope, SourceFileDef, StringDef,
};

/// `sequence_number -> unified sequence_number`, per definition kind.
pub type Mappings = Vec<Option<Vec<u32>>>;

/// The unified counterpart of `handle`, which has to be copied already.
fn unified_of<S: DefinitionStore, D: Definition>(source: &S, handle: Handle<D>) -> Handle<D> {
    if handle.is_invalid() {
        return Handle::INVALID;
    }
    let unified = source.get(handle).header().unified::<D>();
    crate::bug_on!(
        unified.is_invalid(),
        "{:?} referenced before it was unified",
        handle
    );
    unified
}

fn copy_all<S, D>(
    source: &S,
    unified: &DefinitionManager,
    mut copy: impl FnMut(Handle<D>, &D) -> Handle<D>,
) -> Vec<u32>
where
    S: DefinitionStore,
    D: Definition,
{
    source
        .iter::<D>()
        .map(|(handle, definition)| {
            let copied = copy(handle, definition);
            definition.header().set_unified(copied);
            unified.get(copied).header().sequence_number()
        })
        .collect()
}

/// Copies every definition of `source` into `unified`, referenced types
/// first, and returns the mapping of every copied kind.
///
/// Interim communicators are left out; their identity is decided by the
/// communicator protocol.
pub fn copy_definitions<S: DefinitionStore>(source: &S, unified: &DefinitionManager) -> Mappings {
    let mut mappings: Mappings = vec![None; DefinitionKind::COUNT];
    let mut set = |kind: DefinitionKind, mapping: Vec<u32>| {
        tracing::trace!("copied {} {:?} definitions", mapping.len(), kind);
        mappings[kind.index()] = Some(mapping);
    };

    set(
        DefinitionKind::String,
        copy_all::<S, StringDef>(source, unified, |h, _| unified.new_string(source.string(h))),
    );
    set(
        DefinitionKind::SourceFile,
        copy_all::<S, SourceFileDef>(source, unified, |_, d| {
            unified.new_source_file_with_name(unified_of(source, d.name()))
        }),
    );
    set(
        DefinitionKind::Location,
        copy_all::<S, LocationDef>(source, unified, |_, d| {
            unified.define_location_raw(
                d.global_location_id(),
                unified_of(source, d.name()),
                d.raw_location_type(),
            )
        }),
    );
    set(
        DefinitionKind::Region,
        copy_all::<S, RegionDef>(source, unified, |_, d| {
            let key = d
                .key()
                .map_handles(|s| unified_of(source, s), |f| unified_of(source, f));
            unified.define_region_with_key(key)
        }),
    );
    set(
        DefinitionKind::Group,
        copy_all::<S, GroupDef>(source, unified, |h, d| {
            unified.define_group_raw(
                d.raw_group_type(),
                unified_of(source, d.name()),
                source.group_members(h),
            )
        }),
    );
    set(
        DefinitionKind::Metric,
        copy_all::<S, MetricDef>(source, unified, |_, d| {
            unified.define_metric_with_key(d.key().map_strings(|s| unified_of(source, s)))
        }),
    );
    set(
        DefinitionKind::SamplingSet,
        copy_all::<S, SamplingSetDef>(source, unified, |h, d| {
            if d.is_scoped() {
                let scope = match d.scope() {
                    Some(Scope::Location(l)) => Scope::Location(unified_of(source, l)),
                    Some(Scope::Group(g)) => Scope::Group(unified_of(source, g)),
                    None => crate::bug!("scoped {:?} without a valid scope", h),
                };
                unified.define_scoped_sampling_set(
                    unified_of(source, d.underlying_sampling_set()),
                    unified_of(source, d.recorder()),
                    scope,
                )
            } else {
                let metrics: Vec<Handle<MetricDef>> = source
                    .sampling_set_metrics(h)
                    .iter()
                    .map(|m| unified_of(source, *m))
                    .collect();
                unified.define_sampling_set_raw(&metrics, d.raw_occurrence())
            }
        }),
    );
    set(
        DefinitionKind::Communicator,
        copy_all::<S, CommunicatorDef>(source, unified, |_, d| {
            unified.append_communicator(
                unified_of(source, d.group()),
                unified_of(source, d.name()),
                unified_of(source, d.parent()),
            )
        }),
    );
    mappings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::{
        GroupType, LocationType, MetricMode, MetricOccurrence, MetricSource, MetricValueType,
        Paradigm, RegionType,
    };

    fn populate(defs: &DefinitionManager, rank: u64) {
        defs.define_location(rank << 32, "Master thread", LocationType::CpuThread);
        defs.define_region("main", None, Some("main.c"), 1, 100, Paradigm::User, RegionType::Function);
        defs.define_region(
            &format!("only on {}", rank),
            None,
            None,
            0,
            0,
            Paradigm::Compiler,
            RegionType::Function,
        );
        let m = defs.define_metric(
            "cycles",
            "",
            "#",
            MetricSource::Papi,
            MetricMode::AccumulatedStart,
            MetricValueType::Uint64,
        );
        defs.define_sampling_set(&[m], MetricOccurrence::Synchronous);
        let g = defs.define_group(GroupType::Locations, "", &[rank]);
        defs.new_communicator(g, Some("comm"), Handle::INVALID);
    }

    #[test]
    fn copies_merge_equal_content() {
        let allocator = Allocator::new(1 << 22, 4096).unwrap();
        let unified = DefinitionManager::new(allocator.clone());
        let first = DefinitionManager::new(allocator.clone());
        let second = DefinitionManager::new(allocator);
        populate(&first, 0);
        populate(&second, 1);

        let m1 = copy_definitions(&first, &unified);
        let m2 = copy_definitions(&second, &unified);

        let regions = |m: &Mappings| m[DefinitionKind::Region.index()].clone().unwrap();
        assert_eq!(regions(&m1), vec![0, 1]);
        assert_eq!(regions(&m2), vec![0, 2]);
        assert_eq!(unified.count::<RegionDef>(), 3);
        assert_eq!(unified.count::<MetricDef>(), 1);
        assert_eq!(unified.count::<SamplingSetDef>(), 1);
        // locations and groups differ per rank
        assert_eq!(unified.count::<LocationDef>(), 2);
        assert_eq!(unified.count::<GroupDef>(), 2);
        assert_eq!(unified.count::<CommunicatorDef>(), 2);
        assert!(m1[DefinitionKind::InterimCommunicator.index()].is_none());

        for (handle, def) in second.iter::<RegionDef>() {
            let copy = unified.get(def.header().unified::<RegionDef>());
            assert_eq!(unified.string(copy.name()), second.string(def.name()));
            assert_eq!(
                copy.header().hash_value(),
                second.get(handle).header().hash_value()
            );
        }
    }
}
