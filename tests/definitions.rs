use scorep_core::definitions::{
    Definition, DefinitionManager, DefinitionStore, GroupDef, GroupType, Handle, MetricMode, MetricOccurrence,
    MetricSource, MetricValueType, Paradigm, RegionDef, RegionType, RemoteDefinitions,
    SamplingSetDef, StringDef,
};
use scorep_core::hashtab::jenkins;
use scorep_core::Allocator;

use rayon::prelude::*;

use std::collections::HashSet;

fn colliding(_: &[u8], _: u32) -> u32 {
    42
}

fn name(i: usize) -> String {
    // every tenth name is longer than a small page
    if i % 10 == 9 {
        format!("{}_{}", "x".repeat(700), i)
    } else {
        format!("region_{}", i)
    }
}

/// All threads define the same regions in different orders; every name must
/// be defined exactly once and every thread must get the same handle.
fn concurrent_dedup(page_size: u32, threads: usize, hash_fn: fn(&[u8], u32) -> u32, regions: usize) {
    let defs = DefinitionManager::with_hash_fn(Allocator::new(1 << 24, page_size).unwrap(), hash_fn);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .unwrap();
    let handles: Vec<Vec<Handle<RegionDef>>> = pool.install(|| {
        (0..threads)
            .into_par_iter()
            .map(|t| {
                let mut handles = vec![Handle::INVALID; regions];
                for step in 0..regions {
                    let i = (step * 7 + t * 13) % regions;
                    handles[i] = defs.define_region(
                        &name(i),
                        None,
                        Some("file.c"),
                        i as u32,
                        i as u32 + 1,
                        Paradigm::User,
                        RegionType::Function,
                    );
                }
                handles
            })
            .collect()
    });
    for per_thread in &handles[1..] {
        assert_eq!(per_thread, &handles[0]);
    }
    assert_eq!(defs.count::<RegionDef>() as usize, regions);
    let distinct: HashSet<_> = handles[0].iter().collect();
    assert_eq!(distinct.len(), regions);
    for (i, handle) in handles[0].iter().enumerate() {
        let region = defs.get(*handle);
        assert_eq!(defs.string(region.name()), name(i));
        assert_eq!(region.begin_line(), i as u32);
    }
    let sequence_numbers: Vec<u32> = defs
        .iter::<RegionDef>()
        .map(|(_, r)| r.header().sequence_number())
        .collect();
    assert_eq!(sequence_numbers, (0..regions as u32).collect::<Vec<_>>());
}

macro_rules! create_test {
    ( $hash:ident, $page_size:expr, $threads:expr, $regions:expr) => {
        paste::paste! {
            #[test]
            #[allow(non_snake_case)]
            fn [<$hash _ $page_size _ $threads _ $regions __dedup>](){
                concurrent_dedup($page_size, $threads, $hash, $regions);
            }
        }
    };
}

macro_rules! iter_regions {
    ( $hash:ident, $page_size:expr, $threads:expr, ($($regions:expr),*)) => {
        $(
            create_test!($hash, $page_size, $threads, $regions);
        )*
    };
}

macro_rules! iter_threads {
    ( $hash:ident, $page_size:expr, ($($threads:expr),*), $regions:tt) => {
        $(
            iter_regions!($hash, $page_size, $threads, $regions);
        )*
    };
}

macro_rules! iter_page_sizes {
    ( $hash:ident, ($($page_size:expr),*), $threads:tt, $regions:tt) => {
        $(
            iter_threads!($hash, $page_size, $threads, $regions);
        )*
    };
}

macro_rules! create_dedup_tests {
    ( ($($hash:ident),*), $page_sizes:tt, $threads:tt, $regions:tt) => {
        $(iter_page_sizes!($hash, $page_sizes, $threads, $regions);)*
    };
}

fn jenkins_hash(bytes: &[u8], init: u32) -> u32 {
    jenkins::hash(bytes, init)
}

create_dedup_tests!((jenkins_hash, colliding), (512, 8192), (1, 4, 8), (20, 400));

#[test]
fn shipped_pages_read_like_the_original() {
    let allocator = Allocator::new(1 << 22, 1024).unwrap();
    let defs = DefinitionManager::new(allocator.clone());
    let metric = defs.define_metric(
        "instructions",
        "retired instructions",
        "#",
        MetricSource::Papi,
        MetricMode::AccumulatedStart,
        MetricValueType::Uint64,
    );
    defs.define_sampling_set(&[metric], MetricOccurrence::Synchronous);
    defs.define_group(GroupType::Locations, "threads", &[0, 1, 2, 3, 4, 5]);
    for i in 0..200 {
        defs.new_string(&name(i));
    }

    let pages = defs.page_contents();
    assert_eq!(pages.len(), defs.number_of_used_pages());
    let remote = RemoteDefinitions::new(allocator, defs.lists(), pages).unwrap();

    let local: Vec<&str> = defs.iter::<StringDef>().map(|(h, _)| defs.string(h)).collect();
    let shipped: Vec<&str> = remote.iter::<StringDef>().map(|(h, _)| remote.string(h)).collect();
    assert_eq!(local, shipped);
    assert_eq!(remote.count::<StringDef>(), defs.count::<StringDef>());

    let (group, _) = remote
        .iter::<GroupDef>()
        .next()
        .unwrap();
    assert_eq!(remote.group_members(group), &[0, 1, 2, 3, 4, 5]);
    let (set, _) = remote
        .iter::<SamplingSetDef>()
        .next()
        .unwrap();
    let metrics = remote.sampling_set_metrics(set);
    assert_eq!(metrics.len(), 1);
    assert_eq!(remote.string(remote.get(metrics[0]).name()), "instructions");
}

#[test]
#[should_panic(expected = "definition memory exhausted")]
fn exhausted_memory_is_fatal() {
    let defs = DefinitionManager::new(Allocator::new(8192, 1024).unwrap());
    for i in 0..10_000 {
        defs.new_string(&name(i));
    }
}
