//! Address keyed region cache used by compiler instrumentation.
//!
//! Instrumented functions report their entry address. The first report
//! resolves the address to a symbol, runs the filter and defines the region;
//! every later report is a lock-free table lookup.
mod symbols;

pub use symbols::{ResolvedAddress, SymbolInfo, SymbolResolver, SymbolTable};

use crate::definitions::{DefinitionManager, Handle, Paradigm, RegionDef, RegionType, INVALID_LINE};
use crate::filter::RegionFilter;
use crate::hashtab::{JenkinsState, NonMonotonicHashTable};

/// Identifies the shared object a symbol was found in, 0 is the executable.
pub type SoToken = u16;

const FUNC_ADDR_PAIRS_PER_CHUNK: usize = 3;
const FUNC_ADDR_BUCKETS: usize = 512;

lazy_static! {
    /// Measurement and tool internals are never recorded as compiler regions.
    static ref INTERNAL_PREFIXES: Vec<&'static str> = vec![
        "POMP",
        "Pomp",
        "pomp",
        "SCOREP_",
        "scorep_",
        "OTF2_",
        "otf2_",
        "cube_",
        "cubew_",
        ".omp.",
        ".omp_outlined.",
        ".nondebug_wrapper.",
    ];
    static ref INTERNAL_INFIXES: Vec<&'static str> = vec![
        "Kokkos::Tools",
        "Kokkos::Profiling",
        "6Kokkos5Tools",
        "6Kokkos9Profiling",
    ];
}

fn is_internal(demangled_name: &str) -> bool {
    INTERNAL_PREFIXES
        .iter()
        .any(|prefix| demangled_name.starts_with(prefix))
        || INTERNAL_INFIXES
            .iter()
            .any(|infix| demangled_name.contains(infix))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncAddrEntry {
    pub region: Handle<RegionDef>,
    pub so_token: SoToken,
}

type FuncAddrTable =
    NonMonotonicHashTable<usize, FuncAddrEntry, JenkinsState, FUNC_ADDR_PAIRS_PER_CHUNK, FUNC_ADDR_BUCKETS>;

pub struct FuncAddrCache {
    table: FuncAddrTable,
    resolver: Box<dyn SymbolResolver>,
}

impl std::fmt::Debug for FuncAddrCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncAddrCache")
            .field("entries", &self.table.len())
            .finish()
    }
}

impl FuncAddrCache {
    pub fn new(resolver: impl SymbolResolver + 'static) -> FuncAddrCache {
        FuncAddrCache::with_resolver(Box::new(resolver))
    }

    pub fn with_resolver(resolver: Box<dyn SymbolResolver>) -> FuncAddrCache {
        FuncAddrCache {
            table: FuncAddrTable::new(),
            resolver,
        }
    }

    fn resolve(
        &self,
        address: usize,
        definitions: &DefinitionManager,
        filter: &dyn RegionFilter,
    ) -> FuncAddrEntry {
        let resolved = self.resolver.lookup_addr(address);
        let mut entry = FuncAddrEntry {
            region: Handle::FILTERED,
            so_token: resolved.so_token,
        };
        let symbol = match resolved.symbol {
            Some(symbol) if address != 0 => symbol,
            _ => {
                tracing::trace!("no symbol for address {:#x}", address);
                return entry;
            }
        };
        let demangled = symbol.demangled_name();
        if is_internal(demangled)
            || filter.is_filtered(symbol.file.as_deref(), demangled, Some(&symbol.name))
        {
            tracing::trace!("address {:#x} filtered: {}({})", address, demangled, symbol.name);
            return entry;
        }
        entry.region = definitions.define_region(
            demangled,
            Some(&symbol.name),
            symbol.file.as_deref(),
            symbol.line,
            INVALID_LINE,
            Paradigm::Compiler,
            RegionType::Function,
        );
        tracing::trace!(
            "address {:#x} used: {}({})@{}:{}",
            address,
            demangled,
            symbol.name,
            symbol.file.as_deref().unwrap_or("<unknown>"),
            symbol.line
        );
        entry
    }

    /// The region of the function starting at `address`, defining it on
    /// first use. Unresolvable, internal and filtered functions map to
    /// [`Handle::FILTERED`].
    pub fn get_and_insert_func_addr(
        &self,
        address: usize,
        definitions: &DefinitionManager,
        filter: &dyn RegionFilter,
    ) -> Handle<RegionDef> {
        let (entry, _) = self
            .table
            .get_and_insert(address, |address| self.resolve(*address, definitions, filter));
        entry.region
    }

    pub fn get(&self, address: usize) -> Option<FuncAddrEntry> {
        self.table.get(&address)
    }

    /// Forgets every address of the unloaded shared object `so_token`, so a
    /// later object mapped at the same addresses is resolved anew.
    pub fn dlclose(&self, so_token: SoToken) -> usize {
        let removed = self.table.remove_if(|address, entry| {
            let matches = entry.so_token == so_token;
            if matches {
                tracing::trace!("remove {:#x}: {:?}", address, entry.region);
            }
            matches
        });
        tracing::debug!("removed {} address(es) of shared object {}", removed, so_token);
        removed
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::DefinitionStore;
    use crate::filter::FilterRules;

    const NM: &str = "\
0000000000001000 T main\t/src/main.c:10
0000000000001100 T _Z3foov\t/src/foo.cpp:3
0000000000001200 T scorep_internal\t/src/scorep.c:1
0000000000001300 t _ZN6Kokkos5Tools4initEv
0000000000001400 T filtered_away\t/src/main.c:40
                 U printf
";

    fn setup() -> (FuncAddrCache, DefinitionManager, FilterRules) {
        let mut table = SymbolTable::from_nm_output(NM);
        table.set_demangled(0x1100, "foo()");
        let filter = FilterRules::parse(
            "SCOREP_REGION_NAMES_BEGIN EXCLUDE filtered_* SCOREP_REGION_NAMES_END",
        )
        .unwrap();
        (
            FuncAddrCache::new(table),
            DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap()),
            filter,
        )
    }

    #[test]
    fn resolves_once_per_address() {
        let (cache, defs, filter) = setup();
        let main = cache.get_and_insert_func_addr(0x1000, &defs, &filter);
        assert!(!main.is_filtered());
        assert_eq!(cache.get_and_insert_func_addr(0x1000, &defs, &filter), main);
        let region = defs.get(main);
        assert_eq!(defs.string(region.name()), "main");
        assert_eq!(region.begin_line(), 10);
        assert_eq!(region.paradigm(), Some(Paradigm::Compiler));

        let foo = defs.get(cache.get_and_insert_func_addr(0x1100, &defs, &filter));
        assert_eq!(defs.string(foo.name()), "foo()");
        assert_eq!(defs.string(foo.canonical_name()), "_Z3foov");
        assert_eq!(defs.count::<RegionDef>(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn internal_unknown_and_filtered_addresses() {
        let (cache, defs, filter) = setup();
        for address in [0x1200, 0x1300, 0x1400, 0x9999, 0] {
            assert!(cache
                .get_and_insert_func_addr(address, &defs, &filter)
                .is_filtered());
        }
        assert_eq!(defs.count::<RegionDef>(), 0);
        // filtered results are cached too
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn dlclose_drops_the_objects_addresses() {
        let mut table = SymbolTable::from_nm_output(NM);
        table.insert_nm_output(3, "0000000000002000 T plugin_fn\t/src/plugin.c:1\n");
        let cache = FuncAddrCache::new(table);
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let filter = FilterRules::default();
        cache.get_and_insert_func_addr(0x1000, &defs, &filter);
        cache.get_and_insert_func_addr(0x2000, &defs, &filter);
        assert_eq!(cache.get(0x2000).map(|e| e.so_token), Some(3));
        assert_eq!(cache.dlclose(3), 1);
        assert!(cache.get(0x2000).is_none());
        assert!(cache.get(0x1000).is_some());
        assert_eq!(cache.dlclose(3), 0);
    }

    #[test]
    fn internal_names() {
        assert!(is_internal("POMP2_Parallel_fork"));
        assert!(is_internal(".omp_outlined._debug__"));
        assert!(is_internal("void Kokkos::Tools::initialize()"));
        assert!(!is_internal("compute_pomp"));
        assert!(!is_internal("main"));
    }
}
