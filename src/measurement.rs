//! The measurement context handed to instrumentation adapters.
use crate::allocator::{AllocResult, Allocator};
use crate::definitions::{
    DefinitionManager, Handle, HashFn, InterimCommunicatorDef, Paradigm, RegionDef, RegionType,
};
use crate::env_var::config;
use crate::filter::{FilterRules, RegionFilter};
use crate::func_addr::{FuncAddrCache, SoToken, SymbolResolver, SymbolTable};
use crate::hashtab::jenkins;
use crate::ipc::Ipc;
use crate::location::Location;
use crate::unify::{unify, CommunicatorCounters, UnificationResult};

use parking_lot::Mutex;
use thread_local::ThreadLocal;

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::thread::ThreadId;

/// Builds a [`Measurement`], starting from the `SCOREP_*` environment
/// configuration.
///
/// ```
/// use scorep_core::MeasurementBuilder;
///
/// let measurement = MeasurementBuilder::new()
///     .with_memory(1 << 22)
///     .with_page_size(4096)
///     .build()
///     .unwrap();
/// ```
pub struct MeasurementBuilder {
    total_memory: u32,
    page_size: u32,
    filtering_file: Option<String>,
    filter: Option<Box<dyn RegionFilter>>,
    ipc: Option<Ipc>,
    symbols: Option<Box<dyn SymbolResolver>>,
    hash_fn: HashFn,
}

impl Default for MeasurementBuilder {
    fn default() -> Self {
        MeasurementBuilder::new()
    }
}

impl MeasurementBuilder {
    #[tracing::instrument(skip_all)]
    pub fn new() -> MeasurementBuilder {
        let config = config();
        MeasurementBuilder {
            total_memory: config.total_memory,
            page_size: config.page_size,
            filtering_file: config.filtering_file.clone(),
            filter: None,
            ipc: None,
            symbols: None,
            hash_fn: jenkins::hash,
        }
    }

    /// Bytes of definition memory of this process.
    pub fn with_memory(mut self, total_memory: u32) -> MeasurementBuilder {
        self.total_memory = total_memory;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> MeasurementBuilder {
        self.page_size = page_size;
        self
    }

    /// Reads the region filter from the filter file at `path`.
    pub fn with_filtering_file(mut self, path: &str) -> MeasurementBuilder {
        self.filtering_file = Some(path.to_string());
        self
    }

    /// Uses `filter` instead of a filter file.
    pub fn with_filter(mut self, filter: impl RegionFilter + 'static) -> MeasurementBuilder {
        self.filter = Some(Box::new(filter));
        self
    }

    /// The interprocess communication of this rank, a single rank by default.
    pub fn with_ipc(mut self, ipc: Ipc) -> MeasurementBuilder {
        self.ipc = Some(ipc);
        self
    }

    /// Resolves compiler instrumented addresses with `symbols` instead of the
    /// symbol table of the running executable.
    pub fn with_symbols(mut self, symbols: impl SymbolResolver + 'static) -> MeasurementBuilder {
        self.symbols = Some(Box::new(symbols));
        self
    }

    pub fn with_hash_fn(mut self, hash_fn: HashFn) -> MeasurementBuilder {
        self.hash_fn = hash_fn;
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn build(self) -> AllocResult<Measurement> {
        let allocator = Allocator::new(self.total_memory, self.page_size)?;
        let filter = match self.filter {
            Some(filter) => filter,
            None => Box::new(FilterRules::load(self.filtering_file.as_deref())),
        };
        let func_addr = match self.symbols {
            Some(symbols) => FuncAddrCache::with_resolver(symbols),
            None => FuncAddrCache::new(SymbolTable::for_executable(None)),
        };
        let ipc = self.ipc.unwrap_or_default();
        tracing::debug!(
            "measurement on rank {} of {} with {:?}",
            ipc.rank(),
            ipc.size(),
            allocator.stats()
        );
        Ok(Measurement {
            definitions: DefinitionManager::with_hash_fn(allocator, self.hash_fn),
            filter,
            func_addr,
            ipc,
            communicators: CommunicatorCounters::new(),
            locations: ThreadLocal::new(),
            retired: Mutex::new(Vec::new()),
            next_location: AtomicU32::new(0),
            unification: OnceLock::new(),
        })
    }
}

/// A location together with the thread recording into it.
struct ThreadLocation {
    owner: ThreadId,
    location: Location,
}

/// Everything one process records: its definitions, the region filter, the
/// address cache of compiler instrumentation and one [`Location`] per
/// thread. All threads share the definitions, so equal definitions made on
/// different threads get the same handle.
pub struct Measurement {
    definitions: DefinitionManager,
    filter: Box<dyn RegionFilter>,
    func_addr: FuncAddrCache,
    ipc: Ipc,
    communicators: CommunicatorCounters,
    locations: ThreadLocal<RefCell<ThreadLocation>>,
    /// Locations of exited threads whose slot went to a new thread.
    retired: Mutex<Vec<Location>>,
    next_location: AtomicU32,
    unification: OnceLock<UnificationResult>,
}

impl std::fmt::Debug for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Measurement")
            .field("rank", &self.ipc.rank())
            .field("definitions", &self.definitions)
            .field("func_addr", &self.func_addr)
            .finish()
    }
}

impl Measurement {
    pub fn rank(&self) -> usize {
        self.ipc.rank()
    }

    pub fn size(&self) -> usize {
        self.ipc.size()
    }

    pub fn definitions(&self) -> &DefinitionManager {
        &self.definitions
    }

    pub fn ipc(&self) -> &Ipc {
        &self.ipc
    }

    pub fn communicators(&self) -> &CommunicatorCounters {
        &self.communicators
    }

    /// Defines a region unless the filter rejects it, in which case the
    /// [`Handle::FILTERED`] sentinel is returned.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip_all)]
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
        if self.filter.is_filtered(file, name, canonical_name) {
            return Handle::FILTERED;
        }
        self.definitions.define_region(
            name,
            canonical_name,
            file,
            begin_line,
            end_line,
            paradigm,
            region_type,
        )
    }

    /// Region of the compiler instrumented function at `address`.
    #[tracing::instrument(skip_all)]
    pub fn get_and_insert_func_addr(&self, address: usize) -> Handle<RegionDef> {
        self.func_addr
            .get_and_insert_func_addr(address, &self.definitions, self.filter.as_ref())
    }

    /// A shared object was unloaded.
    #[tracing::instrument(skip_all)]
    pub fn dlclose(&self, so_token: SoToken) -> usize {
        self.func_addr.dlclose(so_token)
    }

    /// Defines the MPI world communicator of this rank. Has to precede every
    /// other MPI communicator.
    #[tracing::instrument(skip_all)]
    pub fn define_world_communicator(&self) -> Handle<InterimCommunicatorDef> {
        let payload = self
            .communicators
            .world(self.rank() as u32, self.size() as u32);
        let world =
            self.definitions
                .define_interim_communicator(Handle::INVALID, Paradigm::Mpi, &payload);
        self.definitions
            .set_interim_communicator_name(world, "MPI_COMM_WORLD");
        world
    }

    fn new_thread_location(&self) -> ThreadLocation {
        let local_id = self.next_location.fetch_add(1, Ordering::Relaxed);
        ThreadLocation {
            owner: std::thread::current().id(),
            location: Location::new(&self.definitions, self.rank() as u32, local_id),
        }
    }

    /// Runs `f` on the location of the calling thread, creating it on first
    /// use.
    ///
    /// Every thread gets a location of its own, even when it inherits the
    /// per-thread slot of a thread that exited. The exited thread's location
    /// is kept, with its events and open regions, for [`locations`](Self::locations).
    pub fn with_location<R>(&self, f: impl FnOnce(&mut Location) -> R) -> R {
        let slot = self
            .locations
            .get_or(|| RefCell::new(self.new_thread_location()));
        let mut slot = slot.borrow_mut();
        if slot.owner != std::thread::current().id() {
            let finished = std::mem::replace(&mut *slot, self.new_thread_location());
            tracing::debug!(
                "slot of exited location {} reused",
                finished.location.local_id()
            );
            self.retired.lock().push(finished.location);
        }
        f(&mut slot.location)
    }

    /// Enters `region` on the calling thread's location. Filtered regions
    /// are ignored.
    #[tracing::instrument(skip_all)]
    pub fn enter_region(&self, region: Handle<RegionDef>) {
        if region.is_filtered() {
            return;
        }
        self.with_location(|location| location.enter(region));
    }

    #[tracing::instrument(skip_all)]
    pub fn exit_region(&self, region: Handle<RegionDef>) {
        if region.is_filtered() {
            return;
        }
        self.with_location(|location| location.exit(&self.definitions, region));
    }

    /// The locations of all threads that recorded something.
    pub fn locations(&mut self) -> Vec<&Location> {
        let mut locations: Vec<&Location> = self
            .locations
            .iter_mut()
            .map(|slot| &slot.get_mut().location)
            .chain(self.retired.get_mut().iter())
            .collect();
        locations.sort_by_key(|location| location.local_id());
        locations
    }

    /// Unifies the definitions of all ranks. Collective over [`ipc`](Self::ipc)
    /// on the first call; later calls return the first result without
    /// communicating.
    #[tracing::instrument(skip_all)]
    pub fn finalize(&self) -> &UnificationResult {
        self.unification.get_or_init(|| {
            unify(&self.definitions, &self.ipc, &self.communicators)
        })
    }
}
