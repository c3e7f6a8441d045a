//! Measurement core of a parallel performance measurement system.
//!
//! Instrumentation adapters (compiler hooks, MPI wrappers, user
//! annotations) call into a [`Measurement`] to define the entities of a run
//! (regions, locations, groups, metrics, communicators, ...) and to record
//! region enter and exit events. Definitions are deduplicated by content
//! within a process and unified across processes when the measurement ends.
//!
//! The building blocks are usable on their own:
//! - [`hashtab`]: chunked concurrent hash tables with lock-free lookups,
//! - [`allocator`]: a page allocator handing out relocatable offsets instead
//!   of pointers,
//! - [`definitions`]: the definition manager,
//! - [`unify`]: merging the definitions of all ranks over an [`Ipc`] handle.
//!
//! EXAMPLES
//! --------
//!
//! # Recording regions on several threads
//! ```
//! use scorep_core::{DefinitionStore, MeasurementBuilder, Paradigm, RegionDef, RegionType};
//!
//! let measurement = MeasurementBuilder::new().build().unwrap();
//! let main = measurement.define_region("main", None, Some("main.c"), 1, 40, Paradigm::User, RegionType::Function);
//! std::thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             measurement.enter_region(main);
//!             measurement.exit_region(main);
//!         });
//!     }
//! });
//! let result = measurement.finalize();
//! assert_eq!(result.unified().unwrap().count::<RegionDef>(), 1);
//! ```
//!
//! # Unifying the definitions of several ranks
//! ```
//! use scorep_core::{Ipc, MeasurementBuilder};
//!
//! std::thread::scope(|s| {
//!     for ipc in Ipc::threads(4) {
//!         s.spawn(move || {
//!             let measurement = MeasurementBuilder::new().with_ipc(ipc).build().unwrap();
//!             measurement.define_world_communicator();
//!             let result = measurement.finalize();
//!             assert_eq!(result.interim_communicator_mapping(), &[0]);
//!         });
//!     }
//! });
//! ```

#[macro_use]
extern crate lazy_static;
#[doc(hidden)]
pub extern crate serde;

#[doc(hidden)]
pub extern crate tracing;

pub mod allocator;
pub mod definitions;
mod env_var;
pub use env_var::{config, config_from, Config};
pub mod filter;
pub mod func_addr;
pub mod hashtab;
pub mod ipc;
pub mod location;
mod measurement;
pub mod unify;
mod utils;
mod warnings;

pub use crate::allocator::{AllocError, AllocResult, Allocator};
pub use crate::definitions::{
    DefinitionManager, DefinitionStore, GroupType, Handle, LocationType, Paradigm, RegionDef,
    RegionType,
};
pub use crate::filter::{FilterError, FilterResult, FilterRules, RegionFilter};
pub use crate::ipc::Ipc;
pub use crate::location::Location;
pub use crate::measurement::{Measurement, MeasurementBuilder};
pub use crate::unify::{unify, UnificationResult};

#[doc(hidden)]
pub use bincode;

/// Re-enables the runtime warnings of this process (the default).
pub fn enable_runtime_warnings() {
    warnings::RuntimeWarning::enable_warnings();
}

/// Silences every runtime warning of this process, independent of the
/// `SCOREP_*_WARNING` variables. Fatal errors are still reported.
pub fn disable_runtime_warnings() {
    warnings::RuntimeWarning::disable_warnings();
}

#[doc(hidden)]
pub fn serialize<T: ?Sized>(obj: &T) -> Result<Vec<u8>, anyhow::Error>
where
    T: serde::Serialize,
{
    Ok(bincode::serialize(obj)?)
}

#[doc(hidden)]
pub fn deserialize<'a, T>(bytes: &'a [u8]) -> Result<T, anyhow::Error>
where
    T: serde::Deserialize<'a>,
{
    Ok(bincode::deserialize(bytes)?)
}
