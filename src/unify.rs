//! Unification: merging the local definitions of every rank into one global
//! set of definitions at the end of a measurement.
//!
//! All ranks call [`unify`] collectively. Rank 0 collects and copies the
//! definitions of every rank into a new, unified [`DefinitionManager`] and
//! answers each rank with `sequence_number -> unified sequence_number`
//! mapping tables. MPI interim communicators are then given their global
//! identity by the communicator protocol.
pub(crate) mod communicators;
pub(crate) mod copy;
pub(crate) mod transfer;

pub use communicators::{CommunicatorCounters, MpiCommPayload};
pub use copy::{copy_definitions, Mappings};

use crate::definitions::DefinitionManager;
use crate::ipc::Ipc;

/// Progress of the communicator protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnifyState {
    /// Only local definitions exist.
    Local,
    /// Preliminary global ids computed from the root offsets.
    Mapping,
    /// Member groups of all communicators defined.
    GroupDefined,
    /// Communicators defined parents first and final ids broadcast.
    TopoSort,
    /// Every rank holds its complete mapping.
    Unified,
}

impl UnifyState {
    fn successor(self) -> Option<UnifyState> {
        match self {
            UnifyState::Local => Some(UnifyState::Mapping),
            UnifyState::Mapping => Some(UnifyState::GroupDefined),
            UnifyState::GroupDefined => Some(UnifyState::TopoSort),
            UnifyState::TopoSort => Some(UnifyState::Unified),
            UnifyState::Unified => None,
        }
    }

    pub(crate) fn advance(&mut self, next: UnifyState) {
        crate::bug_on!(
            self.successor() != Some(next),
            "unification state {:?} can not be followed by {:?}",
            self,
            next
        );
        tracing::debug!("unification {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// The outcome of [`unify`] on one rank.
#[derive(Debug)]
pub struct UnificationResult {
    rank: usize,
    unified: Option<DefinitionManager>,
    interim_communicator_mapping: Vec<u32>,
}

impl UnificationResult {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The unified definitions, on rank 0 only.
    pub fn unified(&self) -> Option<&DefinitionManager> {
        self.unified.as_ref()
    }

    pub fn into_unified(self) -> Option<DefinitionManager> {
        self.unified
    }

    /// Unified communicator sequence number of every local interim
    /// communicator, `u32::MAX` for non MPI ones.
    pub fn interim_communicator_mapping(&self) -> &[u32] {
        &self.interim_communicator_mapping
    }
}

/// Unifies the definitions of `local` with those of every other rank of
/// `ipc`. Collective: every rank has to call it.
#[tracing::instrument(skip_all, fields(rank = ipc.rank()))]
pub fn unify(
    local: &DefinitionManager,
    ipc: &Ipc,
    counters: &CommunicatorCounters,
) -> UnificationResult {
    let unified = transfer::unify_definitions(local, ipc);
    let interim_communicator_mapping =
        communicators::CommunicatorUnifier::new(local, unified.as_ref(), ipc, counters).run();
    ipc.barrier();
    if let Some(unified) = &unified {
        tracing::debug!("unified definitions: {:?}", unified);
    }
    UnificationResult {
        rank: ipc.rank(),
        unified,
        interim_communicator_mapping,
    }
}
