use super::UnifyState;
use crate::definitions::{
    CommunicatorDef, Definition, DefinitionKind, DefinitionManager, DefinitionStore, GroupDef, GroupType,
    Handle, InterimCommunicatorDef, Paradigm, Payload, StringDef,
};
use crate::ipc::{Ipc, ReduceOp};

use serde::{Deserialize, Serialize};

use std::sync::atomic::{AtomicU32, Ordering};

/// Not a member, or no parent.
const NONE: u32 = u32::MAX;

/// Payload of MPI-like interim communicators.
///
/// Communicators with more than one member are identified by their root
/// (the member with local rank 0): `root_id` counts the communicators that
/// root created. Self-like communicators, whose only member is the creating
/// rank, are counted separately.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpiCommPayload {
    pub root_id: u32,
    pub global_root_rank: u32,
    pub local_rank: u32,
    is_self_like: u32,
}

unsafe impl Payload for MpiCommPayload {}

impl MpiCommPayload {
    /// A member of the `root_id`th communicator created by `global_root_rank`.
    pub fn member(root_id: u32, global_root_rank: u32, local_rank: u32) -> MpiCommPayload {
        MpiCommPayload {
            root_id,
            global_root_rank,
            local_rank,
            is_self_like: 0,
        }
    }

    pub fn self_like(self_id: u32, rank: u32) -> MpiCommPayload {
        MpiCommPayload {
            root_id: self_id,
            global_root_rank: rank,
            local_rank: 0,
            is_self_like: 1,
        }
    }

    pub fn is_self_like(&self) -> bool {
        self.is_self_like != 0
    }
}

/// Per process counters of created root and self-like communicators.
#[derive(Debug, Default)]
pub struct CommunicatorCounters {
    root_comms: AtomicU32,
    self_comms: AtomicU32,
}

impl CommunicatorCounters {
    pub fn new() -> CommunicatorCounters {
        Default::default()
    }

    /// Called by the root of a new multi-member communicator, the result is
    /// shared with the other members.
    pub fn new_root_id(&self) -> u32 {
        self.root_comms.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new_self_id(&self) -> u32 {
        self.self_comms.fetch_add(1, Ordering::Relaxed)
    }

    pub fn root_comms(&self) -> u32 {
        self.root_comms.load(Ordering::Relaxed)
    }

    pub fn self_comms(&self) -> u32 {
        self.self_comms.load(Ordering::Relaxed)
    }

    /// Payload of the world communicator, which has to be the first
    /// communicator rank 0 creates.
    pub fn world(&self, rank: u32, size: u32) -> MpiCommPayload {
        if size == 1 {
            MpiCommPayload::self_like(self.new_self_id(), rank)
        } else {
            if rank == 0 {
                let id = self.new_root_id();
                crate::bug_on!(id != 0, "world communicator created after {} others", id);
            }
            MpiCommPayload::member(0, 0, rank)
        }
    }

    /// Payload for a communicator with `local_rank` among its members. The
    /// root (local rank 0) draws a new id, which every other member has to
    /// receive as `root` = `(root_id, global_root_rank)`.
    pub fn communicator(
        &self,
        rank: u32,
        members: u32,
        local_rank: u32,
        root: Option<(u32, u32)>,
    ) -> MpiCommPayload {
        if members == 1 {
            return MpiCommPayload::self_like(self.new_self_id(), rank);
        }
        match (local_rank, root) {
            (0, _) => MpiCommPayload::member(self.new_root_id(), rank, 0),
            (_, Some((root_id, global_root_rank))) => {
                MpiCommPayload::member(root_id, global_root_rank, local_rank)
            }
            (_, None) => crate::bug!("communicator member {} without its root's id", local_rank),
        }
    }
}

struct PendingComm {
    handle: Handle<CommunicatorDef>,
    group: Handle<GroupDef>,
    name: Handle<StringDef>,
    parent: u32,
}

/// Gives every MPI interim communicator of every rank a unified
/// communicator. Every rank runs the same sequence of collectives; only
/// rank 0 defines, into `unified`.
pub(crate) struct CommunicatorUnifier<'a> {
    local: &'a DefinitionManager,
    unified: Option<&'a DefinitionManager>,
    ipc: &'a Ipc,
    counters: &'a CommunicatorCounters,
    rank: u32,
    size: u32,
    state: UnifyState,
    /// The MPI interim communicators of this rank with their sequence number.
    comms: Vec<(usize, &'a InterimCommunicatorDef, MpiCommPayload)>,
    string_mapping: Vec<u32>,
}

impl<'a> CommunicatorUnifier<'a> {
    pub(crate) fn new(
        local: &'a DefinitionManager,
        unified: Option<&'a DefinitionManager>,
        ipc: &'a Ipc,
        counters: &'a CommunicatorCounters,
    ) -> CommunicatorUnifier<'a> {
        let rank = ipc.rank() as u32;
        crate::bug_on!(
            (rank == 0) != unified.is_some(),
            "only rank 0 owns the unified definitions"
        );
        let comms = local
            .iter::<InterimCommunicatorDef>()
            .filter(|(_, def)| def.paradigm() == Some(Paradigm::Mpi))
            .map(|(handle, def)| {
                (
                    def.header().sequence_number() as usize,
                    def,
                    local.interim_communicator_payload::<MpiCommPayload>(handle),
                )
            })
            .collect();
        CommunicatorUnifier {
            local,
            unified,
            ipc,
            counters,
            rank,
            size: ipc.size() as u32,
            state: UnifyState::Local,
            comms,
            string_mapping: local
                .mapping_table(DefinitionKind::String)
                .unwrap_or_default(),
        }
    }

    fn unified(&self) -> &'a DefinitionManager {
        match self.unified {
            Some(unified) => unified,
            None => crate::bug!("rank {} has no unified definitions", self.rank),
        }
    }

    /// The group of all world ranks, defined before any other MPI group.
    pub(crate) fn define_mpi_locations(&self) {
        if self.rank != 0 {
            return;
        }
        let ranks: Vec<u64> = (0..self.size as u64).collect();
        self.unified()
            .define_group(GroupType::MpiLocations, "", &ranks);
    }

    pub(crate) fn run(mut self) -> Vec<u32> {
        crate::bug_on!(self.size == 0, "invalid world size of 0");
        self.define_mpi_locations();
        let (mut mapping, total) = self.create_local_mappings();
        self.define_comms(&mut mapping, total);
        self.define_self_likes();
        self.state.advance(UnifyState::Unified);
        self.local
            .set_mapping(DefinitionKind::InterimCommunicator, mapping.clone());
        mapping
    }

    /// Maps every communicator to its preliminary global id: the root's
    /// offset plus `root_id`, or `total + root_id` for self-like ones.
    fn create_local_mappings(&mut self) -> (Vec<u32>, u32) {
        let counts = self.ipc.allgather(&self.counters.root_comms());
        let mut offsets = Vec::with_capacity(counts.len());
        let mut total = 0u32;
        for count in counts {
            offsets.push(total);
            total += count;
        }

        let mut mapping = vec![NONE; self.local.count::<InterimCommunicatorDef>() as usize];
        for &(seq, _, payload) in &self.comms {
            mapping[seq] = if payload.is_self_like() {
                crate::bug_on!(
                    payload.global_root_rank != self.rank,
                    "invalid interim communicator definition, roots don't match: {} != {}",
                    payload.global_root_rank,
                    self.rank
                );
                payload.root_id + total
            } else {
                crate::bug_on!(
                    payload.global_root_rank >= self.size,
                    "interim communicator root {} outside of the world",
                    payload.global_root_rank
                );
                payload.root_id + offsets[payload.global_root_rank as usize]
            };
        }
        self.state.advance(UnifyState::Mapping);
        (mapping, total)
    }

    /// This rank's local rank in communicator `global_id`, or `NONE`.
    /// The local root also fills in the unified name string and the
    /// parent's global id.
    fn rank_in_communicator(&self, global_id: u32, mapping: &[u32], aux: &mut [u32; 2]) -> u32 {
        for &(seq, def, payload) in &self.comms {
            if mapping[seq] != global_id {
                continue;
            }
            if payload.local_rank == 0 {
                let name = def.name();
                if !name.is_invalid() {
                    let name_seq = self.local.get(name).header().sequence_number();
                    aux[0] = match self.string_mapping.get(name_seq as usize) {
                        Some(unified) => *unified,
                        None => crate::bug!("string {:?} has no unified counterpart", name),
                    };
                }
                let parent = def.parent();
                if !parent.is_invalid() {
                    aux[1] = mapping[self.local.get(parent).header().sequence_number() as usize];
                }
            }
            return payload.local_rank;
        }
        NONE
    }

    fn define_comms(&mut self, mapping: &mut [u32], total: u32) {
        let mut pending: Vec<PendingComm> = Vec::new();
        let unified_strings: Vec<Handle<StringDef>> = match self.unified {
            Some(unified) => unified.iter::<StringDef>().map(|(h, _)| h).collect(),
            None => Vec::new(),
        };

        for global_id in 0..total {
            let mut aux = [0, NONE];
            let my_rank_in_comm = self.rank_in_communicator(global_id, mapping, &mut aux);
            match self.ipc.gather(&my_rank_in_comm, 0) {
                Some(ranks_in_comm) => {
                    let mut ranks_in_group = vec![0u64; self.size as usize];
                    let mut members = 0;
                    for (i, &local_rank) in ranks_in_comm.iter().enumerate() {
                        if local_rank == NONE {
                            continue;
                        }
                        crate::bug_on!(
                            local_rank >= self.size,
                            "rank {} claims local rank {} in communicator {}",
                            i,
                            local_rank,
                            global_id
                        );
                        if i > 0 && local_rank == 0 {
                            aux = self.ipc.recv(i);
                        }
                        ranks_in_group[local_rank as usize] = i as u64;
                        members += 1;
                    }
                    let unified = self.unified();
                    let group = unified.define_group_with_name(
                        GroupType::MpiGroup,
                        unified.new_string(""),
                        &ranks_in_group[..members],
                    );
                    let name = match unified_strings.get(aux[0] as usize) {
                        Some(name) => *name,
                        None => crate::bug!("communicator name string {} is not unified", aux[0]),
                    };
                    pending.push(PendingComm {
                        handle: Handle::INVALID,
                        group,
                        name,
                        parent: aux[1],
                    });
                }
                None if my_rank_in_comm == 0 => self.ipc.send(0, &aux),
                None => {}
            }
        }
        self.state.advance(UnifyState::GroupDefined);

        let topo = if self.rank == 0 {
            Some(self.topological_ids(&mut pending))
        } else {
            None
        };
        let topo: Vec<u32> = self.ipc.bcast(topo, 0);

        for &(seq, _, payload) in &self.comms {
            if payload.is_self_like() {
                mapping[seq] += topo[total as usize];
            } else {
                mapping[seq] = topo[mapping[seq] as usize];
            }
        }
        self.state.advance(UnifyState::TopoSort);
    }

    /// Defines the pending communicators parents first. Entry `i` of the
    /// result is the unified id of preliminary id `i`, the last entry the
    /// number of communicators unified before.
    fn topological_ids(&self, pending: &mut [PendingComm]) -> Vec<u32> {
        let unified = self.unified();
        let total = pending.len();
        let number_of_comms = unified.count::<CommunicatorDef>();
        let mut topo = vec![0u32; total + 1];
        let mut defined = 0u32;
        while (defined as usize) < total {
            let before = defined;
            for i in 0..total {
                if !pending[i].handle.is_invalid() {
                    continue;
                }
                let parent = match pending[i].parent {
                    NONE => Handle::INVALID,
                    parent => {
                        crate::bug_on!(
                            parent as usize >= total,
                            "communicator {} has unknown parent {}",
                            i,
                            parent
                        );
                        let handle = pending[parent as usize].handle;
                        if handle.is_invalid() {
                            continue;
                        }
                        handle
                    }
                };
                let comm = &mut pending[i];
                comm.handle = unified.append_communicator(comm.group, comm.name, parent);
                let seq = unified.get(comm.handle).header().sequence_number();
                crate::bug_on!(
                    seq != number_of_comms + defined,
                    "definition system created out-of-order sequence number for communicator: {} != {}",
                    seq,
                    number_of_comms + defined
                );
                topo[i] = number_of_comms + defined;
                defined += 1;
            }
            crate::bug_on!(
                defined == before,
                "communicator parents form a cycle, {} of {} defined",
                defined,
                total
            );
        }
        topo[total] = number_of_comms;
        topo
    }

    /// Self-like communicators share one empty group and follow all other
    /// communicators.
    fn define_self_likes(&self) {
        let max_self_ids = self
            .ipc
            .reduce(self.counters.self_comms(), ReduceOp::Max, 0);
        if let Some(max_self_ids) = max_self_ids {
            let unified = self.unified();
            let number_of_comms = unified.count::<CommunicatorDef>();
            let group = unified.define_group(GroupType::MpiSelf, "", &[]);
            for i in 0..max_self_ids {
                let name = unified.new_string(if i == 0 { "MPI_COMM_SELF" } else { "" });
                let handle = unified.append_communicator(group, name, Handle::INVALID);
                let seq = unified.get(handle).header().sequence_number();
                crate::bug_on!(
                    seq != number_of_comms + i,
                    "definition system created out-of-order sequence number for self-like communicator: {} != {}",
                    seq,
                    number_of_comms + i
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_draw_ids_members_receive_them() {
        let counters = CommunicatorCounters::new();
        assert_eq!(counters.world(0, 4), MpiCommPayload::member(0, 0, 0));
        let first = counters.communicator(0, 3, 0, None);
        let second = counters.communicator(0, 2, 0, None);
        assert_eq!((first.root_id, second.root_id), (1, 2));
        assert_eq!(counters.root_comms(), 3);

        let member = counters.communicator(5, 3, 2, Some((first.root_id, 0)));
        assert_eq!(member, MpiCommPayload::member(1, 0, 2));
        assert!(!member.is_self_like());
        assert_eq!(counters.root_comms(), 3);
    }

    #[test]
    fn single_member_communicators_are_self_like() {
        let counters = CommunicatorCounters::new();
        let world = counters.world(0, 1);
        assert!(world.is_self_like());
        let other = counters.communicator(0, 1, 0, None);
        assert_eq!(other, MpiCommPayload::self_like(1, 0));
        assert_eq!((counters.root_comms(), counters.self_comms()), (0, 2));
    }

    #[test]
    #[should_panic]
    fn member_without_root_id() {
        CommunicatorCounters::new().communicator(1, 2, 1, None);
    }
}
