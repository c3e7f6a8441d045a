use super::copy::{copy_definitions, Mappings};
use crate::allocator::PageInfo;
use crate::definitions::{DefinitionKind, DefinitionList, DefinitionManager, RemoteDefinitions};
use crate::ipc::Ipc;

use serde::{Deserialize, Serialize};

/// Everything rank 0 needs to read another rank's definitions.
#[derive(Debug, Serialize, Deserialize)]
struct ShippedDefinitions {
    lists: Vec<DefinitionList>,
    pages: Vec<(PageInfo, Vec<u8>)>,
}

fn install(local: &DefinitionManager, mappings: Mappings) {
    for (kind, mapping) in DefinitionKind::ALL.into_iter().zip(mappings) {
        if let Some(mapping) = mapping {
            local.set_mapping(kind, mapping);
        }
    }
}

/// Merges the definitions of all ranks into a new manager on rank 0, one
/// rank after the other in rank order. Every rank ends up with the mappings
/// of its own definitions; only rank 0 gets the unified manager.
#[tracing::instrument(skip_all)]
pub(crate) fn unify_definitions(local: &DefinitionManager, ipc: &Ipc) -> Option<DefinitionManager> {
    if ipc.rank() == 0 {
        let unified = DefinitionManager::with_hash_fn(local.allocator().clone(), local.hash_fn());
        // the empty string is unified string 0, it names unnamed entities
        unified.new_string("");
        install(local, copy_definitions(local, &unified));

        for rank in 1..ipc.size() {
            let shipped: ShippedDefinitions = ipc.recv(rank);
            tracing::debug!(
                "unifying {} page(s) of definitions from rank {}",
                shipped.pages.len(),
                rank
            );
            let remote = match RemoteDefinitions::new(
                local.allocator().clone(),
                shipped.lists,
                shipped.pages,
            ) {
                Ok(remote) => remote,
                Err(e) => crate::bug!("unable to hold the definitions of rank {}: {}", rank, e),
            };
            let mappings = copy_definitions(&remote, &unified);
            ipc.send(rank, &mappings);
        }
        Some(unified)
    } else {
        let shipped = ShippedDefinitions {
            lists: local.lists(),
            pages: local.page_contents(),
        };
        ipc.send(0, &shipped);
        let mappings: Mappings = ipc.recv(0);
        install(local, mappings);
        None
    }
}
