use crate::definitions::{DefinitionManager, DefinitionStore, Handle, LocationDef, LocationType, RegionDef};
use crate::warnings::RuntimeWarning;

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub region: Handle<RegionDef>,
    pub time: Instant,
}

/// The global id of local location `local_id` of `rank`.
pub fn global_location_id(rank: u32, local_id: u32) -> u64 {
    ((rank as u64) << 32) | local_id as u64
}

/// Per thread measurement state: the stack of entered regions and the
/// events recorded so far.
#[derive(Debug)]
pub struct Location {
    handle: Handle<LocationDef>,
    local_id: u32,
    stack: Vec<Handle<RegionDef>>,
    events: Vec<Event>,
}

impl Location {
    pub(crate) fn new(definitions: &DefinitionManager, rank: u32, local_id: u32) -> Location {
        let name = if local_id == 0 {
            "Master thread".to_string()
        } else {
            format!("Thread {}", local_id)
        };
        let handle = definitions.define_location(
            global_location_id(rank, local_id),
            &name,
            LocationType::CpuThread,
        );
        tracing::debug!("location {} created: {:?}", name, handle);
        Location {
            handle,
            local_id,
            stack: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn handle(&self) -> Handle<LocationDef> {
        self.handle
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn current_region(&self) -> Option<Handle<RegionDef>> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn enter(&mut self, region: Handle<RegionDef>) {
        if region.is_filtered() {
            return;
        }
        crate::bug_on!(region.is_invalid(), "enter of an invalid region");
        self.stack.push(region);
        self.events.push(Event {
            kind: EventKind::Enter,
            region,
            time: Instant::now(),
        });
    }

    /// Leaves `region`, which should be the innermost entered one. A
    /// mismatch is reported and the innermost region is left anyway.
    pub(crate) fn exit(&mut self, definitions: &DefinitionManager, region: Handle<RegionDef>) {
        if region.is_filtered() {
            return;
        }
        crate::bug_on!(region.is_invalid(), "exit of an invalid region");
        let region_name = |r: Handle<RegionDef>| definitions.string(definitions.get(r).name()).to_string();
        match self.stack.pop() {
            Some(innermost) if innermost == region => {}
            Some(innermost) => {
                RuntimeWarning::UnbalancedExit(&region_name(innermost), &region_name(region)).print()
            }
            None => RuntimeWarning::UnbalancedExit("<none>", &region_name(region)).print(),
        }
        self.events.push(Event {
            kind: EventKind::Exit,
            region,
            time: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::{Paradigm, RegionType};

    fn region(defs: &DefinitionManager, name: &str) -> Handle<RegionDef> {
        defs.define_region(name, None, None, 0, 0, Paradigm::User, RegionType::Function)
    }

    #[test]
    fn records_nested_regions() {
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let mut location = Location::new(&defs, 3, 1);
        assert_eq!(defs.get(location.handle()).global_location_id(), (3 << 32) | 1);
        let (outer, inner) = (region(&defs, "outer"), region(&defs, "inner"));
        location.enter(outer);
        location.enter(Handle::FILTERED);
        location.enter(inner);
        assert_eq!(location.current_region(), Some(inner));
        location.exit(&defs, inner);
        location.exit(&defs, Handle::FILTERED);
        location.exit(&defs, outer);
        assert_eq!(location.depth(), 0);
        let kinds: Vec<_> = location.events().iter().map(|e| (e.kind, e.region)).collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::Enter, outer),
                (EventKind::Enter, inner),
                (EventKind::Exit, inner),
                (EventKind::Exit, outer)
            ]
        );
        let events = location.events();
        assert!(events.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn unbalanced_exit_pops_the_innermost_region() {
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let mut location = Location::new(&defs, 0, 0);
        let (a, b) = (region(&defs, "a"), region(&defs, "b"));
        location.enter(a);
        location.enter(b);
        location.exit(&defs, a);
        assert_eq!(location.current_region(), Some(a));
        location.exit(&defs, a);
        location.exit(&defs, a);
        assert_eq!(location.depth(), 0);
        assert_eq!(location.events().len(), 5);
    }
}
