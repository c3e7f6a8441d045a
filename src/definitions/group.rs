use super::region::raw_enum;
use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, StringDef};

use serde::{Deserialize, Serialize};

raw_enum! {
    GroupType {
        Unknown,
        Locations,
        Regions,
        Metrics,
        MpiLocations,
        MpiGroup,
        MpiSelf,
    }
}

/// A named, typed list of members (ranks, locations, ...). The members
/// follow the record as `u64`s.
#[repr(C)]
#[derive(Debug)]
pub struct GroupDef {
    header: DefinitionHeader,
    group_type: u32,
    name: Handle<StringDef>,
    pub(crate) number_of_members: u64,
}

#[doc(hidden)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    group_type: u32,
    name: Handle<StringDef>,
    members: Vec<u64>,
}

unsafe impl Definition for GroupDef {
    const KIND: DefinitionKind = DefinitionKind::Group;
    type Key = GroupKey;

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.group)
    }
}

impl GroupDef {
    pub fn group_type(&self) -> Option<GroupType> {
        GroupType::from_raw(self.group_type)
    }

    pub fn name(&self) -> Handle<StringDef> {
        self.name
    }

    pub fn number_of_members(&self) -> u64 {
        self.number_of_members
    }

    pub(crate) fn raw_group_type(&self) -> u32 {
        self.group_type
    }
}

impl DefinitionManager {
    pub fn define_group(&self, group_type: GroupType, name: &str, members: &[u64]) -> Handle<GroupDef> {
        let name = self.new_string(name);
        self.define_group_with_name(group_type, name, members)
    }

    /// Like [`define_group`](Self::define_group) for 32 bit member ids, e.g.
    /// ranks.
    pub fn define_group_from_u32(
        &self,
        group_type: GroupType,
        name: &str,
        members: &[u32],
    ) -> Handle<GroupDef> {
        let members: Vec<u64> = members.iter().map(|&m| m as u64).collect();
        self.define_group(group_type, name, &members)
    }

    pub(crate) fn define_group_with_name(
        &self,
        group_type: GroupType,
        name: Handle<StringDef>,
        members: &[u64],
    ) -> Handle<GroupDef> {
        self.define_group_raw(group_type as u32, name, members)
    }

    pub(crate) fn define_group_raw(
        &self,
        group_type: u32,
        name: Handle<StringDef>,
        members: &[u64],
    ) -> Handle<GroupDef> {
        let bytes: Vec<u8> = members.iter().flat_map(|m| m.to_ne_bytes()).collect();
        let hash_value = self
            .fold()
            .u32(group_type)
            .handle(self, name)
            .u64(members.len() as u64)
            .bytes(&bytes)
            .finish();
        self.add_definition(
            GroupDef {
                header: DefinitionHeader::new(hash_value),
                group_type,
                name,
                number_of_members: members.len() as u64,
            },
            &bytes,
            Some(GroupKey {
                group_type,
                name,
                members: members.to_vec(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::DefinitionStore;

    #[test]
    fn members_are_part_of_the_identity() {
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let world = defs.define_group_from_u32(GroupType::MpiGroup, "", &[0, 1, 2, 3]);
        let sub = defs.define_group_from_u32(GroupType::MpiGroup, "", &[1, 2, 3]);
        let reordered = defs.define_group_from_u32(GroupType::MpiGroup, "", &[3, 2, 1]);
        let self_group = defs.define_group(GroupType::MpiSelf, "", &[]);
        assert_ne!(world, sub);
        assert_ne!(sub, reordered);
        assert_eq!(defs.define_group(GroupType::MpiGroup, "", &[0, 1, 2, 3]), world);
        assert_eq!(defs.group_members(sub), &[1, 2, 3]);
        assert_eq!(defs.group_members(self_group), &[] as &[u64]);
        assert_eq!(defs.get(self_group).group_type(), Some(GroupType::MpiSelf));
        assert_eq!(defs.count::<GroupDef>(), 4);
    }
}
