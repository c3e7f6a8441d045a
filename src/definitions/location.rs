use super::region::raw_enum;
use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, StringDef};

use serde::{Deserialize, Serialize};

raw_enum! {
    LocationType {
        CpuThread,
        Gpu,
        Metric,
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct LocationDef {
    header: DefinitionHeader,
    global_location_id: u64,
    name: Handle<StringDef>,
    location_type: u32,
}

unsafe impl Definition for LocationDef {
    const KIND: DefinitionKind = DefinitionKind::Location;
    type Key = (u64, Handle<StringDef>, u32);

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.location)
    }
}

impl LocationDef {
    /// `rank << 32 | local index`.
    pub fn global_location_id(&self) -> u64 {
        self.global_location_id
    }

    pub fn name(&self) -> Handle<StringDef> {
        self.name
    }

    pub fn location_type(&self) -> Option<LocationType> {
        LocationType::from_raw(self.location_type)
    }

    pub(crate) fn raw_location_type(&self) -> u32 {
        self.location_type
    }
}

impl DefinitionManager {
    pub fn define_location(
        &self,
        global_location_id: u64,
        name: &str,
        location_type: LocationType,
    ) -> Handle<LocationDef> {
        let name = self.new_string(name);
        self.define_location_raw(global_location_id, name, location_type as u32)
    }

    pub(crate) fn define_location_raw(
        &self,
        global_location_id: u64,
        name: Handle<StringDef>,
        location_type: u32,
    ) -> Handle<LocationDef> {
        let hash_value = self
            .fold()
            .u64(global_location_id)
            .handle(self, name)
            .u32(location_type)
            .finish();
        self.add_definition(
            LocationDef {
                header: DefinitionHeader::new(hash_value),
                global_location_id,
                name,
                location_type,
            },
            &[],
            Some((global_location_id, name, location_type)),
        )
    }
}
