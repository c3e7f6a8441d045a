use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, StringDef};

#[repr(C)]
#[derive(Debug)]
pub struct SourceFileDef {
    header: DefinitionHeader,
    name: Handle<StringDef>,
}

unsafe impl Definition for SourceFileDef {
    const KIND: DefinitionKind = DefinitionKind::SourceFile;
    type Key = Handle<StringDef>;

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.source_file)
    }
}

impl SourceFileDef {
    pub fn name(&self) -> Handle<StringDef> {
        self.name
    }
}

impl DefinitionManager {
    pub fn new_source_file(&self, name: &str) -> Handle<SourceFileDef> {
        let name = self.new_string(name);
        self.new_source_file_with_name(name)
    }

    pub(crate) fn new_source_file_with_name(&self, name: Handle<StringDef>) -> Handle<SourceFileDef> {
        let hash_value = self.fold().handle(self, name).finish();
        self.add_definition(
            SourceFileDef {
                header: DefinitionHeader::new(hash_value),
                name,
            },
            &[],
            Some(name),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::definitions::DefinitionStore;

    #[test]
    fn files_dedup_by_name() {
        let defs = DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap());
        let a = defs.new_source_file("src/main.c");
        let b = defs.new_source_file("src/util.c");
        assert_eq!(defs.new_source_file("src/main.c"), a);
        assert_ne!(a, b);
        assert_eq!(defs.string(defs.get(b).name()), "src/util.c");
        assert_eq!(defs.count::<SourceFileDef>(), 2);
    }
}
