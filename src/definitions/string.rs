use super::{DedupTables, DefTable, Definition, DefinitionHeader, DefinitionKind, Handle};
use super::{DefinitionManager, DefinitionStore};

/// A string, its UTF-8 bytes follow the record.
#[repr(C)]
#[derive(Debug)]
pub struct StringDef {
    header: DefinitionHeader,
    pub(crate) length: u32,
}

unsafe impl Definition for StringDef {
    const KIND: DefinitionKind = DefinitionKind::String;
    type Key = Box<str>;

    fn table(tables: &DedupTables) -> Option<&DefTable<Self>> {
        Some(&tables.string)
    }
}

impl StringDef {
    pub fn length(&self) -> u32 {
        self.length
    }
}

impl DefinitionManager {
    pub fn new_string(&self, string: &str) -> Handle<StringDef> {
        let hash_value = self
            .fold()
            .bytes(string.as_bytes())
            .u32(string.len() as u32)
            .finish();
        self.add_definition(
            StringDef {
                header: DefinitionHeader::new(hash_value),
                length: string.len() as u32,
            },
            string.as_bytes(),
            Some(string.into()),
        )
    }

    /// Owned copy of a string definition, `None` for the invalid handle.
    pub fn string_value(&self, handle: Handle<StringDef>) -> Option<String> {
        if handle.is_invalid() {
            None
        } else {
            Some(self.string(handle).to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;

    fn manager() -> DefinitionManager {
        DefinitionManager::new(Allocator::new(1 << 20, 4096).unwrap())
    }

    #[test]
    fn equal_strings_share_a_definition() {
        let defs = manager();
        let a = defs.new_string("main");
        let b = defs.new_string("foo");
        let c = defs.new_string("main");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(defs.count::<StringDef>(), 2);
        assert_eq!(defs.string(a), "main");
        assert_eq!(defs.get(b).header().sequence_number(), 1);
        assert_eq!(defs.string_value(Handle::INVALID), None);
    }

    #[test]
    fn empty_and_long_strings() {
        let defs = manager();
        let long = "x".repeat(10_000);
        let empty = defs.new_string("");
        let big = defs.new_string(&long);
        assert_eq!(defs.string(empty), "");
        assert_eq!(defs.string(big), long);
        assert_eq!(defs.new_string(&long), big);
    }

    #[test]
    fn colliding_hashes_keep_content_apart() {
        let defs = DefinitionManager::with_hash_fn(Allocator::new(1 << 20, 4096).unwrap(), |_, _| 7);
        let a = defs.new_string("alpha");
        let b = defs.new_string("beta");
        assert_ne!(a, b);
        assert_eq!(defs.get(a).header().hash_value(), defs.get(b).header().hash_value());
        assert_eq!(defs.new_string("beta"), b);
        assert_eq!(defs.count::<StringDef>(), 2);
    }

    #[test]
    fn iteration_follows_creation_order() {
        let defs = manager();
        for name in ["c", "a", "b", "a"] {
            defs.new_string(name);
        }
        let names: Vec<_> = defs
            .iter::<StringDef>()
            .map(|(handle, def)| (defs.string(handle).to_owned(), def.header().sequence_number()))
            .collect();
        assert_eq!(
            names,
            vec![("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]
        );
    }
}
