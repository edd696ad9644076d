use uuid::Uuid;

use crate::table::Table;

/// A sorted, immutable collection of tables selectable by UUID (spec.md
/// §3.3, §4.3). Built once at startup and shared read-only across every
/// serving thread — see spec.md §5.
pub struct Namespace {
    tables: Vec<Table>,
}

impl Namespace {
    /// Sorts the given tables by UUID and wraps them into a namespace
    /// (spec.md §4.3 `namespace_create`).
    pub fn create(mut tables: Vec<Table>) -> Namespace {
        tables.sort_by_key(|t| t.uuid());
        Namespace { tables }
    }

    /// Binary searches for the table with the given UUID (spec.md §4.3
    /// namespace lookup by UUID).
    pub fn table(&self, uuid: Uuid) -> Option<&Table> {
        self.tables
            .binary_search_by_key(&uuid, |t| t.uuid())
            .ok()
            .map(|idx| &self.tables[idx])
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Explicit destructor matching the C invocation surface (spec.md §6.3).
    /// `recursive` documents intent only: dropping the namespace always drops
    /// its tables, and dropping a table always drops (and unmaps) its
    /// fragments, since each `Table` here is owned outright by exactly one
    /// `Namespace` rather than referenced by pointer.
    pub fn destroy(self, _recursive: bool) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, FRAGMENT_MAGIC, HEADER_SIZE};
    use std::fs::File;
    use std::io::Write;

    fn trivial_table(uuid: Uuid) -> Table {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&FRAGMENT_MAGIC.to_le_bytes());
        header[17] = 1; // key_size
        header[18..20].copy_from_slice(&1u16.to_le_bytes()); // item_size
        let table_size = HEADER_SIZE as u64 + 8;
        header[24..32].copy_from_slice(&table_size.to_le_bytes());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&header).unwrap();
        f.write_all(&0u64.to_le_bytes()).unwrap();
        f.flush().unwrap();

        let frag = Fragment::open(&File::open(f.path()).unwrap()).unwrap();
        Table::create(uuid, vec![frag]).unwrap().0
    }

    #[test]
    fn sorted_by_uuid_and_binary_searchable() {
        let u1 = Uuid::from_u128(1);
        let u2 = Uuid::from_u128(2);
        let u3 = Uuid::from_u128(3);

        let ns = Namespace::create(vec![
            trivial_table(u3),
            trivial_table(u1),
            trivial_table(u2),
        ]);

        assert!(ns.table(u1).is_some());
        assert!(ns.table(u2).is_some());
        assert!(ns.table(u3).is_some());
        assert!(ns.table(Uuid::from_u128(99)).is_none());
        assert_eq!(ns.len(), 3);
    }

    #[test]
    fn empty_namespace_has_no_tables() {
        let ns = Namespace::create(vec![]);
        assert!(ns.is_empty());
        assert!(ns.table(Uuid::nil()).is_none());
    }
}
