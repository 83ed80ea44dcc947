use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use ember_events::EntityKind;

/// Host lookup used to validate entry scoped registrations
pub trait EntityCatalogue {
    /// Whether a template with this entry id exists
    fn exists(&self, kind: EntityKind, entry: u32) -> bool;
}

impl<F> EntityCatalogue for F
where
    F: Fn(EntityKind, u32) -> bool,
{
    fn exists(&self, kind: EntityKind, entry: u32) -> bool {
        self(kind, entry)
    }
}

/// Catalogue backed by in-memory sets of template entries
///
/// Opcodes are not stored individually: every opcode below `opcode_count` exists.
#[derive(Debug, Default)]
pub struct InMemoryCatalogue {
    entries: RefCell<HashMap<EntityKind, HashSet<u32>>>,
    opcode_count: Cell<u32>,
}

impl InMemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_opcode_count(opcode_count: u32) -> Self {
        let catalogue = Self::default();
        catalogue.opcode_count.set(opcode_count);
        catalogue
    }

    pub fn add(&self, kind: EntityKind, entry: u32) {
        if kind == EntityKind::Opcode {
            self.opcode_count
                .set(self.opcode_count.get().max(entry.saturating_add(1)));
            return;
        }
        self.entries.borrow_mut().entry(kind).or_default().insert(entry);
    }

    pub fn add_all(&self, kind: EntityKind, entries: impl IntoIterator<Item = u32>) {
        for entry in entries {
            self.add(kind, entry);
        }
    }

    pub fn remove(&self, kind: EntityKind, entry: u32) -> bool {
        self.entries
            .borrow_mut()
            .get_mut(&kind)
            .map(|set| set.remove(&entry))
            .unwrap_or(false)
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        if kind == EntityKind::Opcode {
            return self.opcode_count.get() as usize;
        }
        self.entries.borrow().get(&kind).map_or(0, HashSet::len)
    }
}

impl EntityCatalogue for InMemoryCatalogue {
    fn exists(&self, kind: EntityKind, entry: u32) -> bool {
        match kind {
            EntityKind::Opcode => entry < self.opcode_count.get(),
            _ => self
                .entries
                .borrow()
                .get(&kind)
                .is_some_and(|set| set.contains(&entry)),
        }
    }
}
