//! Binding tables: which script functions run for which host event

use std::collections::HashMap;

use ember_events::{Category, EntityKind};
use mlua::{Function, Lua};
use thiserror::Error;
use tracing::{debug, error};

use crate::function_ref::FunctionRef;
use crate::host::EntityCatalogue;

/// Key a binding is stored under within its category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Event(u32),
    Entry { entry: u32, event: u32 },
}

impl Selector {
    /// Global categories ignore the entry id
    pub fn for_category(category: Category, entry: u32, event: u32) -> Self {
        if category.is_entry_scoped() {
            Selector::Entry { entry, event }
        } else {
            Selector::Event(event)
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("unknown event type (category {category}, id {entry}, event {event})")]
    UnknownEvent {
        category: Category,
        entry: u32,
        event: u32,
    },

    #[error("couldn't find a {kind} with (ID: {entry}) for {category} event {event}")]
    UnknownEntity {
        category: Category,
        kind: EntityKind,
        entry: u32,
        event: u32,
    },

    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

#[derive(Debug, Default)]
struct BindingTable {
    bindings: HashMap<Selector, Vec<FunctionRef>>,
}

impl BindingTable {
    fn len(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }
}

/// One binding table per category
///
/// Functions registered for the same selector run in registration order.
/// Registering the same function twice runs it twice.
#[derive(Debug)]
pub struct BindingTables {
    tables: HashMap<Category, BindingTable>,
}

impl BindingTables {
    pub fn new() -> Self {
        Self {
            tables: Category::ALL
                .iter()
                .map(|category| (*category, BindingTable::default()))
                .collect(),
        }
    }

    /// Store a function for an event
    ///
    /// On rejection the function reference is released before returning, so the
    /// caller never has to clean up after a failed registration.
    pub fn register(
        &mut self,
        lua: &Lua,
        catalogue: &dyn EntityCatalogue,
        category: Category,
        entry: u32,
        event: u32,
        function: FunctionRef,
    ) -> Result<(), RegistrationError> {
        if event >= category.event_count() {
            function.release(lua);
            let err = RegistrationError::UnknownEvent {
                category,
                entry,
                event,
            };
            error!(target: "scripting", "{}", err);
            return Err(err);
        }

        if let Some(kind) = category.entity_kind() {
            if !catalogue.exists(kind, entry) {
                function.release(lua);
                let err = RegistrationError::UnknownEntity {
                    category,
                    kind,
                    entry,
                    event,
                };
                error!(target: "scripting", "{}", err);
                return Err(err);
            }
        }

        let selector = Selector::for_category(category, entry, event);
        self.tables
            .entry(category)
            .or_default()
            .bindings
            .entry(selector)
            .or_default()
            .push(function);

        debug!(target: "scripting", "Registered {} binding {:?}", category, selector);
        Ok(())
    }

    /// Functions bound to an event, in registration order
    ///
    /// References that no longer resolve are skipped.
    pub fn functions(&self, lua: &Lua, category: Category, entry: u32, event: u32) -> Vec<Function> {
        let selector = Selector::for_category(category, entry, event);
        self.tables
            .get(&category)
            .and_then(|table| table.bindings.get(&selector))
            .map(|refs| {
                refs.iter()
                    .filter_map(|function| function.function(lua).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_bindings(&self, category: Category, entry: u32, event: u32) -> bool {
        let selector = Selector::for_category(category, entry, event);
        self.tables
            .get(&category)
            .and_then(|table| table.bindings.get(&selector))
            .is_some_and(|refs| !refs.is_empty())
    }

    /// Number of functions bound anywhere in a category
    pub fn binding_count(&self, category: Category) -> usize {
        self.tables.get(&category).map_or(0, BindingTable::len)
    }

    /// Release every stored function; returns how many were released
    pub fn clear(&mut self, lua: &Lua) -> usize {
        let mut released = 0;
        for table in self.tables.values_mut() {
            for (_, refs) in table.bindings.drain() {
                for function in refs {
                    function.release(lua);
                    released += 1;
                }
            }
        }
        released
    }
}

impl Default for BindingTables {
    fn default() -> Self {
        Self::new()
    }
}
