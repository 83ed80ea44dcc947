use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use mlua::{AnyUserData, Lua, RegistryKey, Table, Value};
use tracing::{debug, warn};

use crate::object::{HostObject, ObjectGuid, ObjectKind, ObjectRef};

/// Guid-keyed cache of the userdata handed to scripts
///
/// Pushing the same object twice yields the same userdata so scripts can compare
/// references and key tables by them. The cache is weak-valued: once no script
/// holds a reference the collector may drop the entry, and the next push simply
/// creates a fresh userdata.
///
/// Validity is tracked per guid outside Lua: every handle pushed for a guid
/// shares one flag, so `forget` reaches handles the cache no longer points at.
pub struct NativeObjectRegistry {
    table: RefCell<Option<RegistryKey>>,
    validity: RefCell<HashMap<ObjectGuid, Weak<Cell<bool>>>>,
    prune_at: Cell<usize>,
}

const MIN_PRUNE_AT: usize = 64;

impl NativeObjectRegistry {
    pub fn new(lua: &Lua) -> mlua::Result<Self> {
        let table = lua.create_table()?;
        let metatable = lua.create_table()?;
        metatable.raw_set("__mode", "v")?;
        table.set_metatable(Some(metatable));

        Ok(Self {
            table: RefCell::new(Some(lua.create_registry_value(table)?)),
            validity: RefCell::new(HashMap::new()),
            prune_at: Cell::new(MIN_PRUNE_AT),
        })
    }

    fn table(&self, lua: &Lua) -> mlua::Result<Table> {
        match self.table.borrow().as_ref() {
            Some(key) => lua.registry_value(key),
            None => Err(mlua::Error::RuntimeError(
                "native object registry is closed".to_string(),
            )),
        }
    }

    /// Push a host object as `kind`, resolved to its most-derived kind
    ///
    /// An absent object pushes nil.
    pub fn push(
        &self,
        lua: &Lua,
        object: Option<&dyn HostObject>,
        kind: ObjectKind,
    ) -> mlua::Result<Value> {
        match object {
            Some(object) => {
                let kind = kind.resolve(object.type_id());
                self.push_ref(lua, ObjectRef::new(object, kind))
            }
            None => Ok(Value::Nil),
        }
    }

    /// Push an object reference, reusing the cached userdata when it has the same kind
    pub fn push_ref(&self, lua: &Lua, mut object: ObjectRef) -> mlua::Result<Value> {
        let table = self.table(lua)?;
        let key = object.guid().registry_key();

        if let Value::UserData(userdata) = table.raw_get::<Value>(key.as_str())? {
            let reusable = userdata
                .borrow::<ObjectRef>()
                .map(|cached| cached.kind() == object.kind() && cached.is_valid())
                .unwrap_or(false);
            if reusable {
                return Ok(Value::UserData(userdata));
            }
        }

        self.track(&mut object);
        let userdata = lua.create_userdata(object)?;
        table.raw_set(key, userdata.clone())?;
        Ok(Value::UserData(userdata))
    }

    /// Tie `object` to the validity flag of its guid, registering one if needed
    fn track(&self, object: &mut ObjectRef) {
        let mut validity = self.validity.borrow_mut();
        match validity.get(&object.guid()).and_then(Weak::upgrade) {
            Some(valid) if valid.get() => object.share_validity(valid),
            _ => {
                if validity.len() >= self.prune_at.get() {
                    validity.retain(|_, valid| valid.strong_count() > 0);
                    self.prune_at.set((validity.len() * 2).max(MIN_PRUNE_AT));
                }
                validity.insert(object.guid(), Rc::downgrade(object.validity()));
            }
        }
    }

    /// Cached userdata for an object, if scripts still hold one
    pub fn lookup(&self, lua: &Lua, guid: ObjectGuid) -> mlua::Result<Option<AnyUserData>> {
        let table = self.table(lua)?;
        match table.raw_get::<Value>(guid.registry_key())? {
            Value::UserData(userdata) => Ok(Some(userdata)),
            _ => Ok(None),
        }
    }

    /// Drop the cache entry for an object the host is destroying
    ///
    /// Every handle pushed for the object is marked destroyed, including ones
    /// the cache no longer holds, so any copy a script kept raises on use.
    /// Returns whether scripts were handed the object.
    pub fn forget(&self, lua: &Lua, guid: ObjectGuid) -> mlua::Result<bool> {
        let table = self.table(lua)?;
        let key = guid.registry_key();

        let tracked = match self.validity.borrow_mut().remove(&guid) {
            Some(valid) => {
                if let Some(valid) = valid.upgrade() {
                    valid.set(false);
                }
                true
            }
            None => false,
        };

        let cached = match table.raw_get::<Value>(key.as_str())? {
            Value::Nil => false,
            Value::UserData(userdata) => {
                match userdata.borrow::<ObjectRef>() {
                    Ok(object) => object.invalidate(),
                    Err(err) => {
                        warn!(target: "scripting", "Could not mark {} as destroyed: {}", guid, err)
                    }
                }
                true
            }
            _ => true,
        };

        if cached {
            table.raw_set(key, Value::Nil)?;
        }
        if tracked || cached {
            debug!(target: "scripting", "Forgot object {}", guid);
        }
        Ok(tracked || cached)
    }

    /// Number of guids with live handles tracked for invalidation
    pub fn tracked(&self) -> usize {
        self.validity
            .borrow()
            .values()
            .filter(|valid| valid.strong_count() > 0)
            .count()
    }

    /// Release the registry table; every later call fails and every handle
    /// scripts still hold becomes invalid
    pub fn close(&self, lua: &Lua) {
        let handles: Vec<_> = self.validity.borrow_mut().drain().collect();
        for (_, valid) in handles {
            if let Some(valid) = valid.upgrade() {
                valid.set(false);
            }
        }

        if let Some(key) = self.table.borrow_mut().take() {
            if let Err(err) = lua.remove_registry_value(key) {
                warn!(target: "scripting", "Failed to release object registry: {}", err);
            }
        }
    }
}
