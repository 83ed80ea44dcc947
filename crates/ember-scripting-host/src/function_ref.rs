use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use mlua::{Function, Lua, RegistryKey};

/// Count of function references an engine currently holds
///
/// Shared between the engine and every `FunctionRef` it hands out so leaks
/// show up as a non-zero count after teardown paths have run.
#[derive(Debug, Clone, Default)]
pub struct RefCounter(Rc<Cell<usize>>);

impl RefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.0.get()
    }
}

/// Owned handle to a script function kept alive in the Lua registry
///
/// The handle is released exactly once: either explicitly through
/// [`FunctionRef::release`], which frees the registry slot right away, or when
/// the Lua state itself is closed.
pub struct FunctionRef {
    key: Option<RegistryKey>,
    counter: RefCounter,
}

impl FunctionRef {
    pub fn new(lua: &Lua, function: Function, counter: &RefCounter) -> mlua::Result<Self> {
        let key = lua.create_registry_value(function)?;
        counter.0.set(counter.0.get() + 1);
        Ok(Self {
            key: Some(key),
            counter: counter.clone(),
        })
    }

    /// Resolve the handle back to a callable function
    pub fn function(&self, lua: &Lua) -> mlua::Result<Function> {
        match &self.key {
            Some(key) => lua.registry_value(key),
            None => Err(mlua::Error::RuntimeError(
                "function reference already released".to_string(),
            )),
        }
    }

    /// Give the registry slot back to the runtime
    pub fn release(mut self, lua: &Lua) {
        if let Some(key) = self.key.take() {
            if let Err(err) = lua.remove_registry_value(key) {
                tracing::warn!(target: "scripting", "Failed to release function reference: {}", err);
            }
        }
    }
}

impl Drop for FunctionRef {
    fn drop(&mut self) {
        self.counter.0.set(self.counter.0.get().saturating_sub(1));
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRef")
            .field("released", &self.key.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_tracks_live_refs() {
        let lua = Lua::new();
        let counter = RefCounter::new();
        let function = lua.create_function(|_, ()| Ok(7)).unwrap();

        let first = FunctionRef::new(&lua, function.clone(), &counter).unwrap();
        let second = FunctionRef::new(&lua, function, &counter).unwrap();
        assert_eq!(counter.live(), 2);

        assert_eq!(first.function(&lua).unwrap().call::<i32>(()).unwrap(), 7);

        first.release(&lua);
        assert_eq!(counter.live(), 1);
        drop(second);
        assert_eq!(counter.live(), 0);
    }
}
