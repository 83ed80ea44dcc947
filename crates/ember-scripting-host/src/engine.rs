//! The engine instance: one Lua runtime plus everything scripts registered in it

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use ember_events::{Category, ServerEvent};
use mlua::{AnyUserData, Function, Lua, Value, Variadic};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::api;
use crate::bindings::{BindingTables, RegistrationError};
use crate::config::ScriptingConfig;
use crate::discovery::{script_sources, ScriptSource};
use crate::function_ref::{FunctionRef, RefCounter};
use crate::host::EntityCatalogue;
use crate::marshal::{call_function, report, Push};
use crate::object::{HostObject, ObjectGuid, ObjectKind, ObjectRef};
use crate::registry::NativeObjectRegistry;
use crate::reload::ReloadReason;
use crate::scheduler::{EventId, ProcessorKey, Scheduler};

/// Identifies the world partition an engine serves
///
/// At most one engine may be alive per partition. Hosts with a single world
/// use [`PartitionId::DEFAULT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub const DEFAULT: PartitionId = PartitionId(0);
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a scripting engine is already active for partition {0}")]
    InstanceActive(PartitionId),

    #[error("the scripting engine has been torn down")]
    TornDown,

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("lua runtime error: {0}")]
    Lua(#[from] mlua::Error),
}

fn active_partitions() -> &'static Mutex<HashSet<PartitionId>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PartitionId>>> = OnceLock::new();
    ACTIVE.get_or_init(Default::default)
}

/// Claim on a partition, released when dropped
struct ActiveSlot(PartitionId);

impl ActiveSlot {
    fn claim(partition: PartitionId) -> Result<Self, EngineError> {
        let mut active = active_partitions()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(partition) {
            return Err(EngineError::InstanceActive(partition));
        }
        Ok(ActiveSlot(partition))
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        active_partitions()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.0);
    }
}

/// State shared between the engine and the functions it exposes to scripts
pub(crate) struct EngineState {
    pub(crate) bindings: RefCell<BindingTables>,
    pub(crate) scheduler: Scheduler,
    pub(crate) objects: NativeObjectRegistry,
    pub(crate) refs: RefCounter,
    catalogue: Rc<dyn EntityCatalogue>,
    reload: Cell<Option<ReloadReason>>,
}

impl EngineState {
    pub(crate) fn register(
        &self,
        lua: &Lua,
        category: Category,
        entry: u32,
        event: u32,
        function: Function,
    ) -> Result<(), RegistrationError> {
        let function = FunctionRef::new(lua, function, &self.refs)?;
        self.bindings.borrow_mut().register(
            lua,
            self.catalogue.as_ref(),
            category,
            entry,
            event,
            function,
        )
    }

    /// Run every function bound to an event with `(event, args...)`
    ///
    /// The bindings are snapshotted first so callbacks may register further
    /// bindings; those only take part in the next dispatch.
    pub(crate) fn dispatch(
        &self,
        lua: &Lua,
        category: Category,
        entry: u32,
        event: u32,
        args: &[Value],
    ) -> usize {
        let functions = self.bindings.borrow().functions(lua, category, entry, event);
        for function in &functions {
            call_function(function, (event, Variadic::from_iter(args.iter().cloned())));
        }
        functions.len()
    }

    pub(crate) fn schedule(
        &self,
        lua: &Lua,
        key: ProcessorKey,
        function: Function,
        delay: Duration,
        calls: u32,
        target: Option<ObjectRef>,
    ) -> mlua::Result<EventId> {
        let callback = FunctionRef::new(lua, function, &self.refs)?;
        Ok(self.scheduler.schedule(key, delay, calls, callback, target))
    }

    pub(crate) fn request_reload(&self, reason: ReloadReason) {
        if self.reload.get().is_none() {
            info!(target: "scripting", "Script reload requested ({:?})", reason);
            self.reload.set(Some(reason));
        }
    }
}

/// Engine state for the Lua state a script function is running in
pub(crate) fn engine_state(lua: &Lua) -> mlua::Result<Rc<EngineState>> {
    lua.app_data_ref::<Weak<EngineState>>()
        .and_then(|state| state.upgrade())
        .ok_or_else(|| mlua::Error::external(EngineError::TornDown))
}

/// A live scripting runtime for one partition
///
/// Dropping the engine tears it down: scripts get a final
/// `ServerEvent::LuaStateClose`, then every scheduled event and binding is
/// released, and the Lua state is closed last.
pub struct Engine {
    partition: PartitionId,
    state: Rc<EngineState>,
    loaded: Vec<String>,
    _slot: ActiveSlot,
    // Declared last so it outlives everything that holds registry references
    lua: Lua,
}

impl Engine {
    /// Create an engine and run `sources`
    ///
    /// Sources run last first, so a list in discovery order runs extensions
    /// before the scripts that use them. A source that fails to load is logged
    /// and skipped.
    pub fn new(
        partition: PartitionId,
        catalogue: Rc<dyn EntityCatalogue>,
        sources: &[ScriptSource],
    ) -> Result<Self, EngineError> {
        let slot = ActiveSlot::claim(partition)?;
        let lua = Lua::new();

        let state = Rc::new(EngineState {
            bindings: RefCell::new(BindingTables::new()),
            scheduler: Scheduler::new(),
            objects: NativeObjectRegistry::new(&lua)?,
            refs: RefCounter::new(),
            catalogue,
            reload: Cell::new(None),
        });
        lua.set_app_data(Rc::downgrade(&state));
        api::register_globals(&lua)?;

        let mut engine = Engine {
            partition,
            state,
            loaded: Vec::new(),
            _slot: slot,
            lua,
        };
        engine.run_scripts(sources);
        Ok(engine)
    }

    /// Create an engine running the scripts a configuration points at
    pub fn from_config(
        partition: PartitionId,
        config: &ScriptingConfig,
        catalogue: Rc<dyn EntityCatalogue>,
    ) -> Result<Self, EngineError> {
        if !config.enabled {
            info!(target: "scripting", "Scripting disabled, starting engine without scripts");
            return Self::new(partition, catalogue, &[]);
        }

        let script_dir = config.script_dir();
        info!(target: "scripting", "Searching scripts from `{}`", script_dir.display());
        let sources = script_sources(config);
        Self::new(partition, catalogue, &sources)
    }

    fn run_scripts(&mut self, sources: &[ScriptSource]) -> usize {
        let mut count = 0;
        for source in sources.iter().rev() {
            match source.execute(&self.lua) {
                Ok(()) => {
                    debug!(target: "scripting", "Successfully loaded `{}`", source.name());
                    self.loaded.push(source.name());
                    count += 1;
                }
                Err(err) => {
                    error!(target: "scripting", "Error loading `{}`", source.name());
                    report(&err);
                }
            }
        }
        info!(
            target: "scripting",
            "Loaded {} of {} scripts for partition {}",
            count,
            sources.len(),
            self.partition
        );
        count
    }

    /// Tear this engine down, rediscover scripts, and start a fresh engine
    ///
    /// Discovery runs only after teardown, so files written by the teardown
    /// hook are picked up.
    pub fn reload_from_config(self, config: &ScriptingConfig) -> Result<Engine, EngineError> {
        let partition = self.partition;
        let catalogue = Rc::clone(&self.state.catalogue);
        info!(target: "scripting", "Reloading scripts for partition {}", partition);
        drop(self);
        Engine::from_config(partition, config, catalogue)
    }

    /// Tear this engine down and start a fresh one for the same partition
    pub fn reload(self, sources: &[ScriptSource]) -> Result<Engine, EngineError> {
        let partition = self.partition;
        let catalogue = Rc::clone(&self.state.catalogue);
        info!(target: "scripting", "Reloading scripts for partition {}", partition);
        drop(self);
        Engine::new(partition, catalogue, sources)
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Names of the sources that loaded successfully, in execution order
    pub fn loaded_scripts(&self) -> &[String] {
        &self.loaded
    }

    /// Bind a function to an event from the host side
    pub fn register(
        &self,
        category: Category,
        entry: u32,
        event: u32,
        function: Function,
    ) -> Result<(), RegistrationError> {
        self.state
            .register(&self.lua, category, entry, event, function)
    }

    /// Fire an event; returns how many bound functions ran
    ///
    /// Every bound function runs even if an earlier one raised.
    pub fn dispatch(&self, category: Category, entry: u32, event: u32, args: &[Value]) -> usize {
        self.state
            .dispatch(&self.lua, category, entry, event, args)
    }

    /// Whether firing this event would run anything; lets hosts skip building arguments
    pub fn has_bindings(&self, category: Category, entry: u32, event: u32) -> bool {
        self.state
            .bindings
            .borrow()
            .has_bindings(category, entry, event)
    }

    pub fn push<T: Push>(&self, value: T) -> mlua::Result<Value> {
        value.push(&self.lua)
    }

    /// Hand a host object to scripts as `kind`, resolved to its most-derived kind
    pub fn push_object(
        &self,
        object: Option<&dyn HostObject>,
        kind: ObjectKind,
    ) -> mlua::Result<Value> {
        self.state.objects.push(&self.lua, object, kind)
    }

    /// Userdata scripts currently hold for an object, if any
    pub fn lookup_object(&self, guid: ObjectGuid) -> mlua::Result<Option<AnyUserData>> {
        self.state.objects.lookup(&self.lua, guid)
    }

    /// The host is destroying an object
    ///
    /// Script references to it become invalid and its scheduled events are
    /// cancelled. Returns whether scripts held a reference.
    pub fn forget(&self, guid: ObjectGuid) -> mlua::Result<bool> {
        let cancelled = self
            .state
            .scheduler
            .remove_processor(&self.lua, ProcessorKey::Object(guid));
        if cancelled > 0 {
            debug!(target: "scripting", "Cancelled {} events of destroyed object {}", cancelled, guid);
        }
        self.state.objects.forget(&self.lua, guid)
    }

    /// Schedule a function from the host side
    ///
    /// With a target, the event belongs to that object's processor and is
    /// driven by [`Engine::update_object`].
    pub fn schedule_event(
        &self,
        function: Function,
        delay: Duration,
        calls: u32,
        target: Option<&dyn HostObject>,
    ) -> Result<EventId, EngineError> {
        let (key, target) = match target {
            Some(object) => (
                ProcessorKey::Object(object.guid()),
                Some(ObjectRef::new(
                    object,
                    ObjectKind::Object.resolve(object.type_id()),
                )),
            ),
            None => (ProcessorKey::Global, None),
        };
        Ok(self
            .state
            .schedule(&self.lua, key, function, delay, calls, target)?)
    }

    pub fn cancel_event(&self, id: EventId) -> bool {
        self.state.scheduler.cancel(&self.lua, id)
    }

    pub fn is_event_scheduled(&self, id: EventId) -> bool {
        self.state.scheduler.is_scheduled(id)
    }

    pub fn remaining_calls(&self, id: EventId) -> Option<u32> {
        self.state.scheduler.remaining_calls(id)
    }

    /// Advance the global processor; returns how many callbacks fired
    pub fn update(&self, diff: Duration) -> usize {
        self.state.scheduler.update(
            &self.lua,
            &self.state.objects,
            ProcessorKey::Global,
            diff,
        )
    }

    /// Advance one object's processor
    pub fn update_object(&self, guid: ObjectGuid, diff: Duration) -> usize {
        self.state.scheduler.update(
            &self.lua,
            &self.state.objects,
            ProcessorKey::Object(guid),
            diff,
        )
    }

    pub fn pending_events(&self) -> usize {
        self.state.scheduler.len()
    }

    /// Function references currently held by bindings and scheduled events
    pub fn live_function_refs(&self) -> usize {
        self.state.refs.live()
    }

    pub fn request_reload(&self, reason: ReloadReason) {
        self.state.request_reload(reason);
    }

    /// Set once a reload was requested; the host performs it between ticks
    pub fn reload_requested(&self) -> Option<ReloadReason> {
        self.state.reload.get()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispatch(Category::Server, 0, ServerEvent::LuaStateClose.id(), &[]);

        let events = self.state.scheduler.clear(&self.lua);
        let bindings = self.state.bindings.borrow_mut().clear(&self.lua);
        self.state.objects.close(&self.lua);
        self.lua.remove_app_data::<Weak<EngineState>>();

        debug!(
            target: "scripting",
            "Engine for partition {} closed, released {} events and {} bindings",
            self.partition,
            events,
            bindings
        );
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("partition", &self.partition)
            .field("loaded", &self.loaded)
            .field("pending_events", &self.pending_events())
            .field("live_function_refs", &self.live_function_refs())
            .finish()
    }
}
