//! Embedded Lua scripting host for game servers
//!
//! An [`Engine`] owns one Lua runtime per world partition. Scripts bind
//! functions to host events with the `Register*Event` globals, schedule
//! delayed callbacks with `CreateLuaEvent` or `obj:RegisterEvent`, and see
//! host objects as identity-preserving userdata.
//!
//! The host drives everything from its own thread: it fires events with
//! [`Engine::dispatch`], advances time with [`Engine::update`], and tells the
//! engine about destroyed objects with [`Engine::forget`].

pub mod bindings;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod function_ref;
pub mod host;
pub mod marshal;
pub mod object;
pub mod registry;
pub mod reload;
pub mod scheduler;

mod api;

pub use bindings::{BindingTables, RegistrationError, Selector};
pub use config::ScriptingConfig;
pub use discovery::{
    discover_scripts, script_sources, ScanResult, ScriptScanner, ScriptSource,
    DEFAULT_SCAN_INTERVAL,
};
pub use engine::{Engine, EngineError, PartitionId};
pub use function_ref::{FunctionRef, RefCounter};
pub use host::{EntityCatalogue, InMemoryCatalogue};
pub use marshal::{call_function, check_function, report, ArgumentError, Check, Push};
pub use object::{
    check_object, check_object_opt, HostObject, ObjectGuid, ObjectInfo, ObjectKind, ObjectRef,
    TypeId,
};
pub use registry::NativeObjectRegistry;
pub use reload::{spawn_reload_listener, ReloadReason, ReloadRequest};
pub use scheduler::{EventId, ProcessorKey, Scheduler};

// Hosts name events through these without a direct dependency
pub use ember_events as events;
pub use mlua;
