//! Global functions scripts call into

use std::time::Duration;

use ember_events::Category;
use mlua::{Function, Lua, Value, Variadic};
use tracing::info;

use crate::engine::engine_state;
use crate::marshal::{check_function, Check};
use crate::reload::ReloadReason;
use crate::scheduler::{EventId, ProcessorKey};

const REGISTER_FUNCTIONS: [(&str, Category); 13] = [
    ("RegisterServerEvent", Category::Server),
    ("RegisterPlayerEvent", Category::Player),
    ("RegisterGuildEvent", Category::Guild),
    ("RegisterGroupEvent", Category::Group),
    ("RegisterVehicleEvent", Category::Vehicle),
    ("RegisterPacketEvent", Category::Packet),
    ("RegisterCreatureEvent", Category::Creature),
    ("RegisterCreatureGossipEvent", Category::CreatureGossip),
    ("RegisterGameObjectEvent", Category::GameObject),
    ("RegisterGameObjectGossipEvent", Category::GameObjectGossip),
    ("RegisterItemEvent", Category::Item),
    ("RegisterItemGossipEvent", Category::ItemGossip),
    ("RegisterPlayerGossipEvent", Category::PlayerGossip),
];

pub(crate) fn register_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    for (name, category) in REGISTER_FUNCTIONS {
        globals.set(name, register_function(lua, category)?)?;
    }

    // CreateLuaEvent(function, delay_ms, repeats) -> event id
    globals.set(
        "CreateLuaEvent",
        lua.create_function(|lua, args: Variadic<Value>| {
            let function = check_function(&args, 1)?;
            let delay = u32::check(&args, 2)?;
            let repeats = u32::check(&args, 3)?;

            engine_state(lua)?.schedule(
                lua,
                ProcessorKey::Global,
                function,
                Duration::from_millis(u64::from(delay)),
                repeats,
                None,
            )
        })?,
    )?;

    globals.set(
        "RemoveEventById",
        lua.create_function(|lua, args: Variadic<Value>| {
            let id = EventId::check(&args, 1)?;
            Ok(engine_state(lua)?.scheduler.cancel(lua, id))
        })?,
    )?;

    globals.set(
        "RemoveEvents",
        lua.create_function(|lua, ()| {
            Ok(engine_state(lua)?
                .scheduler
                .cancel_processor(lua, ProcessorKey::Global))
        })?,
    )?;

    globals.set(
        "ReloadScripts",
        lua.create_function(|lua, ()| {
            engine_state(lua)?.request_reload(ReloadReason::Script);
            Ok(())
        })?,
    )?;

    globals.set("print", print_function(lua)?)?;

    Ok(())
}

/// `Register*Event([entry,] event, function)`
fn register_function(lua: &Lua, category: Category) -> mlua::Result<Function> {
    lua.create_function(move |lua, args: Variadic<Value>| {
        let (entry, event, function) = if category.is_entry_scoped() {
            (
                u32::check(&args, 1)?,
                u32::check(&args, 2)?,
                check_function(&args, 3)?,
            )
        } else {
            (0, u32::check(&args, 1)?, check_function(&args, 2)?)
        };

        engine_state(lua)?
            .register(lua, category, entry, event, function)
            .map_err(mlua::Error::external)
    })
}

/// Script output goes to the log instead of stdout
fn print_function(lua: &Lua) -> mlua::Result<Function> {
    lua.create_function(|lua, args: Variadic<Value>| {
        let tostring: Function = lua.globals().get("tostring")?;
        let mut parts = Vec::with_capacity(args.len());
        for value in args.iter() {
            let text: mlua::String = tostring.call(value.clone())?;
            parts.push(text.to_string_lossy());
        }
        info!(target: "scripting", "{}", parts.join("\t"));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, PartitionId};
    use crate::host::InMemoryCatalogue;
    use crate::ScriptSource;
    use ember_events::EntityKind;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine_with(catalogue: InMemoryCatalogue, code: &str) -> Engine {
        static NEXT: AtomicU32 = AtomicU32::new(2_000);
        let partition = PartitionId(NEXT.fetch_add(1, Ordering::Relaxed));
        Engine::new(
            partition,
            Rc::new(catalogue),
            &[ScriptSource::chunk("api_test", code)],
        )
        .unwrap()
    }

    #[test]
    fn test_register_rejects_unknown_event_with_script_error() {
        let engine = engine_with(InMemoryCatalogue::new(), "");

        let err = engine
            .lua()
            .load("RegisterServerEvent(999, function() end)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("unknown event type"));
        assert_eq!(engine.live_function_refs(), 0);
    }

    #[test]
    fn test_register_entry_event_checks_catalogue() {
        let catalogue = InMemoryCatalogue::new();
        catalogue.add(EntityKind::Creature, 448);
        let engine = engine_with(catalogue, "");

        engine
            .lua()
            .load("RegisterCreatureEvent(448, 4, function() end)")
            .exec()
            .unwrap();
        assert!(engine.has_bindings(Category::Creature, 448, 4));

        let err = engine
            .lua()
            .load("RegisterCreatureEvent(449, 4, function() end)")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("couldn't find a creature"));
    }

    #[test]
    fn test_register_argument_errors() {
        let engine = engine_with(InMemoryCatalogue::new(), "");

        let err = engine
            .lua()
            .load("RegisterPlayerEvent(3, 'not a function')")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("bad argument #2 (function expected"));
    }

    #[test]
    fn test_create_and_remove_lua_event() {
        let engine = engine_with(
            InMemoryCatalogue::new(),
            r#"
            fired = 0
            event_id = CreateLuaEvent(function() fired = fired + 1 end, 100, 0)
            "#,
        );

        engine.update(Duration::from_millis(100));
        engine.update(Duration::from_millis(100));
        assert_eq!(engine.lua().globals().get::<u32>("fired").unwrap(), 2);

        let removed: bool = engine
            .lua()
            .load("return RemoveEventById(event_id)")
            .eval()
            .unwrap();
        assert!(removed);
        engine.update(Duration::from_millis(100));
        assert_eq!(engine.lua().globals().get::<u32>("fired").unwrap(), 2);
        assert_eq!(engine.live_function_refs(), 0);
    }

    #[test]
    fn test_remove_events_clears_global_processor() {
        let engine = engine_with(
            InMemoryCatalogue::new(),
            r#"
            CreateLuaEvent(function() end, 10, 1)
            CreateLuaEvent(function() end, 20, 1)
            "#,
        );
        assert_eq!(engine.pending_events(), 2);

        let removed: u32 = engine.lua().load("return RemoveEvents()").eval().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(engine.pending_events(), 0);
    }

    #[test]
    fn test_print_does_not_fail_on_mixed_values() {
        let engine = engine_with(InMemoryCatalogue::new(), "");
        engine
            .lua()
            .load("print('hello', 1, nil, true, {})")
            .exec()
            .unwrap();
    }
}
