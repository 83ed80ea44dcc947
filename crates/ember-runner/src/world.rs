use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use ember_events::{Category, CreatureEvent, GameObjectEvent, ServerEvent};
use ember_scripting_host::{
    spawn_reload_listener, Engine, HostObject, InMemoryCatalogue, ObjectGuid,
    ObjectInfo, ObjectKind, ReloadReason, ScriptScanner, TypeId,
};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::EmberConfig;

/// A minimal world: a clock, a set of spawned objects, and the scripting engine
/// that reacts to both
pub struct World {
    config: EmberConfig,
    catalogue: Rc<InMemoryCatalogue>,
    engine: Option<Engine>,
    objects: BTreeMap<ObjectGuid, ObjectInfo>,
    scanner: Option<ScriptScanner>,
    uptime: Duration,
}

impl World {
    pub fn new(config: EmberConfig) -> anyhow::Result<Self> {
        let catalogue = Rc::new(config.catalogue.build());
        let engine = Engine::from_config(
            config.world.partition(),
            &config.scripting,
            catalogue.clone(),
        ).map_err(|e| anyhow::anyhow!("{e}"))?;

        let scanner = (config.scripting.enabled && config.scripting.hot_reload).then(|| {
            info!(
                target: "scripting",
                "Hot reload enabled, scanning every {:?}",
                config.scripting.hot_reload_interval()
            );
            ScriptScanner::with_interval(
                config.scripting.script_dir(),
                config.scripting.hot_reload_interval(),
            )
        });

        let world = Self {
            config,
            catalogue,
            engine: Some(engine),
            objects: BTreeMap::new(),
            scanner,
            uptime: Duration::ZERO,
        };
        world.fire_server_event(ServerEvent::Startup, &[])?;
        Ok(world)
    }

    pub fn engine(&self) -> anyhow::Result<&Engine> {
        self.engine
            .as_ref()
            .context("scripting engine is not running")
    }

    pub fn catalogue(&self) -> &InMemoryCatalogue {
        &self.catalogue
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.world.tick_interval()
    }

    pub fn uptime(&self) -> Duration {
        self.uptime
    }

    fn fire_server_event(&self, event: ServerEvent, args: &[u32]) -> anyhow::Result<usize> {
        let engine = self.engine()?;
        if !engine.has_bindings(Category::Server, 0, event.id()) {
            return Ok(0);
        }
        let args = args
            .iter()
            .map(|arg| engine.push(*arg))
            .collect::<Result<Vec<_>, _>>().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(engine.dispatch(Category::Server, 0, event.id(), &args))
    }

    /// Fire an entry event for an object, passing the object itself
    fn fire_object_event(&self, object: &ObjectInfo, spawned: bool) -> anyhow::Result<usize> {
        let (category, event, kind) = match object.type_id {
            TypeId::Unit => {
                let event = if spawned {
                    CreatureEvent::Spawn.id()
                } else {
                    CreatureEvent::Remove.id()
                };
                (Category::Creature, event, ObjectKind::Creature)
            }
            TypeId::GameObject => {
                let event = if spawned {
                    GameObjectEvent::Spawn.id()
                } else {
                    GameObjectEvent::Remove.id()
                };
                (Category::GameObject, event, ObjectKind::GameObject)
            }
            _ => return Ok(0),
        };

        let engine = self.engine()?;
        if !engine.has_bindings(category, object.entry, event) {
            return Ok(0);
        }
        let value = engine.push_object(Some(object), kind).map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(engine.dispatch(category, object.entry, event, &[value]))
    }

    /// Advance the world by `diff`
    ///
    /// Scripts see a `WorldUpdate`, then due events fire: global ones first,
    /// then each spawned object's. A pending reload runs at the end of the tick.
    pub fn tick(&mut self, diff: Duration) -> anyhow::Result<()> {
        self.uptime += diff;
        let diff_ms = u32::try_from(diff.as_millis()).unwrap_or(u32::MAX);
        self.fire_server_event(ServerEvent::WorldUpdate, &[diff_ms])?;

        let engine = self
            .engine
            .as_ref()
            .context("scripting engine is not running")?;
        let mut fired = engine.update(diff);
        for guid in self.objects.keys() {
            fired += engine.update_object(*guid, diff);
        }
        if fired > 0 {
            debug!(target: "scripting", "{} scheduled events fired", fired);
        }

        if let Some(scanner) = self.scanner.as_mut() {
            if scanner.should_scan() && scanner.scan_changes().has_changes() {
                engine.request_reload(ReloadReason::FilesChanged);
            }
        }

        if engine.reload_requested().is_some() {
            self.reload()?;
        }
        Ok(())
    }

    /// Bring an object into the world
    pub fn spawn(&mut self, object: ObjectInfo) -> anyhow::Result<()> {
        debug!("Spawning {} ({})", object.name, object.guid);
        self.fire_object_event(&object, true)?;
        self.objects.insert(object.guid(), object);
        Ok(())
    }

    /// Remove an object from the world; scripts lose access to it immediately
    pub fn despawn(&mut self, guid: ObjectGuid) -> anyhow::Result<bool> {
        let Some(object) = self.objects.remove(&guid) else {
            return Ok(false);
        };
        self.fire_object_event(&object, false)?;
        self.engine()?.forget(guid).map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(true)
    }

    pub fn request_reload(&self, reason: ReloadReason) -> anyhow::Result<()> {
        self.engine()?.request_reload(reason);
        Ok(())
    }

    /// Tear the engine down and start it again from freshly discovered scripts
    pub fn reload(&mut self) -> anyhow::Result<()> {
        let engine = self
            .engine
            .take()
            .context("scripting engine is not running")?;
        self.engine = Some(engine.reload_from_config(&self.config.scripting).map_err(|e| anyhow::anyhow!("{e}"))?);
        self.fire_server_event(ServerEvent::Startup, &[])?;
        Ok(())
    }

    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.fire_server_event(ServerEvent::Shutdown, &[])?;
        // Dropping the engine gives scripts their final LuaStateClose
        self.engine.take();
        info!("World stopped after {:?}", self.uptime);
        Ok(())
    }
}

/// Drive `world` on a fixed interval until Ctrl+C or `max_ticks` ticks
pub async fn run(mut world: World, max_ticks: Option<u64>) -> anyhow::Result<()> {
    let mut reload_rx = spawn_reload_listener();
    let mut interval = tokio::time::interval(world.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last = Instant::now();
    let mut ticks = 0u64;
    info!("World running, ticking every {:?}", world.tick_interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                world.tick(now - last)?;
                last = now;

                ticks += 1;
                if max_ticks.is_some_and(|max| ticks >= max) {
                    info!("Reached {} ticks, stopping", ticks);
                    break;
                }
            }
            Ok(()) = reload_rx.changed() => {
                let request = *reload_rx.borrow_and_update();
                if let Some(request) = request {
                    world.request_reload(request.reason)?;
                }
            }
            _ = &mut shutdown => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    world.shutdown()
}
