//! Delayed and repeating script events
//!
//! Events live in per-owner processors: one global processor plus one per
//! native object that has events registered on it. Each processor keeps its
//! own clock, advanced by the host's update calls, so firing is deterministic
//! and does not depend on wall time.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use mlua::{IntoLua, Lua, Value};
use tracing::debug;

use crate::function_ref::FunctionRef;
use crate::marshal::{arg, call_function, report, ArgumentError, Check};
use crate::object::{ObjectGuid, ObjectRef};
use crate::registry::NativeObjectRegistry;

/// Unique identifier for a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl IntoLua for EventId {
    fn into_lua(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::Integer(self.0 as i64))
    }
}

impl Check for EventId {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        let value = arg(args, narg);
        match value {
            Some(Value::Integer(id)) if *id >= 0 => Ok(EventId(*id as u64)),
            Some(Value::Number(id)) if *id >= 0.0 && id.fract() == 0.0 => Ok(EventId(*id as u64)),
            _ => Err(ArgumentError::new(narg, "event id", value)),
        }
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        Self::check(args, narg).unwrap_or(default)
    }
}

/// Owner of a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKey {
    Global,
    Object(ObjectGuid),
}

/// Position in a processor's queue: due time, then insertion order
type DueKey = (Duration, u64);

#[derive(Debug)]
struct ScheduledEvent {
    delay: Duration,
    /// Remaining invocations, 0 repeats forever
    calls: u32,
    target: Option<ObjectRef>,
    callback: FunctionRef,
    due: DueKey,
}

#[derive(Debug, Default)]
struct EventProcessor {
    clock: Duration,
    sequence: u64,
    live: HashMap<EventId, ScheduledEvent>,
    queue: BTreeMap<DueKey, EventId>,
}

impl EventProcessor {
    fn next_due(&mut self, delay: Duration) -> DueKey {
        let due = (self.clock + delay, self.sequence);
        self.sequence += 1;
        due
    }

    fn insert(&mut self, id: EventId, event: ScheduledEvent) {
        self.queue.insert(event.due, id);
        self.live.insert(id, event);
    }

    fn requeue(&mut self, id: EventId) {
        let Some(delay) = self.live.get(&id).map(|event| event.delay) else {
            return;
        };
        let due = self.next_due(delay);
        if let Some(event) = self.live.get_mut(&id) {
            self.queue.remove(&event.due);
            event.due = due;
            self.queue.insert(due, id);
        }
    }

    fn remove(&mut self, id: EventId) -> Option<ScheduledEvent> {
        let event = self.live.remove(&id)?;
        self.queue.remove(&event.due);
        Some(event)
    }

    /// Pop every event due at the current clock, earliest first
    fn take_due(&mut self) -> Vec<EventId> {
        let mut due = Vec::new();
        while let Some((&(at, _), _)) = self.queue.first_key_value() {
            if at > self.clock {
                break;
            }
            if let Some((_, id)) = self.queue.pop_first() {
                due.push(id);
            }
        }
        due
    }

    fn drain(&mut self) -> Vec<ScheduledEvent> {
        self.queue.clear();
        self.live.drain().map(|(_, event)| event).collect()
    }
}

#[derive(Debug, Default)]
struct EventManager {
    processors: HashMap<ProcessorKey, EventProcessor>,
    owners: HashMap<EventId, ProcessorKey>,
    next_id: u64,
}

impl EventManager {
    fn remove(&mut self, id: EventId) -> Option<ScheduledEvent> {
        let key = self.owners.remove(&id)?;
        self.processors.get_mut(&key)?.remove(id)
    }

    fn drain(&mut self, key: ProcessorKey) -> Vec<ScheduledEvent> {
        let events = self
            .processors
            .get_mut(&key)
            .map(EventProcessor::drain)
            .unwrap_or_default();
        self.owners.retain(|_, owner| *owner != key);
        events
    }
}

/// Snapshot of one firing, taken while the manager is borrowed
struct Firing {
    function: mlua::Result<mlua::Function>,
    delay: Duration,
    remaining: u32,
    target: Option<ObjectRef>,
    last: bool,
}

/// Delayed event scheduler for one engine
///
/// The manager is never borrowed while a script runs, so callbacks are free to
/// schedule or cancel events, including the one currently firing.
#[derive(Debug, Default)]
pub struct Scheduler {
    manager: RefCell<EventManager>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run after `delay`, `calls` times (0 repeats forever)
    ///
    /// The delay is measured against the owning processor's clock.
    pub fn schedule(
        &self,
        key: ProcessorKey,
        delay: Duration,
        calls: u32,
        callback: FunctionRef,
        target: Option<ObjectRef>,
    ) -> EventId {
        let mut manager = self.manager.borrow_mut();
        manager.next_id += 1;
        let id = EventId(manager.next_id);

        let processor = manager.processors.entry(key).or_default();
        let due = processor.next_due(delay);
        processor.insert(
            id,
            ScheduledEvent {
                delay,
                calls,
                target,
                callback,
                due,
            },
        );
        manager.owners.insert(id, key);

        debug!(target: "scripting", "Scheduled event {} on {:?} in {:?} ({} calls)", id.0, key, delay, calls);
        id
    }

    /// Cancel an event wherever it lives
    pub fn cancel(&self, lua: &Lua, id: EventId) -> bool {
        let event = self.manager.borrow_mut().remove(id);
        match event {
            Some(event) => {
                event.callback.release(lua);
                true
            }
            None => false,
        }
    }

    /// Cancel an event only if it belongs to `key`
    pub fn cancel_in(&self, lua: &Lua, key: ProcessorKey, id: EventId) -> bool {
        let owned = self.manager.borrow().owners.get(&id) == Some(&key);
        owned && self.cancel(lua, id)
    }

    /// Cancel every event on a processor, keeping the processor and its clock
    pub fn cancel_processor(&self, lua: &Lua, key: ProcessorKey) -> usize {
        let events = self.manager.borrow_mut().drain(key);
        let count = events.len();
        for event in events {
            event.callback.release(lua);
        }
        count
    }

    /// Cancel every event on a processor and drop the processor itself
    pub fn remove_processor(&self, lua: &Lua, key: ProcessorKey) -> usize {
        let count = self.cancel_processor(lua, key);
        self.manager.borrow_mut().processors.remove(&key);
        count
    }

    /// Cancel everything; returns how many events were released
    pub fn clear(&self, lua: &Lua) -> usize {
        let events: Vec<ScheduledEvent> = {
            let mut manager = self.manager.borrow_mut();
            manager.owners.clear();
            manager
                .processors
                .drain()
                .flat_map(|(_, mut processor)| processor.drain())
                .collect()
        };
        let count = events.len();
        for event in events {
            event.callback.release(lua);
        }
        count
    }

    /// Advance a processor's clock and fire whatever became due
    ///
    /// Returns the number of callbacks invoked.
    pub fn update(
        &self,
        lua: &Lua,
        objects: &NativeObjectRegistry,
        key: ProcessorKey,
        diff: Duration,
    ) -> usize {
        let due = {
            let mut manager = self.manager.borrow_mut();
            match manager.processors.get_mut(&key) {
                Some(processor) => {
                    processor.clock += diff;
                    processor.take_due()
                }
                None => return 0,
            }
        };

        let mut invoked = 0;
        for id in due {
            if self.execute(lua, objects, key, id) {
                invoked += 1;
            }
        }
        invoked
    }

    fn execute(&self, lua: &Lua, objects: &NativeObjectRegistry, key: ProcessorKey, id: EventId) -> bool {
        let Some(firing) = self.prepare(lua, key, id) else {
            return false;
        };

        let invoked = match firing.function {
            Ok(function) => {
                let target = match firing.target {
                    Some(target) => objects.push_ref(lua, target).unwrap_or_else(|err| {
                        report(&err);
                        Value::Nil
                    }),
                    None => Value::Nil,
                };
                let delay = u32::try_from(firing.delay.as_millis()).unwrap_or(u32::MAX);
                call_function(&function, (id, delay, firing.remaining, target));
                true
            }
            Err(err) => {
                report(&err);
                false
            }
        };

        if firing.last {
            self.cancel(lua, id);
        }
        invoked
    }

    /// Reschedule and count down before the callback sees the event
    fn prepare(&self, lua: &Lua, key: ProcessorKey, id: EventId) -> Option<Firing> {
        let mut manager = self.manager.borrow_mut();
        let processor = manager.processors.get_mut(&key)?;
        let event = processor.live.get_mut(&id)?;

        let last = event.calls == 1;
        if !last && event.calls != 0 {
            event.calls -= 1;
        }
        let firing = Firing {
            function: event.callback.function(lua),
            delay: event.delay,
            remaining: event.calls,
            target: event.target.clone(),
            last,
        };

        if !last {
            processor.requeue(id);
        }
        Some(firing)
    }

    pub fn is_scheduled(&self, id: EventId) -> bool {
        self.manager.borrow().owners.contains_key(&id)
    }

    /// Remaining invocations of an event, 0 meaning unlimited
    pub fn remaining_calls(&self, id: EventId) -> Option<u32> {
        let manager = self.manager.borrow();
        let key = manager.owners.get(&id)?;
        manager
            .processors
            .get(key)?
            .live
            .get(&id)
            .map(|event| event.calls)
    }

    /// Number of live events on a processor
    pub fn pending(&self, key: ProcessorKey) -> usize {
        self.manager
            .borrow()
            .processors
            .get(&key)
            .map_or(0, |processor| processor.live.len())
    }

    /// Number of live events across all processors
    pub fn len(&self) -> usize {
        self.manager.borrow().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function_ref::RefCounter;
    use mlua::Function;
    use std::rc::Rc;

    struct Fixture {
        lua: Lua,
        objects: NativeObjectRegistry,
        scheduler: Scheduler,
        counter: RefCounter,
    }

    impl Fixture {
        fn new() -> Self {
            let lua = Lua::new();
            let objects = NativeObjectRegistry::new(&lua).unwrap();
            lua.load("fired = {}").exec().unwrap();
            Self {
                lua,
                objects,
                scheduler: Scheduler::new(),
                counter: RefCounter::new(),
            }
        }

        fn callback(&self, code: &str) -> FunctionRef {
            let function: Function = self.lua.load(code).eval().unwrap();
            FunctionRef::new(&self.lua, function, &self.counter).unwrap()
        }

        fn recorder(&self) -> FunctionRef {
            self.callback(
                "return function(id, delay, remaining) table.insert(fired, { id, delay, remaining }) end",
            )
        }

        fn update(&self, millis: u64) -> usize {
            self.scheduler.update(
                &self.lua,
                &self.objects,
                ProcessorKey::Global,
                Duration::from_millis(millis),
            )
        }

        fn fired(&self) -> usize {
            self.lua.load("return #fired").eval::<usize>().unwrap()
        }
    }

    #[test]
    fn test_single_call_fires_once_and_releases() {
        let fx = Fixture::new();
        let id = fx.scheduler.schedule(
            ProcessorKey::Global,
            Duration::from_millis(100),
            1,
            fx.recorder(),
            None,
        );

        assert_eq!(fx.update(99), 0);
        assert!(fx.scheduler.is_scheduled(id));

        assert_eq!(fx.update(1), 1);
        assert!(!fx.scheduler.is_scheduled(id));
        assert_eq!(fx.counter.live(), 0);

        assert_eq!(fx.update(1000), 0);
        assert_eq!(fx.fired(), 1);
    }

    #[test]
    fn test_repeating_event_counts_down() {
        let fx = Fixture::new();
        let id = fx.scheduler.schedule(
            ProcessorKey::Global,
            Duration::from_millis(10),
            3,
            fx.recorder(),
            None,
        );

        fx.update(10);
        assert_eq!(fx.scheduler.remaining_calls(id), Some(2));
        fx.update(10);
        assert_eq!(fx.scheduler.remaining_calls(id), Some(1));
        fx.update(10);
        assert_eq!(fx.scheduler.remaining_calls(id), None);
        fx.update(10);

        assert_eq!(fx.fired(), 3);
        let first: (u64, u32, u32) = fx
            .lua
            .load("return fired[1][1], fired[1][2], fired[1][3]")
            .eval()
            .unwrap();
        assert_eq!(first, (id.raw(), 10, 2));
        assert_eq!(fx.counter.live(), 0);
    }

    #[test]
    fn test_reschedule_happens_before_callback() {
        let fx = Fixture::new();
        fx.lua.load("observed = nil").exec().unwrap();
        let probe = fx.callback("return function(id) observed = id end");
        let id = fx
            .scheduler
            .schedule(ProcessorKey::Global, Duration::from_millis(5), 3, probe, None);

        fx.update(5);
        // Still live with the decremented count once the callback has returned
        assert!(fx.scheduler.is_scheduled(id));
        assert_eq!(fx.scheduler.remaining_calls(id), Some(2));
        assert_eq!(fx.lua.load("return observed").eval::<u64>().unwrap(), id.raw());
    }

    #[test]
    fn test_infinite_event_keeps_firing() {
        let fx = Fixture::new();
        let id = fx.scheduler.schedule(
            ProcessorKey::Global,
            Duration::from_millis(1),
            0,
            fx.recorder(),
            None,
        );

        for _ in 0..100 {
            assert_eq!(fx.update(1), 1);
        }
        assert_eq!(fx.fired(), 100);
        assert_eq!(fx.scheduler.remaining_calls(id), Some(0));

        assert!(fx.scheduler.cancel(&fx.lua, id));
        assert_eq!(fx.counter.live(), 0);
    }

    #[test]
    fn test_large_step_fires_once_per_update() {
        let fx = Fixture::new();
        fx.scheduler.schedule(
            ProcessorKey::Global,
            Duration::from_millis(10),
            0,
            fx.recorder(),
            None,
        );

        // Rescheduling is relative to the processor clock, not the missed due time
        assert_eq!(fx.update(1000), 1);
        assert_eq!(fx.update(9), 0);
        assert_eq!(fx.update(1), 1);
    }

    #[test]
    fn test_events_fire_in_due_order() {
        let fx = Fixture::new();
        fx.lua.load("order = {}").exec().unwrap();

        for (name, delay) in [("late", 30), ("early", 10), ("middle", 20), ("tie", 20)] {
            let callback = fx.callback(&format!(
                "return function() table.insert(order, '{name}') end"
            ));
            fx.scheduler.schedule(
                ProcessorKey::Global,
                Duration::from_millis(delay),
                1,
                callback,
                None,
            );
        }

        assert_eq!(fx.update(50), 4);
        let order: Vec<String> = fx.lua.load("return order").eval().unwrap();
        assert_eq!(order, vec!["early", "middle", "tie", "late"]);
    }

    #[test]
    fn test_cancel_from_inside_callback() {
        let lua = Lua::new();
        let objects = NativeObjectRegistry::new(&lua).unwrap();
        let scheduler = Rc::new(Scheduler::new());
        let counter = RefCounter::new();

        let inner = Rc::clone(&scheduler);
        let cancel = lua
            .create_function(move |lua, id: u64| Ok(inner.cancel(lua, EventId::from_raw(id))))
            .unwrap();
        lua.globals().set("cancel", cancel).unwrap();
        lua.load("calls = 0").exec().unwrap();

        let function: Function = lua
            .load("return function(id) calls = calls + 1; cancelled = cancel(id) end")
            .eval()
            .unwrap();
        let callback = FunctionRef::new(&lua, function, &counter).unwrap();
        let id = scheduler.schedule(ProcessorKey::Global, Duration::from_millis(1), 0, callback, None);

        for _ in 0..5 {
            scheduler.update(&lua, &objects, ProcessorKey::Global, Duration::from_millis(1));
        }

        assert_eq!(lua.load("return calls").eval::<u32>().unwrap(), 1);
        assert!(lua.load("return cancelled").eval::<bool>().unwrap());
        assert!(!scheduler.is_scheduled(id));
        assert_eq!(counter.live(), 0);
    }

    #[test]
    fn test_last_call_cancelled_by_its_own_callback() {
        let lua = Lua::new();
        let objects = NativeObjectRegistry::new(&lua).unwrap();
        let scheduler = Rc::new(Scheduler::new());
        let counter = RefCounter::new();

        let inner = Rc::clone(&scheduler);
        let cancel = lua
            .create_function(move |lua, id: u64| Ok(inner.cancel(lua, EventId::from_raw(id))))
            .unwrap();
        lua.globals().set("cancel", cancel).unwrap();

        let function: Function = lua
            .load("return function(id) cancel(id) end")
            .eval()
            .unwrap();
        let callback = FunctionRef::new(&lua, function, &counter).unwrap();
        scheduler.schedule(ProcessorKey::Global, Duration::ZERO, 1, callback, None);

        assert_eq!(
            scheduler.update(&lua, &objects, ProcessorKey::Global, Duration::ZERO),
            1
        );
        assert!(scheduler.is_empty());
        assert_eq!(counter.live(), 0);
    }

    #[test]
    fn test_zero_delay_fires_on_next_update() {
        let fx = Fixture::new();
        fx.scheduler.schedule(
            ProcessorKey::Global,
            Duration::ZERO,
            2,
            fx.recorder(),
            None,
        );

        assert_eq!(fx.update(0), 1);
        assert_eq!(fx.update(0), 1);
        assert_eq!(fx.update(0), 0);
    }

    #[test]
    fn test_processors_are_independent() {
        let fx = Fixture::new();
        let guid = ObjectGuid(42);
        let global = fx.scheduler.schedule(
            ProcessorKey::Global,
            Duration::from_millis(10),
            1,
            fx.recorder(),
            None,
        );
        let owned = fx.scheduler.schedule(
            ProcessorKey::Object(guid),
            Duration::from_millis(10),
            1,
            fx.recorder(),
            None,
        );

        assert_eq!(fx.update(10), 1);
        assert!(fx.scheduler.is_scheduled(owned));
        assert!(!fx.scheduler.cancel_in(&fx.lua, ProcessorKey::Global, owned));
        assert!(!fx.scheduler.is_scheduled(global));

        assert_eq!(fx.scheduler.pending(ProcessorKey::Object(guid)), 1);
        assert_eq!(
            fx.scheduler
                .remove_processor(&fx.lua, ProcessorKey::Object(guid)),
            1
        );
        assert_eq!(fx.counter.live(), 0);
        assert!(fx.scheduler.is_empty());
    }

    #[test]
    fn test_clear_releases_everything() {
        let fx = Fixture::new();
        for delay in 1..=5 {
            fx.scheduler.schedule(
                ProcessorKey::Object(ObjectGuid(delay)),
                Duration::from_millis(delay),
                0,
                fx.recorder(),
                None,
            );
        }

        assert_eq!(fx.counter.live(), 5);
        assert_eq!(fx.scheduler.clear(&fx.lua), 5);
        assert_eq!(fx.counter.live(), 0);
    }
}
