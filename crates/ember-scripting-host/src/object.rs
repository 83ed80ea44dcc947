//! Native objects as scripts see them
//!
//! A host object crosses into Lua as an [`ObjectRef`] userdata carrying the
//! object's identity and its most-derived kind. Scripts never own the native
//! object: once the host forgets it, every method on the reference raises.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use mlua::{AnyUserData, Lua, MetaMethod, UserData, UserDataMethods, Value, Variadic};

use crate::engine::engine_state;
use crate::marshal::{arg, check_function, ArgumentError, Check, Push};
use crate::scheduler::{EventId, ProcessorKey};

/// Globally unique object identifier assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectGuid(pub u64);

impl ObjectGuid {
    /// Low 32 bits, the counter part of the guid
    pub fn low(self) -> u32 {
        self.0 as u32
    }

    /// Key of this object in the native object registry
    pub fn registry_key(self) -> String {
        format!("0x{:016X}", self.0)
    }
}

impl fmt::Display for ObjectGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Push for ObjectGuid {
    fn push(self, lua: &Lua) -> mlua::Result<Value> {
        self.0.push(lua)
    }
}

impl Check for ObjectGuid {
    fn check(args: &[Value], narg: usize) -> Result<Self, ArgumentError> {
        u64::check(args, narg).map(ObjectGuid)
    }

    fn check_or(args: &[Value], narg: usize, default: Self) -> Self {
        ObjectGuid(u64::check_or(args, narg, default.0))
    }
}

/// Runtime type tag the host reports for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    Object = 0,
    Item = 1,
    Container = 2,
    Unit = 3,
    Player = 4,
    GameObject = 5,
    DynamicObject = 6,
    Corpse = 7,
}

impl TypeId {
    pub fn from_u8(id: u8) -> Option<Self> {
        match id {
            0 => Some(TypeId::Object),
            1 => Some(TypeId::Item),
            2 => Some(TypeId::Container),
            3 => Some(TypeId::Unit),
            4 => Some(TypeId::Player),
            5 => Some(TypeId::GameObject),
            6 => Some(TypeId::DynamicObject),
            7 => Some(TypeId::Corpse),
            _ => None,
        }
    }
}

/// A native object the host can expose to scripts
pub trait HostObject {
    fn guid(&self) -> ObjectGuid;
    fn type_id(&self) -> TypeId;
    fn entry(&self) -> u32;
    fn name(&self) -> String;
}

/// Plain snapshot of an object, for hosts that don't keep a richer type around
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub guid: ObjectGuid,
    pub type_id: TypeId,
    pub entry: u32,
    pub name: String,
}

impl ObjectInfo {
    pub fn new(guid: u64, type_id: TypeId, entry: u32, name: impl Into<String>) -> Self {
        Self {
            guid: ObjectGuid(guid),
            type_id,
            entry,
            name: name.into(),
        }
    }
}

impl HostObject for ObjectInfo {
    fn guid(&self) -> ObjectGuid {
        self.guid
    }

    fn type_id(&self) -> TypeId {
        self.type_id
    }

    fn entry(&self) -> u32 {
        self.entry
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Script-visible kind of an object reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Object,
    WorldObject,
    Unit,
    Creature,
    Player,
    GameObject,
    Corpse,
    Item,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Object => "Object",
            ObjectKind::WorldObject => "WorldObject",
            ObjectKind::Unit => "Unit",
            ObjectKind::Creature => "Creature",
            ObjectKind::Player => "Player",
            ObjectKind::GameObject => "GameObject",
            ObjectKind::Corpse => "Corpse",
            ObjectKind::Item => "Item",
        }
    }

    /// Most-derived kind for an object tagged `type_id` that is being pushed as `self`
    ///
    /// Only the general kinds dispatch on the tag; concrete kinds are pushed as is.
    /// A tag the base kind doesn't know about keeps the base kind.
    pub fn resolve(self, type_id: TypeId) -> ObjectKind {
        match self {
            ObjectKind::Unit => match type_id {
                TypeId::Unit => ObjectKind::Creature,
                TypeId::Player => ObjectKind::Player,
                _ => ObjectKind::Unit,
            },
            ObjectKind::Object | ObjectKind::WorldObject => match type_id {
                TypeId::Unit => ObjectKind::Creature,
                TypeId::Player => ObjectKind::Player,
                TypeId::GameObject => ObjectKind::GameObject,
                TypeId::Corpse => ObjectKind::Corpse,
                TypeId::Item | TypeId::Container if self == ObjectKind::Object => {
                    ObjectKind::Item
                }
                _ => self,
            },
            concrete => concrete,
        }
    }

    /// Whether an object tagged `type_id` can be viewed as this kind
    pub fn accepts(self, type_id: TypeId) -> bool {
        match self {
            ObjectKind::Object => true,
            ObjectKind::WorldObject => matches!(
                type_id,
                TypeId::Unit
                    | TypeId::Player
                    | TypeId::GameObject
                    | TypeId::DynamicObject
                    | TypeId::Corpse
            ),
            ObjectKind::Unit => matches!(type_id, TypeId::Unit | TypeId::Player),
            ObjectKind::Creature => type_id == TypeId::Unit,
            ObjectKind::Player => type_id == TypeId::Player,
            ObjectKind::GameObject => type_id == TypeId::GameObject,
            ObjectKind::Corpse => type_id == TypeId::Corpse,
            ObjectKind::Item => matches!(type_id, TypeId::Item | TypeId::Container),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const NARROWING_METHODS: [(&str, ObjectKind); 7] = [
    ("ToWorldObject", ObjectKind::WorldObject),
    ("ToUnit", ObjectKind::Unit),
    ("ToCreature", ObjectKind::Creature),
    ("ToPlayer", ObjectKind::Player),
    ("ToGameObject", ObjectKind::GameObject),
    ("ToCorpse", ObjectKind::Corpse),
    ("ToItem", ObjectKind::Item),
];

/// Script-side handle to a host object
///
/// Clones share one validity flag, and the object registry hands the same flag
/// to every handle of a guid, so destroying the object invalidates all of them.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    guid: ObjectGuid,
    type_id: TypeId,
    kind: ObjectKind,
    entry: u32,
    name: String,
    valid: Rc<Cell<bool>>,
}

impl ObjectRef {
    pub fn new(object: &dyn HostObject, kind: ObjectKind) -> Self {
        Self {
            guid: object.guid(),
            type_id: object.type_id(),
            kind,
            entry: object.entry(),
            name: object.name(),
            valid: Rc::new(Cell::new(true)),
        }
    }

    pub fn guid(&self) -> ObjectGuid {
        self.guid
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    pub(crate) fn validity(&self) -> &Rc<Cell<bool>> {
        &self.valid
    }

    pub(crate) fn share_validity(&mut self, valid: Rc<Cell<bool>>) {
        self.valid = valid;
    }

    pub(crate) fn invalidate(&self) {
        self.valid.set(false);
    }

    /// View this object as `kind`, resolved to its most-derived form
    pub fn narrow(&self, kind: ObjectKind) -> Option<ObjectRef> {
        if !kind.accepts(self.type_id) {
            return None;
        }
        Some(ObjectRef {
            kind: kind.resolve(self.type_id),
            ..self.clone()
        })
    }

    fn ensure_valid(&self) -> mlua::Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(mlua::Error::RuntimeError(format!(
                "attempt to use a destroyed {}",
                self.kind
            )))
        }
    }
}

impl UserData for ObjectRef {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("IsValid", |_, this, ()| Ok(this.is_valid()));

        methods.add_method("GetGUID", |lua, this, ()| {
            this.ensure_valid()?;
            this.guid.push(lua)
        });

        methods.add_method("GetGUIDLow", |_, this, ()| {
            this.ensure_valid()?;
            Ok(this.guid.low())
        });

        methods.add_method("GetEntry", |_, this, ()| {
            this.ensure_valid()?;
            Ok(this.entry)
        });

        methods.add_method("GetName", |_, this, ()| {
            this.ensure_valid()?;
            Ok(this.name.clone())
        });

        methods.add_method("GetTypeId", |_, this, ()| {
            this.ensure_valid()?;
            Ok(this.type_id as u8)
        });

        methods.add_method("GetObjectType", |_, this, ()| {
            this.ensure_valid()?;
            Ok(this.kind.name())
        });

        for (name, kind) in NARROWING_METHODS {
            methods.add_method(name, move |lua, this, ()| {
                this.ensure_valid()?;
                match this.narrow(kind) {
                    Some(object) => engine_state(lua)?.objects.push_ref(lua, object),
                    None => Ok(Value::Nil),
                }
            });
        }

        // obj:RegisterEvent(function, delay_ms, repeats)
        methods.add_method("RegisterEvent", |lua, this, args: Variadic<Value>| {
            this.ensure_valid()?;
            let function = check_function(&args, 1)?;
            let delay = u32::check(&args, 2)?;
            let repeats = u32::check(&args, 3)?;

            let state = engine_state(lua)?;
            state.schedule(
                lua,
                ProcessorKey::Object(this.guid),
                function,
                Duration::from_millis(u64::from(delay)),
                repeats,
                Some(this.clone()),
            )
        });

        methods.add_method("RemoveEventById", |lua, this, args: Variadic<Value>| {
            this.ensure_valid()?;
            let id = EventId::check(&args, 1)?;
            let state = engine_state(lua)?;
            Ok(state
                .scheduler
                .cancel_in(lua, ProcessorKey::Object(this.guid), id))
        });

        methods.add_method("RemoveEvents", |lua, this, ()| {
            this.ensure_valid()?;
            let state = engine_state(lua)?;
            Ok(state
                .scheduler
                .cancel_processor(lua, ProcessorKey::Object(this.guid)))
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{} ({})", this.kind, this.guid))
        });

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: AnyUserData| {
            Ok(other
                .borrow::<ObjectRef>()
                .map(|other| other.guid == this.guid)
                .unwrap_or(false))
        });
    }
}

fn live_object(value: Option<&Value>) -> Option<ObjectRef> {
    match value {
        Some(Value::UserData(userdata)) => userdata
            .borrow::<ObjectRef>()
            .ok()
            .map(|object| ObjectRef::clone(&object))
            .filter(ObjectRef::is_valid),
        _ => None,
    }
}

/// Read a required object argument of at least `kind`
///
/// A destroyed object counts as absent.
pub fn check_object(
    args: &[Value],
    narg: usize,
    kind: ObjectKind,
) -> Result<ObjectRef, ArgumentError> {
    let value = arg(args, narg);
    live_object(value)
        .and_then(|object| object.narrow(kind))
        .ok_or_else(|| ArgumentError::new(narg, kind.name(), value))
}

/// Read an optional object argument of at least `kind`, never failing
pub fn check_object_opt(args: &[Value], narg: usize, kind: ObjectKind) -> Option<ObjectRef> {
    live_object(arg(args, narg)).and_then(|object| object.narrow(kind))
}
