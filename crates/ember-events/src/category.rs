use std::fmt;

use crate::{
    CreatureEvent, GameObjectEvent, GossipEvent, GroupEvent, GuildEvent, ItemEvent, PacketEvent,
    PlayerEvent, ServerEvent, VehicleEvent,
};

/// Kind of template an entry scoped category refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Creature,
    GameObject,
    Item,
    /// Packet opcodes; the "template" is the opcode table
    Opcode,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Creature => "creature",
            EntityKind::GameObject => "gameobject",
            EntityKind::Item => "item",
            EntityKind::Opcode => "opcode",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Binding table a registration goes into
///
/// Global categories select bindings by event id. Entry categories select by
/// (entry, event) and, except for player gossip, require the entry to exist in
/// the host's catalogue at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Server,
    Player,
    Guild,
    Group,
    Vehicle,
    Packet,
    Creature,
    CreatureGossip,
    GameObject,
    GameObjectGossip,
    Item,
    ItemGossip,
    PlayerGossip,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Server,
        Category::Player,
        Category::Guild,
        Category::Group,
        Category::Vehicle,
        Category::Packet,
        Category::Creature,
        Category::CreatureGossip,
        Category::GameObject,
        Category::GameObjectGossip,
        Category::Item,
        Category::ItemGossip,
        Category::PlayerGossip,
    ];

    /// Number of valid event ids; registrations must use `event < event_count()`
    pub fn event_count(self) -> u32 {
        match self {
            Category::Server => ServerEvent::COUNT,
            Category::Player => PlayerEvent::COUNT,
            Category::Guild => GuildEvent::COUNT,
            Category::Group => GroupEvent::COUNT,
            Category::Vehicle => VehicleEvent::COUNT,
            Category::Packet => PacketEvent::COUNT,
            Category::Creature => CreatureEvent::COUNT,
            Category::GameObject => GameObjectEvent::COUNT,
            Category::Item => ItemEvent::COUNT,
            Category::CreatureGossip
            | Category::GameObjectGossip
            | Category::ItemGossip
            | Category::PlayerGossip => GossipEvent::COUNT,
        }
    }

    /// Whether bindings are keyed by (entry, event) rather than by event alone
    pub fn is_entry_scoped(self) -> bool {
        !matches!(
            self,
            Category::Server
                | Category::Player
                | Category::Guild
                | Category::Group
                | Category::Vehicle
        )
    }

    /// Catalogue the entry id must be found in, if any
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            Category::Packet => Some(EntityKind::Opcode),
            Category::Creature | Category::CreatureGossip => Some(EntityKind::Creature),
            Category::GameObject | Category::GameObjectGossip => Some(EntityKind::GameObject),
            Category::Item | Category::ItemGossip => Some(EntityKind::Item),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Server => "ServerEvents",
            Category::Player => "PlayerEvents",
            Category::Guild => "GuildEvents",
            Category::Group => "GroupEvents",
            Category::Vehicle => "VehicleEvents",
            Category::Packet => "PacketEvents",
            Category::Creature => "CreatureEvents",
            Category::CreatureGossip => "GossipEvents (creature)",
            Category::GameObject => "GameObjectEvents",
            Category::GameObjectGossip => "GossipEvents (gameobject)",
            Category::Item => "ItemEvents",
            Category::ItemGossip => "GossipEvents (item)",
            Category::PlayerGossip => "GossipEvents (player)",
        }
    }

    /// Convert a register type id, as scripts see it, to a category
    pub fn from_discriminant(id: u8) -> Option<Self> {
        match id {
            1 => Some(Category::Server),
            2 => Some(Category::Player),
            3 => Some(Category::Guild),
            4 => Some(Category::Group),
            5 => Some(Category::Vehicle),
            6 => Some(Category::Packet),
            7 => Some(Category::Creature),
            8 => Some(Category::CreatureGossip),
            9 => Some(Category::GameObject),
            10 => Some(Category::GameObjectGossip),
            11 => Some(Category::Item),
            12 => Some(Category::ItemGossip),
            13 => Some(Category::PlayerGossip),
            _ => None,
        }
    }

    /// Get the register type id for this category
    pub fn to_discriminant(self) -> u8 {
        match self {
            Category::Server => 1,
            Category::Player => 2,
            Category::Guild => 3,
            Category::Group => 4,
            Category::Vehicle => 5,
            Category::Packet => 6,
            Category::Creature => 7,
            Category::CreatureGossip => 8,
            Category::GameObject => 9,
            Category::GameObjectGossip => 10,
            Category::Item => 11,
            Category::ItemGossip => 12,
            Category::PlayerGossip => 13,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
