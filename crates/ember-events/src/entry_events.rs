//! Events bound to a specific template entry (creature, game object, item, opcode, gossip menu)

use crate::hook_events;

hook_events! {
    /// Packet hooks, registered per opcode
    pub enum PacketEvent {
        Receive = 5,
        ReceiveUnknown = 6,
        Send = 7,
    }
}

hook_events! {
    /// Creature hooks, registered per creature template
    pub enum CreatureEvent {
        EnterCombat = 1,
        LeaveCombat = 2,
        TargetDied = 3,
        Died = 4,
        Spawn = 5,
        ReachWaypoint = 6,
        AiUpdate = 7,
        ReceiveEmote = 8,
        DamageTaken = 9,
        PreCombat = 10,
        AttackedAt = 11,
        Owner = 12,
        SummonedCreatureDespawn = 19,
        SummonedCreatureDied = 20,
        Summoned = 22,
        Reset = 23,
        ReachHome = 24,
        CorpseRemoved = 26,
        MoveInLos = 27,
        DummyEffect = 30,
        QuestAccept = 31,
        QuestReward = 34,
        DialogStatus = 35,
        Add = 36,
        Remove = 37,
    }
}

hook_events! {
    /// Game object hooks, registered per game object template
    pub enum GameObjectEvent {
        AiUpdate = 1,
        Spawn = 2,
        DummyEffect = 3,
        QuestAccept = 4,
        QuestReward = 5,
        DialogStatus = 6,
        Destroyed = 7,
        Damaged = 8,
        LootStateChange = 9,
        GoStateChanged = 10,
        Add = 12,
        Remove = 13,
    }
}

hook_events! {
    /// Item hooks, registered per item template
    pub enum ItemEvent {
        DummyEffect = 1,
        Use = 2,
        QuestAccept = 3,
        Expire = 4,
        Remove = 5,
    }
}

hook_events! {
    /// Gossip hooks, shared by the creature, game object, item and player gossip categories
    pub enum GossipEvent {
        Hello = 1,
        Select = 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_ids_mirror_server_packet_ids() {
        use crate::ServerEvent;

        assert_eq!(PacketEvent::Receive.id(), ServerEvent::PacketReceive.id());
        assert_eq!(PacketEvent::Send.id(), ServerEvent::PacketSend.id());
        assert_eq!(PacketEvent::COUNT, 8);
    }

    #[test]
    fn test_gossip_family() {
        assert_eq!(GossipEvent::COUNT, 3);
        assert_eq!(GossipEvent::from_id(2), Some(GossipEvent::Select));
        assert_eq!(u32::from(GossipEvent::Hello), 1);
    }
}
