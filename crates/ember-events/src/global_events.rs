//! Events bound by event id alone

use crate::hook_events;

hook_events! {
    /// Server and world lifecycle hooks
    pub enum ServerEvent {
        NetworkStart = 1,
        NetworkStop = 2,
        SocketOpen = 3,
        SocketClose = 4,
        PacketReceive = 5,
        PacketReceiveUnknown = 6,
        PacketSend = 7,
        OpenStateChange = 8,
        ConfigLoad = 9,
        ShutdownInit = 11,
        ShutdownCancel = 12,
        WorldUpdate = 13,
        Startup = 14,
        Shutdown = 15,
        /// Fired while the runtime is still alive, right before the engine tears down
        LuaStateClose = 16,
        MapCreate = 17,
        MapDestroy = 18,
        MapUpdate = 21,
        GameEventStart = 34,
        GameEventStop = 35,
    }
}

hook_events! {
    /// Player hooks
    pub enum PlayerEvent {
        CharacterCreate = 1,
        CharacterDelete = 2,
        Login = 3,
        Logout = 4,
        Spell = 5,
        KillPlayer = 6,
        KillCreature = 7,
        KilledByCreature = 8,
        DuelRequest = 9,
        DuelStart = 10,
        DuelEnd = 11,
        GiveXp = 12,
        LevelChange = 13,
        MoneyChange = 14,
        ReputationChange = 15,
        TalentsChange = 16,
        TalentsReset = 17,
        Chat = 18,
        Whisper = 19,
        GroupChat = 20,
        GuildChat = 21,
        ChannelChat = 22,
        Emote = 23,
        TextEmote = 24,
        Save = 25,
        BindToInstance = 26,
        UpdateZone = 27,
        MapChange = 28,
        EquipItem = 29,
        FirstLogin = 30,
        CanUseItem = 31,
        LootItem = 32,
        EnterCombat = 33,
        LeaveCombat = 34,
        Repop = 35,
        Resurrect = 36,
        LootMoney = 37,
        QuestAbandon = 38,
        Command = 42,
    }
}

hook_events! {
    /// Guild hooks
    pub enum GuildEvent {
        AddMember = 1,
        RemoveMember = 2,
        Motd = 3,
        Info = 4,
        Create = 5,
        Disband = 6,
        MoneyWithdraw = 7,
        MoneyDeposit = 8,
        ItemMove = 9,
        EventLog = 10,
        BankEventLog = 11,
    }
}

hook_events! {
    /// Group hooks
    pub enum GroupEvent {
        MemberAdd = 1,
        MemberInvite = 2,
        MemberRemove = 3,
        LeaderChange = 4,
        Disband = 5,
        Create = 6,
    }
}

hook_events! {
    /// Vehicle hooks
    pub enum VehicleEvent {
        Install = 1,
        Uninstall = 2,
        InstallAccessory = 3,
        AddPassenger = 4,
        RemovePassenger = 5,
    }
}
