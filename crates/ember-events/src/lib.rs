//! Hook categories and event ids shared between the scripting host and its hosts
//!
//! This crate only holds closed enumerations so that a host can name the events
//! it fires without depending on the scripting runtime.

/// Declares a hook event family.
///
/// Ids are explicit and start at 1; `COUNT` is one past the highest id, which is
/// the bound the binding tables validate registrations against.
macro_rules! hook_events {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $id:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant = $id,
            )+
        }

        impl $name {
            /// One past the highest event id in this family
            pub const COUNT: u32 = {
                let mut max = 0;
                $(
                    if $id > max {
                        max = $id;
                    }
                )+
                max + 1
            };

            /// Every event of this family, in id order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The id scripts use to name this event
            pub fn id(self) -> u32 {
                self as u32
            }

            /// Convert a script supplied id back into an event
            pub fn from_id(id: u32) -> Option<Self> {
                match id {
                    $($id => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl From<$name> for u32 {
            fn from(event: $name) -> u32 {
                event.id()
            }
        }
    };
}

pub(crate) use hook_events;

mod category;
mod entry_events;
mod global_events;

pub use category::{Category, EntityKind};
pub use entry_events::{CreatureEvent, GameObjectEvent, GossipEvent, ItemEvent, PacketEvent};
pub use global_events::{GroupEvent, GuildEvent, PlayerEvent, ServerEvent, VehicleEvent};
