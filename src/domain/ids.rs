//! Type-safe identifiers.
//!
//! Platform identifiers (guilds, bots, channels, members) are 64-bit
//! snowflakes issued by the chat platform. Task and timer identifiers are
//! assigned by the store on insert. Each gets its own newtype so one kind
//! of id cannot be passed where another is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }
    };
}

define_id!(
    /// A guild (community server) on the chat platform.
    GuildId(u64)
);

define_id!(
    /// The user id of a bot identity.
    BotId(u64)
);

define_id!(
    /// A text channel inside a guild.
    ChannelId(u64)
);

define_id!(
    /// A guild member (platform user id).
    MemberId(u64)
);

define_id!(
    /// Store-assigned id of a queued task.
    TaskId(i64)
);

define_id!(
    /// Store-assigned id of a persistent timer.
    TimerId(i64)
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn display_is_raw_number() {
        assert_eq!(GuildId::new(8_123_456_789).to_string(), "8123456789");
        assert_eq!(TimerId::new(-1).to_string(), "-1");
    }

    #[test]
    fn serde_is_transparent() {
        let Ok(json) = serde_json::to_string(&BotId::new(42)) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "42");

        let Ok(id) = serde_json::from_str::<GuildId>("7") else {
            panic!("deserialization failed");
        };
        assert_eq!(id.get(), 7);
    }

    #[test]
    fn hash_works_in_hashmap() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ChannelId::new(3), "alerts");
        assert_eq!(map.get(&ChannelId::from(3)), Some(&"alerts"));
    }
}
