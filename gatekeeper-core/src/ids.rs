//! Discord snowflake newtypes.
//!
//! Discord encodes snowflakes as decimal strings in JSON; these types
//! serialize that way and accept either a string or a bare number.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_snowflake(deserializer).map(Self)
            }
        }
    };
}

snowflake!(
    /// A Discord user. Also identifies the user's membership in a guild.
    UserId
);
snowflake!(ChannelId);
snowflake!(MessageId);
snowflake!(GuildId);
snowflake!(RoleId);
snowflake!(ApplicationId);
snowflake!(InteractionId);

impl UserId {
    /// Mention markup, rendered by clients as the user's name.
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSnowflake {
    Text(String),
    Number(u64),
}

fn deserialize_snowflake<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match RawSnowflake::deserialize(deserializer)? {
        RawSnowflake::Text(text) => text.parse().map_err(serde::de::Error::custom),
        RawSnowflake::Number(n) => Ok(n),
    }
}

/// Address of a single message: the channel it lives in plus its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: MessageId,
}

impl MessageRef {
    pub fn new(channel: ChannelId, message: MessageId) -> Self {
        Self { channel, message }
    }
}
