//! Identifier types shared by the room service and mesh clients.
//!
//! All identifiers are opaque strings on the wire. The newtypes exist so a
//! peer identifier can never be passed where a session identifier is expected,
//! which matters because bans are keyed by session and membership by peer.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true when the identifier is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Caller-chosen room name. Unique key in the registry.
    RoomId
);

string_id!(
    /// Ephemeral address of one participant connection attempt.
    ///
    /// Regenerated every time a participant (re)connects, so it must never be
    /// used for ban enforcement.
    PeerId
);

string_id!(
    /// Long-lived participant identity that survives reconnects.
    SessionId
);

impl PeerId {
    /// Generate a fresh random peer identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SessionId {
    /// Generate a fresh random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Moderation action a room creator can apply.
///
/// The registry applies it authoritatively; the acting participant then
/// mirrors it to connected peers inside an `admin_action` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Mute,
    Unmute,
    Kick,
    Lock,
    Unlock,
}

impl AdminAction {
    /// Stable lowercase name, used in metrics labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Kick => "kick",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }

    /// Whether the action names a target participant.
    #[must_use]
    pub const fn targets_peer(self) -> bool {
        matches!(self, Self::Mute | Self::Unmute | Self::Kick)
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
