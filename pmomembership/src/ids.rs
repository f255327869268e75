//! Identifiants typés des playlists et des morceaux

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rang d'un morceau dans sa playlist (commence à 1)
pub type Position = u32;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifiant d'une playlist dans le catalogue
    PlaylistId
);

define_id!(
    /// Identifiant d'un morceau dans le catalogue
    SongId
);
