use serde::{Deserialize, Serialize};

/// Role an actor holds within one store.
///
/// The store owner is always `Owner`; everybody else reaches a store through
/// an explicit membership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreRole {
    Owner,
    Member,
}

impl StoreRole {
    pub const ALL: &'static [StoreRole] = &[StoreRole::Owner, StoreRole::Member];
    pub const OWNER_ONLY: &'static [StoreRole] = &[StoreRole::Owner];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Owner => "OWNER",
            StoreRole::Member => "MEMBER",
        }
    }
}

impl core::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
