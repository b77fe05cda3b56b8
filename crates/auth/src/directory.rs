//! In-memory store ownership + membership table.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use shopledger_core::{ActorId, StoreId, StoreRole};

use crate::authorize::{describe, AuthzError, Authorizer};

#[derive(Debug, Clone)]
struct StoreEntry {
    owner: ActorId,
    members: HashMap<ActorId, StoreRole>,
}

/// Ownership/membership directory for tests, dev and single-process deployments.
///
/// The owner recorded at registration always authorizes as `Owner`, even
/// without a membership row.
#[derive(Debug, Default)]
pub struct StoreDirectory {
    stores: RwLock<HashMap<StoreId, StoreEntry>>,
}

impl StoreDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_store(&self, store_id: StoreId, owner: ActorId) -> Result<(), AuthzError> {
        let mut stores = self.stores.write().map_err(|_| poisoned())?;
        stores.insert(
            store_id,
            StoreEntry {
                owner,
                members: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Add (or change) a membership on a registered store.
    pub fn add_member(
        &self,
        store_id: StoreId,
        actor_id: ActorId,
        role: StoreRole,
    ) -> Result<(), AuthzError> {
        let mut stores = self.stores.write().map_err(|_| poisoned())?;
        let entry = stores.get_mut(&store_id).ok_or(AuthzError::StoreNotFound)?;
        entry.members.insert(actor_id, role);
        Ok(())
    }

    pub fn remove_member(&self, store_id: StoreId, actor_id: ActorId) -> Result<(), AuthzError> {
        let mut stores = self.stores.write().map_err(|_| poisoned())?;
        let entry = stores.get_mut(&store_id).ok_or(AuthzError::StoreNotFound)?;
        entry.members.remove(&actor_id);
        Ok(())
    }
}

fn poisoned() -> AuthzError {
    AuthzError::Unavailable("lock poisoned".to_string())
}

impl Authorizer for StoreDirectory {
    fn authorize(
        &self,
        store_id: StoreId,
        actor_id: ActorId,
        allowed: &[StoreRole],
    ) -> Result<StoreRole, AuthzError> {
        let stores = self.stores.read().map_err(|_| poisoned())?;
        let entry = stores.get(&store_id).ok_or(AuthzError::StoreNotFound)?;

        if allowed.contains(&StoreRole::Owner) && entry.owner == actor_id {
            return Ok(StoreRole::Owner);
        }

        match entry.members.get(&actor_id) {
            Some(role) if allowed.contains(role) => Ok(*role),
            _ => {
                debug!(store = %store_id, actor = %actor_id, "authorization denied");
                Err(AuthzError::Forbidden(describe(allowed)))
            }
        }
    }
}
