use std::sync::Arc;

use thiserror::Error;

use shopledger_core::{ActorId, StoreId, StoreRole};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("store not found")]
    StoreNotFound,

    #[error("forbidden: actor is not {0} of the store")]
    Forbidden(String),

    /// The membership source itself failed (poisoned lock, lost connection).
    #[error("authorization directory unavailable: {0}")]
    Unavailable(String),
}

/// Single authorization capability consumed by every mutator.
///
/// - No IO assumptions (implementations may be backed by a cache or a table)
/// - No panics
/// - No business logic (pure policy check)
///
/// Returns the role that granted access so callers can record it.
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        store_id: StoreId,
        actor_id: ActorId,
        allowed: &[StoreRole],
    ) -> Result<StoreRole, AuthzError>;
}

impl<A> Authorizer for Arc<A>
where
    A: Authorizer + ?Sized,
{
    fn authorize(
        &self,
        store_id: StoreId,
        actor_id: ActorId,
        allowed: &[StoreRole],
    ) -> Result<StoreRole, AuthzError> {
        (**self).authorize(store_id, actor_id, allowed)
    }
}

pub(crate) fn describe(allowed: &[StoreRole]) -> String {
    allowed
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}
