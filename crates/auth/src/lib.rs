//! `shopledger-auth`: store-scoped authorization boundary.
//!
//! Mutators never resolve roles themselves; they receive an [`Authorizer`]
//! and ask it whether an actor holds one of the roles an operation allows.
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authorize;
pub mod directory;

pub use authorize::{AuthzError, Authorizer};
pub use directory::StoreDirectory;
