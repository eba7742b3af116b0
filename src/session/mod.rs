/// Session and refresh-token lifecycle
///
/// A delegation groups the chain of refresh tokens issued for one login.
/// The engine rotates tokens within it and revokes the whole chain on logout,
/// reuse, or expiry.

mod engine;
pub mod memory;
pub mod models;
pub mod postgres;
mod revocation;
pub mod store;

pub use engine::SessionEngine;
pub use memory::InMemorySessionStore;
pub use models::{Delegation, IssuedTokens, NewRefreshToken, RefreshTokenRecord};
pub use postgres::PgSessionStore;
pub use revocation::{RevocationCascade, RevocationReason};
pub use store::{SessionStore, UserStore};
