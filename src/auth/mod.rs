pub mod context;
pub mod identity;
pub mod session;

pub use context::SessionContext;
pub use identity::{AuthError, IdentityProvider, Session, SqliteIdentity};
